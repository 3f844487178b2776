use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Alert records, one row per feed entry per batch
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            region TEXT NOT NULL,
            region_code TEXT NOT NULL,
            publish_time TEXT NOT NULL,
            type_code TEXT NOT NULL,
            type_name TEXT NOT NULL,
            level_code TEXT NOT NULL,
            level_name TEXT NOT NULL,
            detail_link TEXT NOT NULL,
            longitude REAL,
            latitude REAL,
            batch_id TEXT NOT NULL,
            write_time INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id TEXT NOT NULL,
            record_count INTEGER NOT NULL,
            status TEXT NOT NULL,
            message TEXT NOT NULL,
            update_time INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notification_configs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            send_key TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT '',
            smtp_host TEXT,
            smtp_port INTEGER,
            smtp_secure INTEGER NOT NULL DEFAULT 1,
            smtp_user TEXT,
            smtp_password TEXT,
            region_codes TEXT NOT NULL DEFAULT '',
            level_types TEXT NOT NULL DEFAULT '',
            alert_levels TEXT NOT NULL DEFAULT '',
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alert_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            config_id INTEGER NOT NULL,
            rule_type TEXT NOT NULL,
            target_level TEXT,
            alert_type TEXT,
            region_code TEXT,
            region_level TEXT,
            conditions TEXT,
            enabled INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (config_id) REFERENCES notification_configs(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notification_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            config_id INTEGER NOT NULL,
            message TEXT NOT NULL,
            status TEXT NOT NULL,
            sent_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_batch_id ON alerts(batch_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_write_time ON alerts(write_time DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_ingestion_logs_update_time ON ingestion_logs(update_time DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_alert_rules_config ON alert_rules(config_id, sort_order)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_notification_logs_sent_at ON notification_logs(sent_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
