//! Operational overview and health probe.
//!
//! Summarises recent ingestion history, stored alert counts, subscriber
//! counts and recent notification outcomes. Used by `alh status`,
//! `GET /api/monitor` and `GET /health`.

use anyhow::Result;
use chrono::{DateTime, Duration, Local, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Instant;

use crate::config::Config;
use crate::db;
use crate::models::{AlertRecord, IngestionLog, NotificationLog, ALERT_COLUMNS};
use crate::query::latest_success;

const RECENT_INGESTION_LOGS: i64 = 30;
const RECENT_NOTIFICATION_LOGS: i64 = 20;
const RECENT_ALERTS: i64 = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewStats {
    pub total_alerts: i64,
    pub today_alerts: i64,
    pub enabled_configs: i64,
    pub total_configs: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub update_logs: Vec<IngestionLog>,
    pub stats: OverviewStats,
    pub latest_batch: Option<IngestionLog>,
    pub notification_logs: Vec<NotificationLog>,
    pub recent_alerts: Vec<AlertRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub database: &'static str,
    pub last_update: Option<DateTime<Utc>>,
    pub alert_count: i64,
    #[serde(rename = "uptime")]
    pub uptime_secs: u64,
}

/// Start of the current local day, as a Unix timestamp.
fn local_midnight() -> i64 {
    Local::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| (Utc::now() - Duration::hours(24)).timestamp())
}

pub async fn overview(pool: &SqlitePool) -> Result<Overview> {
    let update_logs: Vec<IngestionLog> = sqlx::query(
        "SELECT id, batch_id, record_count, status, message, update_time FROM ingestion_logs \
         ORDER BY update_time DESC, id DESC LIMIT ?",
    )
    .bind(RECENT_INGESTION_LOGS)
    .fetch_all(pool)
    .await?
    .iter()
    .map(IngestionLog::from_row)
    .collect();

    let total_alerts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts")
        .fetch_one(pool)
        .await?;

    let today_alerts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts WHERE write_time >= ?")
        .bind(local_midnight())
        .fetch_one(pool)
        .await?;

    let total_configs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notification_configs")
        .fetch_one(pool)
        .await?;

    let enabled_configs: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM notification_configs WHERE enabled = 1")
            .fetch_one(pool)
            .await?;

    let notification_logs: Vec<NotificationLog> = sqlx::query(
        "SELECT id, config_id, message, status, sent_at FROM notification_logs \
         ORDER BY sent_at DESC, id DESC LIMIT ?",
    )
    .bind(RECENT_NOTIFICATION_LOGS)
    .fetch_all(pool)
    .await?
    .iter()
    .map(NotificationLog::from_row)
    .collect();

    let recent_sql = format!(
        "SELECT {} FROM alerts ORDER BY write_time DESC, id DESC LIMIT ?",
        ALERT_COLUMNS
    );
    let recent_alerts: Vec<AlertRecord> = sqlx::query(&recent_sql)
        .bind(RECENT_ALERTS)
        .fetch_all(pool)
        .await?
        .iter()
        .map(AlertRecord::from_row)
        .collect();

    Ok(Overview {
        update_logs,
        stats: OverviewStats {
            total_alerts,
            today_alerts,
            enabled_configs,
            total_configs,
        },
        latest_batch: latest_success(pool).await?,
        notification_logs,
        recent_alerts,
    })
}

/// Probe the database. An error here means the service is unhealthy.
pub async fn health(pool: &SqlitePool, started: Instant) -> Result<HealthReport> {
    sqlx::query("SELECT 1").execute(pool).await?;

    let last_update = latest_success(pool).await?.map(|log| log.update_time);
    let alert_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts")
        .fetch_one(pool)
        .await?;

    Ok(HealthReport {
        status: "healthy",
        timestamp: Utc::now(),
        database: "connected",
        last_update,
        alert_count,
        uptime_secs: started.elapsed().as_secs(),
    })
}

/// CLI entry point for `alh status`.
pub async fn run_status(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = overview(&pool).await;
    pool.close().await;
    let overview = result?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Alert Harness status");
    println!("====================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Alerts:        {}", overview.stats.total_alerts);
    println!("  Today:         {}", overview.stats.today_alerts);
    println!(
        "  Configs:       {} enabled / {} total",
        overview.stats.enabled_configs, overview.stats.total_configs
    );

    match &overview.latest_batch {
        Some(batch) => println!(
            "  Last update:   {} ({}, {} records)",
            format_ts_relative(batch.update_time.timestamp()),
            batch.batch_id,
            batch.record_count
        ),
        None => println!("  Last update:   never"),
    }

    if !overview.notification_logs.is_empty() {
        println!();
        println!("  Recent notifications:");
        println!("  {:<8} {:<7} {:<16} {}", "CONFIG", "STATUS", "WHEN", "MESSAGE");
        println!("  {}", "-".repeat(76));
        for log in &overview.notification_logs {
            println!(
                "  {:<8} {:<7} {:<16} {}",
                log.config_id,
                log.status,
                format_ts_relative(log.sent_at.timestamp()),
                log.message
            );
        }
    }

    println!();
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// "3 hours ago" style rendering of a Unix timestamp.
fn format_ts_relative(ts: i64) -> String {
    let delta = Utc::now().timestamp() - ts;
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        format!("{} minutes ago", delta / 60)
    } else if delta < 86400 {
        format!("{} hours ago", delta / 3600)
    } else {
        format!("{} days ago", delta / 86400)
    }
}
