//! Post-commit housekeeping: age out old alerts and trim ingestion history.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::config::RetentionConfig;
use crate::error::HousekeepingError;

/// Outcome of one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneSummary {
    pub alerts_deleted: u64,
    pub logs_deleted: u64,
}

/// Delete alerts written more than `window_days` before `now`.
pub async fn prune_alerts(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    window_days: i64,
) -> Result<u64, HousekeepingError> {
    let cutoff = (now - Duration::days(window_days)).timestamp();
    let result = sqlx::query("DELETE FROM alerts WHERE write_time < ?")
        .bind(cutoff)
        .execute(pool)
        .await
        .map_err(|source| HousekeepingError {
            stage: "alert retention",
            source,
        })?;
    Ok(result.rows_affected())
}

/// Keep the `keep` most recent ingestion logs; delete everything past that offset.
pub async fn trim_ingestion_logs(pool: &SqlitePool, keep: i64) -> Result<u64, HousekeepingError> {
    let result = sqlx::query(
        r#"
        DELETE FROM ingestion_logs WHERE id IN (
            SELECT id FROM ingestion_logs
            ORDER BY update_time DESC, id DESC
            LIMIT -1 OFFSET ?
        )
        "#,
    )
    .bind(keep)
    .execute(pool)
    .await
    .map_err(|source| HousekeepingError {
        stage: "ingestion log trim",
        source,
    })?;
    Ok(result.rows_affected())
}

/// Run both steps. Each is independent; a failure is logged and the other
/// step still runs.
pub async fn prune(pool: &SqlitePool, now: DateTime<Utc>, config: &RetentionConfig) -> PruneSummary {
    let mut summary = PruneSummary::default();

    match prune_alerts(pool, now, config.window_days).await {
        Ok(n) => summary.alerts_deleted = n,
        Err(e) => tracing::warn!(error = %e, "Retention step failed"),
    }

    match trim_ingestion_logs(pool, config.keep_ingestion_logs).await {
        Ok(n) => summary.logs_deleted = n,
        Err(e) => tracing::warn!(error = %e, "Retention step failed"),
    }

    if summary.alerts_deleted > 0 || summary.logs_deleted > 0 {
        tracing::info!(
            alerts_deleted = summary.alerts_deleted,
            logs_deleted = summary.logs_deleted,
            "Retention pass complete"
        );
    }

    summary
}
