//! One ingestion cycle, end to end.
//!
//! ```text
//! fetch ──▶ ingest (tx) ──▶ retention ──▶ diff ──▶ rules ──▶ dispatch
//! ```
//!
//! Only fetch and ingest can fail the cycle. Everything after commit is
//! best-effort and reported through logs and the notification audit trail.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::channel_email::EmailChannel;
use crate::channel_push::PushChannel;
use crate::config::{Config, DiffConfig, DispatchConfig, RetentionConfig};
use crate::connector_feed::HttpFeed;
use crate::db;
use crate::diff;
use crate::dispatch;
use crate::error::CycleError;
use crate::ingest;
use crate::retention;
use crate::traits::{Channel, FeedSource};

/// Result of a successful cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub batch_id: String,
    pub inserted_count: usize,
    pub total_records: usize,
    pub deleted_count: u64,
    pub new_count: usize,
    pub notified_configs: usize,
}

/// Post-commit settings.
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub retention: RetentionConfig,
    pub diff: DiffConfig,
    pub dispatch: DispatchConfig,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            retention: config.retention.clone(),
            diff: config.diff.clone(),
            dispatch: config.dispatch.clone(),
        }
    }
}

pub struct Pipeline {
    pool: SqlitePool,
    source: Arc<dyn FeedSource>,
    channels: Vec<Arc<dyn Channel>>,
    settings: PipelineSettings,
    guard: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        pool: SqlitePool,
        source: Arc<dyn FeedSource>,
        channels: Vec<Arc<dyn Channel>>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            pool,
            source,
            channels,
            settings,
            guard: Mutex::new(()),
        }
    }

    /// Production wiring: HTTP feed plus push and email channels.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let source = HttpFeed::new(&config.feed).context("Failed to build feed client")?;
        let push = PushChannel::new(&config.dispatch).context("Failed to build push client")?;
        let email = EmailChannel::new(&config.dispatch);

        Ok(Self::new(
            pool,
            Arc::new(source),
            vec![Arc::new(push), Arc::new(email)],
            PipelineSettings::from(config),
        ))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Whether a cycle currently holds the guard.
    pub fn is_busy(&self) -> bool {
        self.guard.try_lock().is_err()
    }

    /// Run one cycle, or fail fast with [`CycleError::AlreadyRunning`].
    pub async fn trigger(&self) -> Result<CycleReport, CycleError> {
        let _running = self.guard.try_lock().map_err(|_| CycleError::AlreadyRunning)?;

        let started = std::time::Instant::now();
        match self.run_cycle().await {
            Ok(report) => {
                tracing::info!(
                    batch_id = %report.batch_id,
                    inserted = report.inserted_count,
                    deleted = report.deleted_count,
                    new = report.new_count,
                    notified = report.notified_configs,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Cycle complete"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(kind = e.kind(), error = %e, source = self.source.name(), "Cycle failed");
                Err(e)
            }
        }
    }

    async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let entries = self.source.fetch().await?;
        let now = Utc::now();
        let batch = ingest::ingest_batch(&self.pool, &entries, now).await?;

        let pruned = retention::prune(&self.pool, now, &self.settings.retention).await;

        let total_records: usize = match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM alerts")
            .fetch_one(&self.pool)
            .await
        {
            Ok(n) => n as usize,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to count alerts");
                0
            }
        };

        let mut report = CycleReport {
            batch_id: batch.batch_id.clone(),
            inserted_count: batch.inserted_count,
            total_records,
            deleted_count: pruned.alerts_deleted,
            new_count: 0,
            notified_configs: 0,
        };

        let fresh = match diff::new_alerts(&self.pool, &batch.batch_id, self.settings.diff.prior_sample).await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(batch_id = %batch.batch_id, error = %e, "Diff failed, skipping notifications");
                return Ok(report);
            }
        };

        report.new_count = fresh.len();
        if fresh.is_empty() {
            tracing::debug!(batch_id = %batch.batch_id, "No new alerts");
            return Ok(report);
        }

        report.notified_configs =
            dispatch::dispatch(&self.pool, &self.channels, &self.settings.dispatch, &fresh).await;

        Ok(report)
    }
}
