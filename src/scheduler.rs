//! Periodic trigger for the ingestion pipeline.
//!
//! [`Scheduler`] is an owned service: `start` spawns the loop (one cycle
//! immediately, then one per interval), `stop` signals it and awaits the
//! task, and `status` reports the current state. A tick that lands while a
//! manual trigger is running is skipped by the pipeline's single-flight guard.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::error::CycleError;
use crate::pipeline::Pipeline;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub is_running: bool,
    #[serde(rename = "interval")]
    pub interval_ms: u64,
    pub next_update: Option<DateTime<Utc>>,
}

struct Running {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

pub struct Scheduler {
    period: Duration,
    running: Mutex<Option<Running>>,
    next_update: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl Scheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            running: Mutex::new(None),
            next_update: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the loop. Returns `false` if it is already running.
    pub fn start(&self, pipeline: Arc<Pipeline>) -> bool {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if running.is_some() {
            tracing::warn!("Scheduler is already running");
            return false;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = self.period;
        let next_update = Arc::clone(&self.next_update);

        let handle = tokio::spawn(async move {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        set_next(&next_update, Some(next_time(period)));
                        match pipeline.trigger().await {
                            Ok(_) => {}
                            Err(CycleError::AlreadyRunning) => {
                                tracing::info!("Cycle already in progress, skipping tick");
                            }
                            Err(e) => {
                                tracing::error!(kind = e.kind(), error = %e, "Scheduled cycle failed");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }

            set_next(&next_update, None);
        });

        tracing::info!(interval_secs = self.period.as_secs(), "Scheduler started");
        *running = Some(Running { handle, shutdown });
        true
    }

    /// Signal the loop and wait for it to exit. A cycle in flight finishes
    /// first.
    pub async fn stop(&self) {
        let running = match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(Running { handle, shutdown }) = running {
            let _ = shutdown.send(true);
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Scheduler task ended abnormally");
            }
            tracing::info!("Scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        match self.running.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let is_running = self.is_running();
        let next_update = if is_running {
            match self.next_update.lock() {
                Ok(guard) => *guard,
                Err(poisoned) => *poisoned.into_inner(),
            }
        } else {
            None
        };

        SchedulerStatus {
            is_running,
            interval_ms: self.period.as_millis() as u64,
            next_update,
        }
    }
}

fn next_time(period: Duration) -> DateTime<Utc> {
    let step = chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() + step
}

fn set_next(slot: &Mutex<Option<DateTime<Utc>>>, value: Option<DateTime<Utc>>) {
    match slot.lock() {
        Ok(mut guard) => *guard = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawAlert;
    use crate::pipeline::PipelineSettings;
    use crate::traits::FeedSource;
    use async_trait::async_trait;

    struct EmptyFeed;

    #[async_trait]
    impl FeedSource for EmptyFeed {
        fn name(&self) -> &str {
            "empty"
        }

        async fn fetch(&self) -> Result<Vec<RawAlert>, CycleError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("alh.sqlite"))
            .await
            .unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        let pipeline = Arc::new(Pipeline::new(
            pool,
            Arc::new(EmptyFeed),
            vec![],
            PipelineSettings::default(),
        ));

        let scheduler = Scheduler::new(Duration::from_secs(3600));
        let status = scheduler.status();
        assert!(!status.is_running);
        assert_eq!(status.interval_ms, 3_600_000);
        assert!(status.next_update.is_none());

        assert!(scheduler.start(Arc::clone(&pipeline)));
        assert!(!scheduler.start(Arc::clone(&pipeline)));
        assert!(scheduler.is_running());

        scheduler.stop().await;
        assert!(!scheduler.is_running());
        assert!(scheduler.status().next_update.is_none());

        // Stopping twice is a no-op.
        scheduler.stop().await;
    }
}
