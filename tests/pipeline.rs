//! End-to-end cycle tests against a temporary SQLite database with in-memory
//! feed and channel implementations.

use alert_harness::config::{DispatchConfig, RetentionConfig};
use alert_harness::db;
use alert_harness::digest::Digest;
use alert_harness::error::{ChannelDeliveryError, CycleError};
use alert_harness::migrate;
use alert_harness::models::{NotificationConfig, RawAlert};
use alert_harness::pipeline::{Pipeline, PipelineSettings};
use alert_harness::retention;
use alert_harness::subscriptions::{self, ConfigInput, NewRule};
use alert_harness::traits::{Channel, FeedSource};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;

// ============ Fakes ============

/// Feed that returns whatever entries are currently loaded.
struct StaticFeed {
    entries: Mutex<Vec<RawAlert>>,
}

impl StaticFeed {
    fn new(links: &[&str]) -> Arc<Self> {
        let feed = Arc::new(Self {
            entries: Mutex::new(Vec::new()),
        });
        feed.load(links);
        feed
    }

    fn load(&self, links: &[&str]) {
        *self.entries.lock().unwrap() = links.iter().map(|l| raw(l)).collect();
    }
}

#[async_trait]
impl FeedSource for StaticFeed {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self) -> Result<Vec<RawAlert>, CycleError> {
        Ok(self.entries.lock().unwrap().clone())
    }
}

/// Feed that blocks until released, to hold the single-flight guard.
struct GatedFeed {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl FeedSource for GatedFeed {
    fn name(&self) -> &str {
        "gated"
    }

    async fn fetch(&self) -> Result<Vec<RawAlert>, CycleError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(vec![raw("10101-20240101120000-0204")])
    }
}

struct FailingFeed;

#[async_trait]
impl FeedSource for FailingFeed {
    fn name(&self) -> &str {
        "failing"
    }

    async fn fetch(&self) -> Result<Vec<RawAlert>, CycleError> {
        Err(CycleError::FetchStatus(503))
    }
}

/// Channel that records every digest it is asked to deliver.
struct RecordingChannel {
    name: &'static str,
    fail: bool,
    needs_email: bool,
    delivered: Mutex<Vec<(i64, usize)>>,
}

impl RecordingChannel {
    fn new(name: &'static str, fail: bool, needs_email: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail,
            needs_email,
            delivered: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(i64, usize)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        self.name
    }

    fn is_configured(&self, config: &NotificationConfig) -> bool {
        if self.needs_email {
            config.has_smtp()
        } else {
            config.has_push()
        }
    }

    async fn deliver(
        &self,
        config: &NotificationConfig,
        digest: &Digest,
    ) -> Result<(), ChannelDeliveryError> {
        self.delivered
            .lock()
            .unwrap()
            .push((config.id, digest.count()));
        if self.fail {
            Err(ChannelDeliveryError::HttpStatus(500))
        } else {
            Ok(())
        }
    }
}

// ============ Helpers ============

fn raw(link: &str) -> RawAlert {
    RawAlert {
        region: format!("region-{}", link),
        link: link.to_string(),
        longitude: Some(116.4),
        latitude: None,
    }
}

async fn setup_db() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("alh.sqlite")).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    (tmp, pool)
}

fn pipeline(
    pool: &SqlitePool,
    source: Arc<dyn FeedSource>,
    channels: Vec<Arc<dyn Channel>>,
) -> Pipeline {
    Pipeline::new(pool.clone(), source, channels, PipelineSettings::default())
}

async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn push_config(pool: &SqlitePool, alert_levels: &str) -> i64 {
    subscriptions::create_config(
        pool,
        &ConfigInput {
            send_key: Some("SCT123".to_string()),
            alert_levels: Some(alert_levels.to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap()
    .id
}

// ============ Ingestion ============

#[tokio::test]
async fn test_cycle_commits_batch_and_log() {
    let (_tmp, pool) = setup_db().await;
    let feed = StaticFeed::new(&[
        "101010100-20240101120000-0102",
        "10101-20240101130000-0204",
    ]);
    let p = pipeline(&pool, feed, vec![]);

    let report = p.trigger().await.unwrap();
    assert_eq!(report.inserted_count, 2);
    assert_eq!(report.total_records, 2);
    assert_eq!(report.new_count, 2);
    assert_eq!(report.notified_configs, 0);

    let row = sqlx::query("SELECT batch_id, record_count, status FROM ingestion_logs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.get::<String, _>("batch_id"), report.batch_id);
    assert_eq!(row.get::<i64, _>("record_count"), 2);
    assert_eq!(row.get::<String, _>("status"), "success");

    let names: Vec<(String, String)> =
        sqlx::query("SELECT type_name, level_name FROM alerts ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap()
            .iter()
            .map(|r| (r.get("type_name"), r.get("level_name")))
            .collect();
    assert_eq!(
        names,
        vec![
            ("台风".to_string(), "黄色".to_string()),
            ("暴雨".to_string(), "红色".to_string())
        ]
    );
}

#[tokio::test]
async fn test_bad_record_rolls_back_whole_batch() {
    let (_tmp, pool) = setup_db().await;
    let feed = StaticFeed::new(&[
        "10101-20240101120000-0204",
        "10102-20240101120000-0204",
        "malformed-link",
        "10103-20240101120000-0204",
    ]);
    let p = pipeline(&pool, feed, vec![]);

    let err = p.trigger().await.unwrap_err();
    assert!(matches!(err, CycleError::Parse(_)));
    assert_eq!(count(&pool, "alerts").await, 0);
    assert_eq!(count(&pool, "ingestion_logs").await, 0);
}

#[tokio::test]
async fn test_fetch_failure_writes_nothing() {
    let (_tmp, pool) = setup_db().await;
    let p = pipeline(&pool, Arc::new(FailingFeed), vec![]);

    let err = p.trigger().await.unwrap_err();
    assert_eq!(err.kind(), "fetch_error");
    assert_eq!(count(&pool, "alerts").await, 0);
    assert_eq!(count(&pool, "ingestion_logs").await, 0);
}

#[tokio::test]
async fn test_empty_feed_is_a_successful_empty_batch() {
    let (_tmp, pool) = setup_db().await;
    let p = pipeline(&pool, StaticFeed::new(&[]), vec![]);

    let report = p.trigger().await.unwrap();
    assert_eq!(report.inserted_count, 0);
    assert_eq!(report.new_count, 0);
    assert_eq!(count(&pool, "ingestion_logs").await, 1);
}

// ============ Diff ============

#[tokio::test]
async fn test_repeat_alerts_are_not_new() {
    let (_tmp, pool) = setup_db().await;
    let feed = StaticFeed::new(&["10101-20240101120000-0204", "10102-20240101120000-0204"]);
    let p = pipeline(&pool, feed.clone(), vec![]);

    assert_eq!(p.trigger().await.unwrap().new_count, 2);
    assert_eq!(p.trigger().await.unwrap().new_count, 0);

    feed.load(&[
        "10101-20240101120000-0204",
        "10102-20240101120000-0204",
        "10103-20240101120000-0204",
    ]);
    let report = p.trigger().await.unwrap();
    assert_eq!(report.new_count, 1);
    assert_eq!(report.total_records, 7);
}

// ============ Retention ============

async fn insert_alert_at(pool: &SqlitePool, link: &str, write_time: i64) {
    sqlx::query(
        "INSERT INTO alerts (region, region_code, publish_time, type_code, type_name, level_code, \
         level_name, detail_link, batch_id, write_time) \
         VALUES ('r', '10101', '2024-01-01 12:00:00', '02', '暴雨', '04', '红色', ?, 'old', ?)",
    )
    .bind(link)
    .bind(write_time)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn test_retention_window_boundary() {
    let (_tmp, pool) = setup_db().await;
    let now = Utc::now();

    let expired = now - Duration::days(7) - Duration::minutes(1);
    let kept = now - Duration::days(6) - Duration::hours(23);
    insert_alert_at(&pool, "expired", expired.timestamp()).await;
    insert_alert_at(&pool, "kept", kept.timestamp()).await;

    let summary = retention::prune(&pool, now, &RetentionConfig::default()).await;
    assert_eq!(summary.alerts_deleted, 1);

    let links: Vec<String> = sqlx::query_scalar("SELECT detail_link FROM alerts")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(links, vec!["kept".to_string()]);
}

#[tokio::test]
async fn test_ingestion_logs_trimmed_to_most_recent() {
    let (_tmp, pool) = setup_db().await;
    let base = Utc::now().timestamp();

    for i in 0..35i64 {
        sqlx::query(
            "INSERT INTO ingestion_logs (batch_id, record_count, status, message, update_time) \
             VALUES (?, 0, 'success', '', ?)",
        )
        .bind(format!("b{}", i))
        .bind(base - 1000 + i)
        .execute(&pool)
        .await
        .unwrap();
    }

    let deleted = retention::trim_ingestion_logs(&pool, 30).await.unwrap();
    assert_eq!(deleted, 5);

    let oldest: String =
        sqlx::query_scalar("SELECT batch_id FROM ingestion_logs ORDER BY update_time ASC LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(oldest, "b5");
}

// ============ Rules + dispatch ============

#[tokio::test]
async fn test_legacy_filters_gate_dispatch() {
    let (_tmp, pool) = setup_db().await;
    let config_id = push_config(&pool, "红色").await;

    let push = RecordingChannel::new("push", false, false);
    let feed = StaticFeed::new(&[
        "10101-20240101120000-0204", // 红色
        "10102-20240101120000-0202", // 黄色
    ]);
    let p = pipeline(&pool, feed, vec![push.clone()]);

    let report = p.trigger().await.unwrap();
    assert_eq!(report.notified_configs, 1);
    assert_eq!(push.calls(), vec![(config_id, 1)]);

    let status: String = sqlx::query_scalar("SELECT status FROM notification_logs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "sent");
}

#[tokio::test]
async fn test_first_matching_rule_includes_alert_once() {
    let (_tmp, pool) = setup_db().await;
    let config_id = push_config(&pool, "").await;

    for level in ["蓝色", "黄色"] {
        subscriptions::create_rule(
            &pool,
            &NewRule {
                config_id,
                rule_type: "level".to_string(),
                target_level: None,
                alert_type: None,
                region_code: None,
                region_level: None,
                conditions: Some(serde_json::json!({ "targetLevels": [level] })),
                enabled: Some(true),
                sort_order: None,
            },
        )
        .await
        .unwrap();
    }

    let push = RecordingChannel::new("push", false, false);
    let feed = StaticFeed::new(&[
        "10101-20240101120000-0202", // 黄色
        "10102-20240101120000-0204", // 红色
    ]);
    let p = pipeline(&pool, feed, vec![push.clone()]);

    p.trigger().await.unwrap();
    assert_eq!(push.calls(), vec![(config_id, 1)]);
}

#[tokio::test]
async fn test_push_failure_does_not_block_email() {
    let (_tmp, pool) = setup_db().await;
    let config = subscriptions::create_config(
        &pool,
        &ConfigInput {
            send_key: Some("SCT123".to_string()),
            email: Some("ops@example.com".to_string()),
            smtp_host: Some("smtp.example.com".to_string()),
            smtp_user: Some("bot@example.com".to_string()),
            smtp_password: Some("secret".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let push = RecordingChannel::new("push", true, false);
    let email = RecordingChannel::new("email", false, true);
    let feed = StaticFeed::new(&["10101-20240101120000-0204"]);
    let p = pipeline(&pool, feed, vec![push.clone(), email.clone()]);

    let report = p.trigger().await.unwrap();
    assert_eq!(report.notified_configs, 1);
    assert_eq!(push.calls().len(), 1);
    assert_eq!(email.calls(), vec![(config.id, 1)]);

    let rows = sqlx::query("SELECT config_id, status, message FROM notification_logs")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<i64, _>("config_id"), config.id);
    assert_eq!(rows[0].get::<String, _>("status"), "failed");
    let message: String = rows[0].get("message");
    assert!(message.contains("push: failed"));
    assert!(message.contains("email: ok"));
}

#[tokio::test]
async fn test_disabled_config_is_skipped() {
    let (_tmp, pool) = setup_db().await;
    subscriptions::create_config(
        &pool,
        &ConfigInput {
            send_key: Some("SCT123".to_string()),
            enabled: Some(false),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let push = RecordingChannel::new("push", false, false);
    let p = pipeline(&pool, StaticFeed::new(&["10101-20240101120000-0204"]), vec![push.clone()]);

    let report = p.trigger().await.unwrap();
    assert_eq!(report.notified_configs, 0);
    assert!(push.calls().is_empty());
    assert_eq!(count(&pool, "notification_logs").await, 0);
}

#[tokio::test]
async fn test_no_new_alerts_means_no_dispatch() {
    let (_tmp, pool) = setup_db().await;
    push_config(&pool, "").await;

    let push = RecordingChannel::new("push", false, false);
    let p = pipeline(&pool, StaticFeed::new(&["10101-20240101120000-0204"]), vec![push.clone()]);

    p.trigger().await.unwrap();
    p.trigger().await.unwrap();
    assert_eq!(push.calls().len(), 1);
    assert_eq!(count(&pool, "notification_logs").await, 1);
}

// ============ Single flight ============

#[tokio::test]
async fn test_overlapping_trigger_fails_fast() {
    let (_tmp, pool) = setup_db().await;
    let feed = Arc::new(GatedFeed {
        entered: Notify::new(),
        release: Notify::new(),
    });
    let p = Arc::new(pipeline(&pool, feed.clone(), vec![]));

    let first = {
        let p = Arc::clone(&p);
        tokio::spawn(async move { p.trigger().await })
    };

    feed.entered.notified().await;
    assert!(p.is_busy());
    let err = p.trigger().await.unwrap_err();
    assert!(matches!(err, CycleError::AlreadyRunning));

    feed.release.notify_one();
    let report = first.await.unwrap().unwrap();
    assert_eq!(report.inserted_count, 1);
    assert!(!p.is_busy());
}

#[tokio::test]
async fn test_dispatch_settings_cap_digest() {
    let (_tmp, pool) = setup_db().await;
    push_config(&pool, "").await;

    let links: Vec<String> = (0..12)
        .map(|i| format!("101{:02}-20240101120000-0204", i))
        .collect();
    let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();

    let push = RecordingChannel::new("push", false, false);
    let settings = PipelineSettings {
        dispatch: DispatchConfig {
            max_digest_items: 5,
            ..DispatchConfig::default()
        },
        ..PipelineSettings::default()
    };
    let p = Pipeline::new(pool.clone(), StaticFeed::new(&link_refs), vec![push.clone()], settings);

    p.trigger().await.unwrap();
    // The digest carries every match; rendering caps what is shown.
    assert_eq!(push.calls()[0].1, 12);
}
