//! Notification dispatch.
//!
//! For every enabled config the new alerts are filtered through the rule
//! engine; configs with at least one match get a digest sent through every
//! channel they hold credentials for. Each channel attempt is isolated, and
//! exactly one `notification_logs` row is written per dispatched config.

use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::digest::Digest;
use crate::models::{AlertRecord, DeliveryStatus, NotificationConfig};
use crate::rules::Subscription;
use crate::subscriptions;
use crate::traits::Channel;

/// Per-channel result of one config's dispatch.
#[derive(Debug)]
pub struct ChannelOutcome {
    pub channel: String,
    pub error: Option<String>,
}

/// `sent` only when at least one channel was attempted and all succeeded.
pub fn overall_status(outcomes: &[ChannelOutcome]) -> DeliveryStatus {
    if !outcomes.is_empty() && outcomes.iter().all(|o| o.error.is_none()) {
        DeliveryStatus::Sent
    } else {
        DeliveryStatus::Failed
    }
}

/// Human-readable audit message summarising every channel outcome.
pub fn summarize(count: usize, outcomes: &[ChannelOutcome]) -> String {
    let mut message = format!("发送 {} 条新增预警通知", count);
    if outcomes.is_empty() {
        message.push_str("; no deliverable channel configured");
        return message;
    }
    for outcome in outcomes {
        match &outcome.error {
            None => message.push_str(&format!("; {}: ok", outcome.channel)),
            Some(e) => message.push_str(&format!("; {}: failed: {}", outcome.channel, e)),
        }
    }
    message
}

/// Try every configured channel for one config. Never fails.
pub async fn deliver_to(
    channels: &[Arc<dyn Channel>],
    config: &NotificationConfig,
    digest: &Digest,
) -> Vec<ChannelOutcome> {
    let mut outcomes = Vec::new();

    for channel in channels {
        if !channel.is_configured(config) {
            continue;
        }
        let error = match channel.deliver(config, digest).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(
                    config_id = config.id,
                    channel = channel.name(),
                    error = %e,
                    "Channel delivery failed"
                );
                Some(e.to_string())
            }
        };
        outcomes.push(ChannelOutcome {
            channel: channel.name().to_string(),
            error,
        });
    }

    outcomes
}

async fn record(
    pool: &SqlitePool,
    config_id: i64,
    message: &str,
    status: DeliveryStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO notification_logs (config_id, message, status, sent_at) VALUES (?, ?, ?, ?)",
    )
    .bind(config_id)
    .bind(message)
    .bind(status.as_str())
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

/// Dispatch `alerts` to every enabled config, sequentially.
///
/// Returns the number of configs that had matches and were dispatched.
pub async fn dispatch(
    pool: &SqlitePool,
    channels: &[Arc<dyn Channel>],
    settings: &DispatchConfig,
    alerts: &[AlertRecord],
) -> usize {
    if alerts.is_empty() {
        return 0;
    }

    let configs = match subscriptions::enabled_configs(pool).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load notification configs");
            return 0;
        }
    };

    let mut dispatched = 0;

    for config in configs {
        let rules = match subscriptions::list_rules(pool, Some(config.id)).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(config_id = config.id, error = %e, "Failed to load rules, skipping config");
                continue;
            }
        };

        let subscription = Subscription::new(config, &rules);
        let matched = subscription.select(alerts);
        if matched.is_empty() {
            tracing::debug!(config_id = subscription.config.id, "No alerts matched");
            continue;
        }

        let config = &subscription.config;
        let count = matched.len();
        let digest = Digest::new(
            settings.title.clone(),
            matched,
            settings.max_digest_items,
            settings.detail_url_prefix.clone(),
        );

        let outcomes = deliver_to(channels, config, &digest).await;
        let status = overall_status(&outcomes);
        let message = summarize(count, &outcomes);

        if let Err(e) = record(pool, config.id, &message, status).await {
            tracing::error!(config_id = config.id, error = %e, "Failed to write notification log");
        }

        tracing::info!(
            config_id = config.id,
            alerts = count,
            status = status.as_str(),
            "Notification dispatched"
        );
        dispatched += 1;
    }

    dispatched
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(channel: &str, error: Option<&str>) -> ChannelOutcome {
        ChannelOutcome {
            channel: channel.to_string(),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_status_requires_every_attempt_to_succeed() {
        assert_eq!(overall_status(&[outcome("push", None)]), DeliveryStatus::Sent);
        assert_eq!(
            overall_status(&[outcome("push", Some("boom")), outcome("email", None)]),
            DeliveryStatus::Failed
        );
        assert_eq!(overall_status(&[]), DeliveryStatus::Failed);
    }

    #[test]
    fn test_summary_lists_each_channel() {
        let msg = summarize(3, &[outcome("push", Some("HTTP 500")), outcome("email", None)]);
        assert!(msg.starts_with("发送 3 条新增预警通知"));
        assert!(msg.contains("push: failed: HTTP 500"));
        assert!(msg.contains("email: ok"));
    }
}
