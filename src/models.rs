//! Core data models used throughout alert-harness.
//!
//! These types represent the feed entries, stored alert batches, subscriber
//! configs and rules, and audit rows that flow through the ingestion and
//! notification pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt;
use std::str::FromStr;

/// Column list matching [`AlertRecord::from_row`].
pub(crate) const ALERT_COLUMNS: &str = "id, region, region_code, publish_time, type_code, type_name, \
     level_code, level_name, detail_link, longitude, latitude, batch_id, write_time";

/// Raw feed entry `(regionName, compoundLink, longitude, latitude)` before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAlert {
    pub region: String,
    pub link: String,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
}

/// Alert stored in SQLite. Immutable once written; identity is `detail_link`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub id: i64,
    pub region: String,
    pub region_code: String,
    /// Source-local wall-clock `YYYY-MM-DD HH:MM:SS`, never converted.
    pub publish_time: String,
    pub type_code: String,
    pub type_name: String,
    pub level_code: String,
    pub level_name: String,
    pub detail_link: String,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub batch_id: String,
    pub write_time: DateTime<Utc>,
}

impl AlertRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            region: row.get("region"),
            region_code: row.get("region_code"),
            publish_time: row.get("publish_time"),
            type_code: row.get("type_code"),
            type_name: row.get("type_name"),
            level_code: row.get("level_code"),
            level_name: row.get("level_name"),
            detail_link: row.get("detail_link"),
            longitude: row.get("longitude"),
            latitude: row.get("latitude"),
            batch_id: row.get("batch_id"),
            write_time: from_ts(row.get("write_time")),
        }
    }

    pub fn region_class(&self) -> Option<RegionLevel> {
        RegionLevel::classify(&self.region_code)
    }
}

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILURE: &str = "failure";

/// One row per committed batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionLog {
    pub id: i64,
    pub batch_id: String,
    pub record_count: i64,
    pub status: String,
    pub message: String,
    pub update_time: DateTime<Utc>,
}

impl IngestionLog {
    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            batch_id: row.get("batch_id"),
            record_count: row.get("record_count"),
            status: row.get("status"),
            message: row.get("message"),
            update_time: from_ts(row.get("update_time")),
        }
    }
}

/// A subscriber: delivery credentials, legacy flat filters, and (via
/// `alert_rules`) zero or more structured rules.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    pub id: i64,
    pub send_key: String,
    pub email: String,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_secure: bool,
    pub smtp_user: Option<String>,
    #[serde(skip_serializing)]
    pub smtp_password: Option<String>,
    /// Comma-joined region codes (exact or prefix match).
    pub region_codes: String,
    /// Comma-joined disaster-type names.
    pub level_types: String,
    /// Comma-joined severity-level names.
    pub alert_levels: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationConfig {
    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        let port: Option<i64> = row.get("smtp_port");
        Self {
            id: row.get("id"),
            send_key: row.get("send_key"),
            email: row.get("email"),
            smtp_host: row.get("smtp_host"),
            smtp_port: port.and_then(|p| u16::try_from(p).ok()),
            smtp_secure: row.get("smtp_secure"),
            smtp_user: row.get("smtp_user"),
            smtp_password: row.get("smtp_password"),
            region_codes: row.get("region_codes"),
            level_types: row.get("level_types"),
            alert_levels: row.get("alert_levels"),
            enabled: row.get("enabled"),
            created_at: from_ts(row.get("created_at")),
            updated_at: from_ts(row.get("updated_at")),
        }
    }

    pub fn has_push(&self) -> bool {
        !self.send_key.trim().is_empty()
    }

    /// Email is deliverable only with an address and full SMTP credentials.
    pub fn has_smtp(&self) -> bool {
        !self.email.trim().is_empty()
            && non_blank(&self.smtp_host)
            && non_blank(&self.smtp_user)
            && non_blank(&self.smtp_password)
    }
}

fn non_blank(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    RegionalLevel,
    Regional,
    Level,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::RegionalLevel => "regional_level",
            RuleType::Regional => "regional",
            RuleType::Level => "level",
        }
    }
}

impl FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regional_level" => Ok(RuleType::RegionalLevel),
            "regional" => Ok(RuleType::Regional),
            "level" => Ok(RuleType::Level),
            other => Err(format!(
                "invalid rule type '{}': must be regional_level, regional, or level",
                other
            )),
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provincial vs. city granularity, inferred from region-code length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionLevel {
    Provincial,
    City,
}

impl RegionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionLevel::Provincial => "provincial",
            RegionLevel::City => "city",
        }
    }

    /// Five-character codes are provincial, seven-character codes are city.
    pub fn classify(region_code: &str) -> Option<RegionLevel> {
        match region_code.chars().count() {
            5 => Some(RegionLevel::Provincial),
            7 => Some(RegionLevel::City),
            _ => None,
        }
    }
}

impl FromStr for RegionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provincial" => Ok(RegionLevel::Provincial),
            "city" => Ok(RegionLevel::City),
            other => Err(format!(
                "invalid region level '{}': must be provincial or city",
                other
            )),
        }
    }
}

/// Stored rule row. `rule_type` and `conditions` are kept as stored; the
/// rule engine compiles them into typed criteria.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub id: i64,
    pub config_id: i64,
    pub rule_type: String,
    pub target_level: Option<String>,
    pub alert_type: Option<String>,
    pub region_code: Option<String>,
    pub region_level: Option<String>,
    pub conditions: Option<String>,
    pub enabled: bool,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
}

impl AlertRule {
    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            config_id: row.get("config_id"),
            rule_type: row.get("rule_type"),
            target_level: row.get("target_level"),
            alert_type: row.get("alert_type"),
            region_code: row.get("region_code"),
            region_level: row.get("region_level"),
            conditions: row.get("conditions"),
            enabled: row.get("enabled"),
            sort_order: row.get("sort_order"),
            created_at: from_ts(row.get("created_at")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// Append-only audit row, one per config per dispatch attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationLog {
    pub id: i64,
    pub config_id: i64,
    pub message: String,
    pub status: String,
    pub sent_at: DateTime<Utc>,
}

impl NotificationLog {
    pub(crate) fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            config_id: row.get("config_id"),
            message: row.get("message"),
            status: row.get("status"),
            sent_at: from_ts(row.get("sent_at")),
        }
    }
}

pub(crate) fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}
