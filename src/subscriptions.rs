//! Subscriber management: CRUD over notification configs and alert rules.
//!
//! All writes go through validation here so the rule engine only ever sees
//! configs that can be delivered to and rules whose conditions are stored as
//! canonical single-encoded JSON.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::error::SubscriptionError;
use crate::models::{AlertRule, NotificationConfig, RegionLevel, RuleType};
use crate::rules::{self, RuleConditions, StringList};

const CONFIG_COLUMNS: &str = "id, send_key, email, smtp_host, smtp_port, smtp_secure, smtp_user, \
     smtp_password, region_codes, level_types, alert_levels, enabled, created_at, updated_at";

const RULE_COLUMNS: &str = "id, config_id, rule_type, target_level, alert_type, region_code, \
     region_level, conditions, enabled, sort_order, created_at";

/// Create/replace payload for a notification config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInput {
    pub send_key: Option<String>,
    pub email: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_secure: Option<bool>,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub region_codes: Option<String>,
    pub level_types: Option<String>,
    pub alert_levels: Option<String>,
    pub enabled: Option<bool>,
}

/// Create payload for a rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRule {
    pub config_id: i64,
    pub rule_type: String,
    pub target_level: Option<String>,
    pub alert_type: Option<String>,
    pub region_code: Option<String>,
    pub region_level: Option<String>,
    /// Object, or a string holding one JSON-encoded object.
    pub conditions: Option<Value>,
    pub enabled: Option<bool>,
    pub sort_order: Option<i64>,
}

/// Partial update for a rule. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    pub rule_type: Option<String>,
    pub target_level: Option<String>,
    pub alert_type: Option<String>,
    pub region_code: Option<String>,
    pub region_level: Option<String>,
    pub conditions: Option<Value>,
    pub enabled: Option<bool>,
    pub sort_order: Option<i64>,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn validate_config(input: &ConfigInput) -> Result<(), SubscriptionError> {
    if non_blank(&input.send_key).is_none() && non_blank(&input.email).is_none() {
        return Err(SubscriptionError::Invalid(
            "at least one of sendKey or email is required".to_string(),
        ));
    }
    if non_blank(&input.smtp_host).is_some()
        && (non_blank(&input.smtp_user).is_none() || non_blank(&input.smtp_password).is_none())
    {
        return Err(SubscriptionError::Invalid(
            "smtpHost requires smtpUser and smtpPassword".to_string(),
        ));
    }
    Ok(())
}

// ============ Configs ============

/// All configs, newest first.
pub async fn list_configs(pool: &SqlitePool) -> Result<Vec<NotificationConfig>, SubscriptionError> {
    let sql = format!("SELECT {} FROM notification_configs ORDER BY id DESC", CONFIG_COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    Ok(rows.iter().map(NotificationConfig::from_row).collect())
}

/// Enabled configs in dispatch order (oldest first).
pub async fn enabled_configs(
    pool: &SqlitePool,
) -> Result<Vec<NotificationConfig>, SubscriptionError> {
    let sql = format!(
        "SELECT {} FROM notification_configs WHERE enabled = 1 ORDER BY id ASC",
        CONFIG_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    Ok(rows.iter().map(NotificationConfig::from_row).collect())
}

pub async fn get_config(pool: &SqlitePool, id: i64) -> Result<NotificationConfig, SubscriptionError> {
    let sql = format!("SELECT {} FROM notification_configs WHERE id = ?", CONFIG_COLUMNS);
    sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(|row| NotificationConfig::from_row(&row))
        .ok_or_else(|| SubscriptionError::NotFound(format!("config {}", id)))
}

pub async fn create_config(
    pool: &SqlitePool,
    input: &ConfigInput,
) -> Result<NotificationConfig, SubscriptionError> {
    validate_config(input)?;
    let now = Utc::now().timestamp();

    let result = sqlx::query(
        r#"
        INSERT INTO notification_configs (send_key, email, smtp_host, smtp_port, smtp_secure,
                                          smtp_user, smtp_password, region_codes, level_types,
                                          alert_levels, enabled, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(non_blank(&input.send_key).unwrap_or_default())
    .bind(non_blank(&input.email).unwrap_or_default())
    .bind(non_blank(&input.smtp_host))
    .bind(input.smtp_port.map(i64::from))
    .bind(input.smtp_secure.unwrap_or(true))
    .bind(non_blank(&input.smtp_user))
    .bind(non_blank(&input.smtp_password))
    .bind(input.region_codes.clone().unwrap_or_default())
    .bind(input.level_types.clone().unwrap_or_default())
    .bind(input.alert_levels.clone().unwrap_or_default())
    .bind(input.enabled.unwrap_or(true))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let id = result.last_insert_rowid();
    tracing::info!(config_id = id, "Notification config created");
    get_config(pool, id).await
}

/// Full replacement; omitted optional fields reset to their defaults.
pub async fn update_config(
    pool: &SqlitePool,
    id: i64,
    input: &ConfigInput,
) -> Result<NotificationConfig, SubscriptionError> {
    validate_config(input)?;

    let result = sqlx::query(
        r#"
        UPDATE notification_configs SET
            send_key = ?, email = ?, smtp_host = ?, smtp_port = ?, smtp_secure = ?,
            smtp_user = ?, smtp_password = ?, region_codes = ?, level_types = ?,
            alert_levels = ?, enabled = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(non_blank(&input.send_key).unwrap_or_default())
    .bind(non_blank(&input.email).unwrap_or_default())
    .bind(non_blank(&input.smtp_host))
    .bind(input.smtp_port.map(i64::from))
    .bind(input.smtp_secure.unwrap_or(true))
    .bind(non_blank(&input.smtp_user))
    .bind(non_blank(&input.smtp_password))
    .bind(input.region_codes.clone().unwrap_or_default())
    .bind(input.level_types.clone().unwrap_or_default())
    .bind(input.alert_levels.clone().unwrap_or_default())
    .bind(input.enabled.unwrap_or(true))
    .bind(Utc::now().timestamp())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(SubscriptionError::NotFound(format!("config {}", id)));
    }
    get_config(pool, id).await
}

/// Delete a config and, through the foreign key, all of its rules.
pub async fn delete_config(pool: &SqlitePool, id: i64) -> Result<(), SubscriptionError> {
    let result = sqlx::query("DELETE FROM notification_configs WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(SubscriptionError::NotFound(format!("config {}", id)));
    }
    tracing::info!(config_id = id, "Notification config deleted");
    Ok(())
}

// ============ Rules ============

/// Rules in evaluation order, for one config or for all configs.
pub async fn list_rules(
    pool: &SqlitePool,
    config_id: Option<i64>,
) -> Result<Vec<AlertRule>, SubscriptionError> {
    let rows = match config_id {
        Some(cid) => {
            let sql = format!(
                "SELECT {} FROM alert_rules WHERE config_id = ? ORDER BY sort_order ASC, id ASC",
                RULE_COLUMNS
            );
            sqlx::query(&sql).bind(cid).fetch_all(pool).await?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM alert_rules ORDER BY config_id ASC, sort_order ASC, id ASC",
                RULE_COLUMNS
            );
            sqlx::query(&sql).fetch_all(pool).await?
        }
    };
    Ok(rows.iter().map(AlertRule::from_row).collect())
}

pub async fn get_rule(pool: &SqlitePool, id: i64) -> Result<AlertRule, SubscriptionError> {
    let sql = format!("SELECT {} FROM alert_rules WHERE id = ?", RULE_COLUMNS);
    sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(|row| AlertRule::from_row(&row))
        .ok_or_else(|| SubscriptionError::NotFound(format!("rule {}", id)))
}

/// Normalise an incoming conditions value to canonical JSON text.
///
/// A string is treated as one layer of encoding and unwrapped. The result
/// must decode as a conditions object.
pub fn canonical_conditions(value: &Value) -> Result<Option<String>, SubscriptionError> {
    let object = match value {
        Value::Null => return Ok(None),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => serde_json::from_str::<Value>(s)
            .map_err(|e| SubscriptionError::Invalid(format!("conditions: {}", e)))?,
        other => other.clone(),
    };

    if !object.is_object() {
        return Err(SubscriptionError::Invalid(
            "conditions must be a JSON object".to_string(),
        ));
    }
    serde_json::from_value::<RuleConditions>(object.clone())
        .map_err(|e| SubscriptionError::Invalid(format!("conditions: {}", e)))?;

    Ok(Some(object.to_string()))
}

/// Resolved rule fields, checked against the per-type requirements.
struct RuleFields {
    rule_type: RuleType,
    target_level: Option<String>,
    alert_type: Option<String>,
    region_code: Option<String>,
    region_level: Option<String>,
    conditions: Option<String>,
}

impl RuleFields {
    fn validate(&self) -> Result<(), SubscriptionError> {
        let parsed = match &self.conditions {
            Some(raw) => rules::decode_conditions(0, raw)
                .map_err(|e| SubscriptionError::Invalid(e.reason))?,
            None => RuleConditions::default(),
        };
        let has = |list: &Option<StringList>| {
            list.as_ref()
                .and_then(StringList::values)
                .is_some_and(|v| !v.is_empty())
        };

        if let Some(level) = &self.region_level {
            level
                .parse::<RegionLevel>()
                .map_err(SubscriptionError::Invalid)?;
        }

        match self.rule_type {
            RuleType::RegionalLevel if self.region_level.is_none() => Err(
                SubscriptionError::Invalid("regional_level rules require regionLevel".to_string()),
            ),
            RuleType::Regional if self.region_code.is_none() && !has(&parsed.region_codes) => {
                Err(SubscriptionError::Invalid(
                    "regional rules require regionCode or regionCodes".to_string(),
                ))
            }
            RuleType::Level if self.target_level.is_none() && !has(&parsed.target_levels) => {
                Err(SubscriptionError::Invalid(
                    "level rules require targetLevel or targetLevels".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

fn parse_rule_type(s: &str) -> Result<RuleType, SubscriptionError> {
    s.trim().parse().map_err(SubscriptionError::Invalid)
}

pub async fn create_rule(pool: &SqlitePool, input: &NewRule) -> Result<AlertRule, SubscriptionError> {
    let fields = RuleFields {
        rule_type: parse_rule_type(&input.rule_type)?,
        target_level: non_blank(&input.target_level),
        alert_type: non_blank(&input.alert_type),
        region_code: non_blank(&input.region_code),
        region_level: non_blank(&input.region_level),
        conditions: match &input.conditions {
            Some(v) => canonical_conditions(v)?,
            None => None,
        },
    };
    fields.validate()?;

    // Owning config must exist.
    get_config(pool, input.config_id).await?;

    let sort_order = match input.sort_order {
        Some(order) => order,
        None => {
            let max: Option<i64> =
                sqlx::query_scalar("SELECT MAX(sort_order) FROM alert_rules WHERE config_id = ?")
                    .bind(input.config_id)
                    .fetch_one(pool)
                    .await?;
            max.map_or(0, |m| m + 1)
        }
    };

    let result = sqlx::query(
        r#"
        INSERT INTO alert_rules (config_id, rule_type, target_level, alert_type, region_code,
                                 region_level, conditions, enabled, sort_order, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(input.config_id)
    .bind(fields.rule_type.as_str())
    .bind(&fields.target_level)
    .bind(&fields.alert_type)
    .bind(&fields.region_code)
    .bind(&fields.region_level)
    .bind(&fields.conditions)
    .bind(input.enabled.unwrap_or(true))
    .bind(sort_order)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;

    let id = result.last_insert_rowid();
    tracing::info!(rule_id = id, config_id = input.config_id, rule_type = %fields.rule_type, "Alert rule created");
    get_rule(pool, id).await
}

pub async fn update_rule(
    pool: &SqlitePool,
    id: i64,
    update: &RuleUpdate,
) -> Result<AlertRule, SubscriptionError> {
    let current = get_rule(pool, id).await?;

    let fields = RuleFields {
        rule_type: parse_rule_type(update.rule_type.as_deref().unwrap_or(&current.rule_type))?,
        target_level: non_blank(&update.target_level).or(current.target_level),
        alert_type: non_blank(&update.alert_type).or(current.alert_type),
        region_code: non_blank(&update.region_code).or(current.region_code),
        region_level: non_blank(&update.region_level).or(current.region_level),
        conditions: match &update.conditions {
            Some(v) => canonical_conditions(v)?,
            None => current.conditions,
        },
    };
    fields.validate()?;

    sqlx::query(
        r#"
        UPDATE alert_rules SET
            rule_type = ?, target_level = ?, alert_type = ?, region_code = ?,
            region_level = ?, conditions = ?, enabled = ?, sort_order = ?
        WHERE id = ?
        "#,
    )
    .bind(fields.rule_type.as_str())
    .bind(&fields.target_level)
    .bind(&fields.alert_type)
    .bind(&fields.region_code)
    .bind(&fields.region_level)
    .bind(&fields.conditions)
    .bind(update.enabled.unwrap_or(current.enabled))
    .bind(update.sort_order.unwrap_or(current.sort_order))
    .bind(id)
    .execute(pool)
    .await?;

    get_rule(pool, id).await
}

pub async fn delete_rule(pool: &SqlitePool, id: i64) -> Result<(), SubscriptionError> {
    let result = sqlx::query("DELETE FROM alert_rules WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(SubscriptionError::NotFound(format!("rule {}", id)));
    }
    Ok(())
}
