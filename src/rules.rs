//! Rule engine: decides which new alerts each subscriber receives.
//!
//! A config with no attached rules is evaluated in **legacy mode** against
//! its comma-joined flat filters (all non-empty filters must hold). A config
//! with rules is evaluated in **rule-list mode**: enabled rules are tried in
//! stored order and the first fully satisfied rule includes the alert.
//!
//! Stored rules are compiled into [`Criteria`], a tagged union keyed by rule
//! type. The structured `conditions` payload is decoded through a strict
//! schema ([`RuleConditions`]); if it is missing or undecodable the rule's
//! legacy scalar fields (`target_level`, `region_code`) are used instead.

use serde::Deserialize;

use crate::error::RuleConditionDecodeError;
use crate::models::{AlertRecord, AlertRule, NotificationConfig, RegionLevel, RuleType};

/// Rule type no longer accepted on create, still present in older databases.
const LEGACY_UPGRADE_TYPE: &str = "upgrade";

/// Structured conditions payload.
///
/// Each list may arrive as a JSON array or as a comma-joined string.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConditions {
    #[serde(default)]
    pub target_levels: Option<StringList>,
    #[serde(default)]
    pub region_codes: Option<StringList>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StringList {
    List(Vec<String>),
    Joined(String),
}

impl StringList {
    /// `None` when a joined string is blank, so the caller falls through
    /// to the legacy scalar.
    pub fn values(&self) -> Option<Vec<String>> {
        match self {
            StringList::List(items) => Some(items.clone()),
            StringList::Joined(s) => {
                let items = split_list(s);
                if items.is_empty() {
                    None
                } else {
                    Some(items)
                }
            }
        }
    }
}

/// Decode a stored conditions payload, stripping at most one layer of
/// string encoding first.
pub fn decode_conditions(
    rule_id: i64,
    raw: &str,
) -> Result<RuleConditions, RuleConditionDecodeError> {
    let fail = |reason: String| RuleConditionDecodeError { rule_id, reason };

    let trimmed = raw.trim();
    let unwrapped;
    let payload = if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        unwrapped = serde_json::from_str::<String>(trimmed).map_err(|e| fail(e.to_string()))?;
        unwrapped.as_str()
    } else {
        trimmed
    };

    serde_json::from_str::<RuleConditions>(payload).map_err(|e| fail(e.to_string()))
}

/// A rule compiled into typed matching criteria.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    RegionalLevel {
        region_level: Option<RegionLevel>,
        levels: Vec<String>,
        alert_type: Option<String>,
    },
    Regional {
        region_codes: Vec<String>,
        levels: Vec<String>,
        alert_type: Option<String>,
    },
    Level {
        levels: Vec<String>,
        alert_type: Option<String>,
    },
}

impl Criteria {
    /// Compile a stored rule. Returns `None` for an unrecognised rule type.
    ///
    /// Never fails on a bad conditions payload: the decode error is logged
    /// and the legacy scalar fields take over.
    pub fn compile(rule: &AlertRule) -> Option<Criteria> {
        // Rows written by older releases; matched on levels only.
        let legacy_upgrade = rule.rule_type.trim() == LEGACY_UPGRADE_TYPE;
        let rule_type: RuleType = if legacy_upgrade {
            RuleType::Level
        } else {
            match rule.rule_type.parse() {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(rule_id = rule.id, error = %e, "Skipping rule with unknown type");
                    return None;
                }
            }
        };

        let conditions = match rule.conditions.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(raw) => match decode_conditions(rule.id, raw) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, "Falling back to legacy rule fields");
                    RuleConditions::default()
                }
            },
            None => RuleConditions::default(),
        };

        let levels = conditions
            .target_levels
            .as_ref()
            .and_then(StringList::values)
            .or_else(|| scalar(&rule.target_level))
            .unwrap_or_default();

        let alert_type = rule
            .alert_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && !legacy_upgrade)
            .map(str::to_string);

        Some(match rule_type {
            RuleType::RegionalLevel => Criteria::RegionalLevel {
                region_level: rule
                    .region_level
                    .as_deref()
                    .and_then(|l| l.parse::<RegionLevel>().ok()),
                levels,
                alert_type,
            },
            RuleType::Regional => Criteria::Regional {
                region_codes: conditions
                    .region_codes
                    .as_ref()
                    .and_then(StringList::values)
                    .or_else(|| scalar(&rule.region_code))
                    .unwrap_or_default(),
                levels,
                alert_type,
            },
            RuleType::Level => Criteria::Level { levels, alert_type },
        })
    }

    /// All declared conditions must hold; undeclared ones are vacuously true.
    pub fn matches(&self, alert: &AlertRecord) -> bool {
        match self {
            Criteria::RegionalLevel {
                region_level,
                levels,
                alert_type,
            } => {
                region_level.map_or(true, |want| alert.region_class() == Some(want))
                    && level_ok(levels, alert)
                    && type_ok(alert_type, alert)
            }
            Criteria::Regional {
                region_codes,
                levels,
                alert_type,
            } => {
                (region_codes.is_empty() || region_matches(region_codes, &alert.region_code))
                    && level_ok(levels, alert)
                    && type_ok(alert_type, alert)
            }
            Criteria::Level { levels, alert_type } => {
                level_ok(levels, alert) && type_ok(alert_type, alert)
            }
        }
    }
}

fn scalar(value: &Option<String>) -> Option<Vec<String>> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| vec![v.to_string()])
}

fn level_ok(levels: &[String], alert: &AlertRecord) -> bool {
    levels.is_empty() || levels.iter().any(|l| *l == alert.level_name)
}

fn type_ok(alert_type: &Option<String>, alert: &AlertRecord) -> bool {
    alert_type.as_deref().map_or(true, |t| t == alert.type_name)
}

/// Exact or prefix match of `region_code` against any listed code.
pub fn region_matches(codes: &[String], region_code: &str) -> bool {
    codes.iter().any(|code| region_code.starts_with(code.as_str()))
}

/// Split a comma-joined filter, trimming entries and dropping blanks.
pub fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// A config with its rules, compiled once per cycle.
pub struct Subscription {
    pub config: NotificationConfig,
    mode: Mode,
}

enum Mode {
    Legacy {
        region_codes: Vec<String>,
        disaster_types: Vec<String>,
        levels: Vec<String>,
    },
    Rules(Vec<(i64, Criteria)>),
}

impl Subscription {
    /// `rules` must be in stored order. Only enabled rules count: a config
    /// whose rules are all disabled falls back to its flat filters.
    pub fn new(config: NotificationConfig, rules: &[AlertRule]) -> Self {
        let enabled: Vec<&AlertRule> = rules.iter().filter(|r| r.enabled).collect();
        let mode = if enabled.is_empty() {
            Mode::Legacy {
                region_codes: split_list(&config.region_codes),
                disaster_types: split_list(&config.level_types),
                levels: split_list(&config.alert_levels),
            }
        } else {
            Mode::Rules(
                enabled
                    .into_iter()
                    .filter_map(|r| Criteria::compile(r).map(|c| (r.id, c)))
                    .collect(),
            )
        };
        Self { config, mode }
    }

    pub fn accepts(&self, alert: &AlertRecord) -> bool {
        match &self.mode {
            Mode::Legacy {
                region_codes,
                disaster_types,
                levels,
            } => {
                (region_codes.is_empty() || region_matches(region_codes, &alert.region_code))
                    && (disaster_types.is_empty()
                        || disaster_types.iter().any(|t| *t == alert.type_name))
                    && (levels.is_empty() || levels.iter().any(|l| *l == alert.level_name))
            }
            Mode::Rules(criteria) => match criteria.iter().find(|(_, c)| c.matches(alert)) {
                Some((rule_id, _)) => {
                    tracing::debug!(
                        config_id = self.config.id,
                        rule_id,
                        region = %alert.region,
                        level = %alert.level_name,
                        "Alert matched rule"
                    );
                    true
                }
                None => false,
            },
        }
    }

    /// The subset of `alerts` this subscriber receives, in input order.
    pub fn select(&self, alerts: &[AlertRecord]) -> Vec<AlertRecord> {
        alerts.iter().filter(|a| self.accepts(a)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn alert(region_code: &str, type_name: &str, level_name: &str) -> AlertRecord {
        AlertRecord {
            id: 1,
            region: "测试".to_string(),
            region_code: region_code.to_string(),
            publish_time: "2024-01-01 12:00:00".to_string(),
            type_code: "02".to_string(),
            type_name: type_name.to_string(),
            level_code: "02".to_string(),
            level_name: level_name.to_string(),
            detail_link: format!("{}-20240101120000-0202", region_code),
            longitude: None,
            latitude: None,
            batch_id: "b".to_string(),
            write_time: Utc::now(),
        }
    }

    fn config() -> NotificationConfig {
        NotificationConfig {
            id: 1,
            send_key: "SCT".to_string(),
            email: String::new(),
            smtp_host: None,
            smtp_port: None,
            smtp_secure: true,
            smtp_user: None,
            smtp_password: None,
            region_codes: String::new(),
            level_types: String::new(),
            alert_levels: String::new(),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn rule(id: i64, rule_type: &str) -> AlertRule {
        AlertRule {
            id,
            config_id: 1,
            rule_type: rule_type.to_string(),
            target_level: None,
            alert_type: None,
            region_code: None,
            region_level: None,
            conditions: None,
            enabled: true,
            sort_order: id,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_match_wins_across_level_rules() {
        let mut r1 = rule(1, "level");
        r1.conditions = Some(r#"{"targetLevels":["蓝色"]}"#.to_string());
        let mut r2 = rule(2, "level");
        r2.conditions = Some(r#"{"targetLevels":["黄色"]}"#.to_string());

        let sub = Subscription::new(config(), &[r1, r2]);
        let alerts = vec![alert("10101", "暴雨", "黄色")];
        assert_eq!(sub.select(&alerts).len(), 1);
        assert!(!sub.accepts(&alert("10101", "暴雨", "红色")));
    }

    #[test]
    fn test_legacy_filters_are_anded() {
        let mut cfg = config();
        cfg.region_codes = "101".to_string();
        cfg.alert_levels = "红色".to_string();
        let sub = Subscription::new(cfg, &[]);

        assert!(!sub.accepts(&alert("102000000", "暴雨", "红色")));
        assert!(sub.accepts(&alert("101010100", "暴雨", "红色")));
        assert!(!sub.accepts(&alert("101010100", "暴雨", "黄色")));
    }

    #[test]
    fn test_legacy_without_filters_accepts_everything() {
        let sub = Subscription::new(config(), &[]);
        assert!(sub.accepts(&alert("999", "大风", "白色")));
    }

    #[test]
    fn test_legacy_disaster_type_filter() {
        let mut cfg = config();
        cfg.level_types = "暴雨, 大风".to_string();
        let sub = Subscription::new(cfg, &[]);
        assert!(sub.accepts(&alert("10101", "大风", "蓝色")));
        assert!(!sub.accepts(&alert("10101", "高温", "蓝色")));
    }

    #[test]
    fn test_all_disabled_rules_fall_back_to_flat_filters() {
        let mut cfg = config();
        cfg.alert_levels = "红色".to_string();
        let mut r = rule(1, "level");
        r.conditions = Some(r#"{"targetLevels":["蓝色"]}"#.to_string());
        r.enabled = false;

        let sub = Subscription::new(cfg, &[r]);
        assert!(sub.accepts(&alert("10101", "暴雨", "红色")));
        assert!(!sub.accepts(&alert("10101", "暴雨", "蓝色")));
    }

    #[test]
    fn test_one_enabled_rule_selects_rule_mode() {
        let mut cfg = config();
        cfg.alert_levels = "红色".to_string();
        let mut off = rule(1, "level");
        off.enabled = false;
        let mut on = rule(2, "level");
        on.conditions = Some(r#"{"targetLevels":["蓝色"]}"#.to_string());

        let sub = Subscription::new(cfg, &[off, on]);
        assert!(!sub.accepts(&alert("10101", "暴雨", "红色")));
        assert!(sub.accepts(&alert("10101", "暴雨", "蓝色")));
    }

    #[test]
    fn test_regional_level_classifies_by_code_length() {
        let mut r = rule(1, "regional_level");
        r.region_level = Some("provincial".to_string());
        r.alert_type = Some("暴雨".to_string());
        let criteria = Criteria::compile(&r).unwrap();

        assert!(criteria.matches(&alert("10101", "暴雨", "红色")));
        assert!(!criteria.matches(&alert("1010101", "暴雨", "红色")));
        assert!(!criteria.matches(&alert("10101", "大风", "红色")));

        r.region_level = Some("city".to_string());
        let criteria = Criteria::compile(&r).unwrap();
        assert!(criteria.matches(&alert("1010101", "暴雨", "红色")));
    }

    #[test]
    fn test_regional_prefix_and_levels() {
        let mut r = rule(1, "regional");
        r.conditions = Some(r#"{"regionCodes":["101","205"],"targetLevels":"橙色,红色"}"#.to_string());
        let criteria = Criteria::compile(&r).unwrap();

        assert!(criteria.matches(&alert("101010100", "暴雨", "红色")));
        assert!(criteria.matches(&alert("205", "暴雨", "橙色")));
        assert!(!criteria.matches(&alert("102000000", "暴雨", "红色")));
        assert!(!criteria.matches(&alert("101010100", "暴雨", "蓝色")));
    }

    #[test]
    fn test_double_encoded_conditions_are_unwrapped_once() {
        let inner = r#"{"targetLevels":["红色"]}"#;
        let once = serde_json::to_string(inner).unwrap();
        let decoded = decode_conditions(1, &once).unwrap();
        assert_eq!(
            decoded.target_levels,
            Some(StringList::List(vec!["红色".to_string()]))
        );

        // Two layers of quoting is beyond what is stripped.
        let twice = serde_json::to_string(&once).unwrap();
        assert!(decode_conditions(1, &twice).is_err());
    }

    #[test]
    fn test_undecodable_conditions_fall_back_to_legacy_fields() {
        let mut r = rule(7, "regional");
        r.conditions = Some("{not json".to_string());
        r.region_code = Some("101".to_string());
        r.target_level = Some("红色".to_string());

        let criteria = Criteria::compile(&r).unwrap();
        assert_eq!(
            criteria,
            Criteria::Regional {
                region_codes: vec!["101".to_string()],
                levels: vec!["红色".to_string()],
                alert_type: None,
            }
        );
    }

    #[test]
    fn test_blank_joined_list_falls_back_to_scalar() {
        let mut r = rule(1, "level");
        r.conditions = Some(r#"{"targetLevels":""}"#.to_string());
        r.target_level = Some("橙色".to_string());
        assert_eq!(
            Criteria::compile(&r),
            Some(Criteria::Level {
                levels: vec!["橙色".to_string()],
                alert_type: None
            })
        );
    }

    #[test]
    fn test_unknown_rule_type_never_matches() {
        let r = rule(1, "seasonal");
        assert!(Criteria::compile(&r).is_none());
        let sub = Subscription::new(config(), &[r]);
        assert!(!sub.accepts(&alert("10101", "暴雨", "红色")));
    }

    #[test]
    fn test_stored_upgrade_rule_matches_on_levels_only() {
        let mut r = rule(1, "upgrade");
        r.conditions = Some(r#"{"targetLevels":["红色"]}"#.to_string());
        r.alert_type = Some("大风".to_string());
        assert_eq!(
            Criteria::compile(&r),
            Some(Criteria::Level {
                levels: vec!["红色".to_string()],
                alert_type: None
            })
        );

        let sub = Subscription::new(config(), &[r]);
        assert!(sub.accepts(&alert("10101", "暴雨", "红色")));
        assert!(!sub.accepts(&alert("10101", "暴雨", "黄色")));
    }

    #[test]
    fn test_non_object_conditions_degrade() {
        assert!(decode_conditions(1, "[1,2,3]").is_err());
        assert!(decode_conditions(1, "\"").is_err());
    }
}
