//! Latest-batch alert query.
//!
//! Reads the batch of the most recent successful ingestion, applies the
//! caller's filters, and annotates each record with its new/provincial/city
//! flags. Used by both `alh alerts` and `GET /api/alerts`.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::db;
use crate::diff;
use crate::models::{AlertRecord, IngestionLog, RegionLevel, ALERT_COLUMNS, STATUS_SUCCESS};

/// Query-string filters. Field names match the HTTP parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertFilters {
    /// Disaster-type name.
    #[serde(rename = "type")]
    pub alert_type: Option<String>,
    /// Severity-level name.
    pub level: Option<String>,
    /// Region-code prefix.
    pub region: Option<String>,
    /// `provincial` or `city`.
    pub level_type: Option<String>,
}

impl AlertFilters {
    /// Blank parameters count as absent.
    fn normalized(&self) -> AlertFilters {
        let clean = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        AlertFilters {
            alert_type: clean(&self.alert_type),
            level: clean(&self.level),
            region: clean(&self.region),
            level_type: clean(&self.level_type),
        }
    }

    fn scope(&self) -> Result<Option<RegionLevel>> {
        match self.level_type.as_deref() {
            None => Ok(None),
            Some(s) => match s.parse() {
                Ok(level) => Ok(Some(level)),
                Err(e) => bail!(e),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedAlert {
    #[serde(flatten)]
    pub alert: AlertRecord,
    pub is_new: bool,
    pub is_provincial: bool,
    pub is_city: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    pub total: usize,
    pub level_count: BTreeMap<String, usize>,
    pub provincial_count: usize,
    pub city_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertQueryResponse {
    pub data: Vec<AnnotatedAlert>,
    pub stats: AlertStats,
    pub batch_info: IngestionLog,
}

/// Most recent successful ingestion log, if any.
pub async fn latest_success(pool: &SqlitePool) -> Result<Option<IngestionLog>> {
    let row = sqlx::query(
        "SELECT id, batch_id, record_count, status, message, update_time FROM ingestion_logs \
         WHERE status = ? ORDER BY update_time DESC, id DESC LIMIT 1",
    )
    .bind(STATUS_SUCCESS)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(IngestionLog::from_row))
}

/// Query the latest batch. `Ok(None)` when nothing has been ingested yet.
pub async fn query_alerts(
    pool: &SqlitePool,
    filters: &AlertFilters,
    prior_sample: i64,
) -> Result<Option<AlertQueryResponse>> {
    let filters = filters.normalized();
    let scope = filters.scope()?;

    let Some(batch) = latest_success(pool).await? else {
        return Ok(None);
    };

    let mut sql = format!("SELECT {} FROM alerts WHERE batch_id = ?", ALERT_COLUMNS);
    if filters.alert_type.is_some() {
        sql.push_str(" AND type_name = ?");
    }
    if filters.level.is_some() {
        sql.push_str(" AND level_name = ?");
    }
    sql.push_str(" ORDER BY publish_time DESC, id ASC");

    let mut query = sqlx::query(&sql).bind(&batch.batch_id);
    if let Some(t) = &filters.alert_type {
        query = query.bind(t);
    }
    if let Some(l) = &filters.level {
        query = query.bind(l);
    }

    let rows = query.fetch_all(pool).await?;
    let prior = diff::prior_links(pool, &batch.batch_id, prior_sample).await?;

    let data: Vec<AnnotatedAlert> = rows
        .iter()
        .map(AlertRecord::from_row)
        .filter(|a| {
            filters
                .region
                .as_deref()
                .map_or(true, |prefix| a.region_code.starts_with(prefix))
        })
        .filter(|a| scope.map_or(true, |s| a.region_class() == Some(s)))
        .map(|alert| {
            let class = alert.region_class();
            AnnotatedAlert {
                is_new: !prior.contains(&alert.detail_link),
                is_provincial: class == Some(RegionLevel::Provincial),
                is_city: class == Some(RegionLevel::City),
                alert,
            }
        })
        .collect();

    let mut level_count = BTreeMap::new();
    for a in &data {
        *level_count.entry(a.alert.level_name.clone()).or_insert(0) += 1;
    }

    let stats = AlertStats {
        total: data.len(),
        level_count,
        provincial_count: data.iter().filter(|a| a.is_provincial).count(),
        city_count: data.iter().filter(|a| a.is_city).count(),
    };

    Ok(Some(AlertQueryResponse {
        data,
        stats,
        batch_info: batch,
    }))
}

/// CLI entry point for `alh alerts`.
pub async fn run_alerts(config: &Config, filters: &AlertFilters, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = query_alerts(&pool, filters, config.diff.prior_sample).await;
    pool.close().await;

    let Some(response) = result? else {
        bail!("no data: no successful ingestion yet");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!(
        "batch {} ({} records)",
        response.batch_info.batch_id, response.batch_info.record_count
    );
    println!();
    for a in &response.data {
        println!(
            "{} {:<10} {:<12} {:<8} {:<6} {}",
            if a.is_new { "*" } else { " " },
            a.alert.region_code,
            a.alert.region,
            a.alert.type_name,
            a.alert.level_name,
            a.alert.publish_time
        );
    }
    println!();
    println!(
        "total: {}  provincial: {}  city: {}",
        response.stats.total, response.stats.provincial_count, response.stats.city_count
    );
    for (level, count) in &response.stats.level_count {
        println!("  {}: {}", level, count);
    }

    Ok(())
}
