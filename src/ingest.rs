//! Batch ingestion.
//!
//! One feed snapshot becomes one batch: every entry is decoded and inserted
//! under a fresh batch id, and exactly one `success` row is written to
//! `ingestion_logs`, all inside a single transaction. A decode or SQL failure
//! on any entry drops the transaction, so a partial batch is never visible.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::connector_feed::decode_link;
use crate::error::CycleError;
use crate::models::{RawAlert, STATUS_SUCCESS};

/// Result of a committed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub batch_id: String,
    pub inserted_count: usize,
    pub write_time: DateTime<Utc>,
}

/// `YYYY_MM_DDTHH_MM_SS_<8 hex>`, UTC.
pub fn new_batch_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", now.format("%Y_%m_%dT%H_%M_%S"), &suffix[..8])
}

/// Persist `entries` as one atomic batch stamped with `now`.
pub async fn ingest_batch(
    pool: &SqlitePool,
    entries: &[RawAlert],
    now: DateTime<Utc>,
) -> Result<BatchSummary, CycleError> {
    let batch_id = new_batch_id(now);
    let write_time = now.timestamp();

    let mut tx = pool.begin().await?;

    for (index, entry) in entries.iter().enumerate() {
        let decoded = decode_link(&entry.link)
            .map_err(|e| CycleError::Parse(format!("entry {}: {}", index, e)))?;

        sqlx::query(
            r#"
            INSERT INTO alerts (region, region_code, publish_time, type_code, type_name,
                                level_code, level_name, detail_link, longitude, latitude,
                                batch_id, write_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.region)
        .bind(&decoded.region_code)
        .bind(&decoded.publish_time)
        .bind(&decoded.type_code)
        .bind(decoded.type_name)
        .bind(&decoded.level_code)
        .bind(decoded.level_name)
        .bind(&entry.link)
        .bind(entry.longitude)
        .bind(entry.latitude)
        .bind(&batch_id)
        .bind(write_time)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        "INSERT INTO ingestion_logs (batch_id, record_count, status, message, update_time) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&batch_id)
    .bind(entries.len() as i64)
    .bind(STATUS_SUCCESS)
    .bind(format!("成功获取 {} 条预警记录", entries.len()))
    .bind(write_time)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(batch_id = %batch_id, records = entries.len(), "Batch committed");

    Ok(BatchSummary {
        batch_id,
        inserted_count: entries.len(),
        write_time: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_batch_id_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        let id = new_batch_id(now);
        assert!(id.starts_with("2024_03_05T07_08_09_"));
        let suffix = &id["2024_03_05T07_08_09_".len()..];
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_batch_ids_are_unique_within_a_second() {
        let now = Utc::now();
        assert_ne!(new_batch_id(now), new_batch_id(now));
    }
}
