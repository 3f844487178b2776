//! New-vs-repeat classification of a committed batch.
//!
//! Identity is the detail link. The comparison set is deliberately bounded:
//! only the most recent `sample` records from *other* batches are consulted,
//! so an alert that reappears after dropping out of that window counts as
//! new again.

use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

use crate::models::{AlertRecord, ALERT_COLUMNS};

/// Records of `current` whose detail link is absent from `prior`, in order.
pub fn classify(current: &[AlertRecord], prior: &HashSet<String>) -> Vec<AlertRecord> {
    current
        .iter()
        .filter(|a| !prior.contains(&a.detail_link))
        .cloned()
        .collect()
}

/// All records of one batch, in insertion order.
pub async fn load_batch(pool: &SqlitePool, batch_id: &str) -> Result<Vec<AlertRecord>, sqlx::Error> {
    let sql = format!("SELECT {} FROM alerts WHERE batch_id = ? ORDER BY id ASC", ALERT_COLUMNS);
    let rows = sqlx::query(&sql).bind(batch_id).fetch_all(pool).await?;
    Ok(rows.iter().map(AlertRecord::from_row).collect())
}

/// Detail links of the `sample` most recent records outside `batch_id`.
pub async fn prior_links(
    pool: &SqlitePool,
    batch_id: &str,
    sample: i64,
) -> Result<HashSet<String>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT detail_link FROM alerts WHERE batch_id != ? ORDER BY write_time DESC, id DESC LIMIT ?",
    )
    .bind(batch_id)
    .bind(sample)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(|r| r.get::<String, _>("detail_link")).collect())
}

/// Load batch `batch_id` and return its new records.
pub async fn new_alerts(
    pool: &SqlitePool,
    batch_id: &str,
    sample: i64,
) -> Result<Vec<AlertRecord>, sqlx::Error> {
    let current = load_batch(pool, batch_id).await?;
    let prior = prior_links(pool, batch_id, sample).await?;
    let fresh = classify(&current, &prior);

    tracing::debug!(
        batch_id,
        total = current.len(),
        new = fresh.len(),
        prior = prior.len(),
        "Batch diffed"
    );

    Ok(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(link: &str) -> AlertRecord {
        AlertRecord {
            id: 0,
            region: "r".to_string(),
            region_code: "10101".to_string(),
            publish_time: "2024-01-01 12:00:00".to_string(),
            type_code: "02".to_string(),
            type_name: "暴雨".to_string(),
            level_code: "04".to_string(),
            level_name: "红色".to_string(),
            detail_link: link.to_string(),
            longitude: None,
            latitude: None,
            batch_id: "b".to_string(),
            write_time: Utc::now(),
        }
    }

    #[test]
    fn test_membership_toggles_newness() {
        let current = vec![record("a"), record("b"), record("c")];
        let mut prior: HashSet<String> = ["b".to_string()].into_iter().collect();

        let fresh: Vec<_> = classify(&current, &prior)
            .into_iter()
            .map(|a| a.detail_link)
            .collect();
        assert_eq!(fresh, vec!["a", "c"]);

        prior.insert("a".to_string());
        prior.remove("b");
        let fresh: Vec<_> = classify(&current, &prior)
            .into_iter()
            .map(|a| a.detail_link)
            .collect();
        assert_eq!(fresh, vec!["b", "c"]);
    }

    #[test]
    fn test_empty_prior_means_everything_is_new() {
        let current = vec![record("a")];
        assert_eq!(classify(&current, &HashSet::new()).len(), 1);
    }
}
