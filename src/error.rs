//! Error taxonomy for the ingestion cycle and its downstream stages.
//!
//! Only [`CycleError`] aborts a cycle. The other types are raised after a
//! batch has been committed and are logged or recorded in the notification
//! audit trail instead of propagating to the caller.

/// Failure of one ingestion cycle. Nothing from the cycle is committed.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    /// Transport failure or timeout while fetching the feed.
    #[error("feed request failed: {0}")]
    Fetch(#[from] reqwest::Error),

    /// The feed answered with a non-2xx status.
    #[error("feed returned HTTP {0}")]
    FetchStatus(u16),

    /// The payload did not contain the expected literal, or an entry could
    /// not be decoded.
    #[error("feed payload malformed: {0}")]
    Parse(String),

    /// The batch transaction failed and was rolled back.
    #[error("batch persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Another cycle holds the single-flight guard.
    #[error("an ingestion cycle is already running")]
    AlreadyRunning,
}

impl CycleError {
    /// Short machine-readable tag used in logs and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Fetch(_) | CycleError::FetchStatus(_) => "fetch_error",
            CycleError::Parse(_) => "parse_error",
            CycleError::Persistence(_) => "persistence_error",
            CycleError::AlreadyRunning => "already_running",
        }
    }
}

/// Retention pass failure. Non-fatal: the committed batch stands.
#[derive(Debug, thiserror::Error)]
#[error("housekeeping failed during {stage}: {source}")]
pub struct HousekeepingError {
    pub stage: &'static str,
    #[source]
    pub source: sqlx::Error,
}

/// A rule's structured conditions could not be decoded. Non-fatal: the rule
/// falls back to its legacy scalar fields.
#[derive(Debug, thiserror::Error)]
#[error("rule {rule_id}: conditions payload could not be decoded: {reason}")]
pub struct RuleConditionDecodeError {
    pub rule_id: i64,
    pub reason: String,
}

/// A single channel failed to deliver. Recorded in the notification log.
#[derive(Debug, thiserror::Error)]
pub enum ChannelDeliveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned HTTP {0}")]
    HttpStatus(u16),

    /// The provider answered but reported a failure code.
    #[error("provider rejected message (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("SMTP transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("email build error: {0}")]
    Build(String),

    /// Primary and fallback attempts both failed.
    #[error("primary failed ({primary}); fallback failed ({fallback})")]
    Exhausted {
        primary: Box<ChannelDeliveryError>,
        fallback: Box<ChannelDeliveryError>,
    },
}

/// CRUD failures on notification configs and rules.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("invalid: {0}")]
    Invalid(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_kinds() {
        assert_eq!(CycleError::FetchStatus(502).kind(), "fetch_error");
        assert_eq!(CycleError::Parse("x".into()).kind(), "parse_error");
        assert_eq!(CycleError::AlreadyRunning.kind(), "already_running");
    }

    #[test]
    fn test_exhausted_display_names_both_attempts() {
        let err = ChannelDeliveryError::Exhausted {
            primary: Box::new(ChannelDeliveryError::HttpStatus(500)),
            fallback: Box::new(ChannelDeliveryError::Rejected {
                code: 40001,
                message: "bad key".to_string(),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("HTTP 500"));
        assert!(msg.contains("bad key"));
    }
}
