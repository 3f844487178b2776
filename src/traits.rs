//! Extension traits for feed sources and notification channels.
//!
//! The [`Pipeline`](crate::pipeline::Pipeline) talks to the outside world
//! only through these two seams. Production wiring uses
//! [`HttpFeed`](crate::connector_feed::HttpFeed),
//! [`PushChannel`](crate::channel_push::PushChannel) and
//! [`EmailChannel`](crate::channel_email::EmailChannel); tests substitute
//! in-memory implementations.
//!
//! ```text
//!  FeedSource ──▶ Pipeline ──▶ [Channel, Channel, ...]
//! ```

use async_trait::async_trait;

use crate::digest::Digest;
use crate::error::{ChannelDeliveryError, CycleError};
use crate::models::{NotificationConfig, RawAlert};

/// Produces the raw entries of one feed snapshot.
///
/// Implementations must bound their own network time; a hung upstream must
/// surface as [`CycleError::Fetch`] rather than stall the scheduler.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Fetch and decode the feed into raw `(region, link, lon, lat)` entries.
    async fn fetch(&self) -> Result<Vec<RawAlert>, CycleError>;
}

/// A notification delivery channel.
///
/// The dispatcher calls [`deliver`](Channel::deliver) only when
/// [`is_configured`](Channel::is_configured) returns true for the config.
/// Each call runs under its own error boundary.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name used in logs and notification-log messages (`"push"`, `"email"`).
    fn name(&self) -> &str;

    /// Whether `config` carries the credentials this channel needs.
    fn is_configured(&self, config: &NotificationConfig) -> bool;

    /// Deliver `digest` to the subscriber described by `config`.
    async fn deliver(
        &self,
        config: &NotificationConfig,
        digest: &Digest,
    ) -> Result<(), ChannelDeliveryError>;
}
