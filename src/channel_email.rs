//! Email channel over authenticated SMTP.
//!
//! Each config carries its own SMTP server, so a transport is built per
//! delivery. `smtp_secure` selects implicit TLS (default port 465);
//! otherwise the connection is upgraded with STARTTLS (default port 587).

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

use crate::config::DispatchConfig;
use crate::digest::{html_to_text, Digest};
use crate::error::ChannelDeliveryError;
use crate::models::NotificationConfig;
use crate::traits::Channel;

const IMPLICIT_TLS_PORT: u16 = 465;
const STARTTLS_PORT: u16 = 587;

pub struct EmailChannel {
    timeout: Duration,
    sender_name: String,
}

impl EmailChannel {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            sender_name: config.email_sender_name.clone(),
        }
    }

    fn transport(
        &self,
        host: &str,
        port: u16,
        secure: bool,
        user: &str,
        password: &str,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, ChannelDeliveryError> {
        let builder = if secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
        };

        Ok(builder
            .port(port)
            .credentials(Credentials::new(user.to_string(), password.to_string()))
            .timeout(Some(self.timeout))
            .build())
    }

    /// Build the multipart message. The plaintext part is derived from the
    /// HTML table.
    pub fn compose(
        &self,
        from_user: &str,
        to: &str,
        digest: &Digest,
    ) -> Result<Message, ChannelDeliveryError> {
        let from = Mailbox::new(Some(self.sender_name.clone()), from_user.trim().parse::<Address>()?);
        let to: Mailbox = to.trim().parse()?;

        let html = digest.html_body();
        let text = html_to_text(&html);

        Message::builder()
            .from(from)
            .to(to)
            .subject(digest.subject())
            .multipart(MultiPart::alternative_plain_html(text, html))
            .map_err(|e| ChannelDeliveryError::Build(e.to_string()))
    }
}

pub fn default_port(secure: bool) -> u16 {
    if secure {
        IMPLICIT_TLS_PORT
    } else {
        STARTTLS_PORT
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    fn is_configured(&self, config: &NotificationConfig) -> bool {
        config.has_smtp()
    }

    async fn deliver(
        &self,
        config: &NotificationConfig,
        digest: &Digest,
    ) -> Result<(), ChannelDeliveryError> {
        let (Some(host), Some(user), Some(password)) = (
            config.smtp_host.as_deref(),
            config.smtp_user.as_deref(),
            config.smtp_password.as_deref(),
        ) else {
            return Err(ChannelDeliveryError::Build(
                "SMTP host, user and password are required".to_string(),
            ));
        };

        let port = config.smtp_port.unwrap_or_else(|| default_port(config.smtp_secure));
        let message = self.compose(user, &config.email, digest)?;
        let transport = self.transport(host.trim(), port, config.smtp_secure, user, password)?;

        transport.send(message).await?;

        tracing::debug!(config_id = config.id, host, port, "Email delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        assert_eq!(default_port(true), 465);
        assert_eq!(default_port(false), 587);
    }

    #[test]
    fn test_compose_sets_sender_name_and_subject() {
        let channel = EmailChannel::new(&DispatchConfig::default());
        let digest = Digest::new("气象预警通知", Vec::new(), 10, "");
        let message = channel
            .compose("bot@example.com", "user@example.com", &digest)
            .unwrap();

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("bot@example.com"));
        assert!(raw.contains("user@example.com"));
        assert!(raw.contains("multipart/alternative"));
    }

    #[test]
    fn test_compose_rejects_bad_recipient() {
        let channel = EmailChannel::new(&DispatchConfig::default());
        let digest = Digest::new("t", Vec::new(), 10, "");
        let err = channel.compose("bot@example.com", "not an address", &digest).unwrap_err();
        assert!(matches!(err, ChannelDeliveryError::Address(_)));
    }
}
