//! Push channel (key-authenticated HTTP push API).
//!
//! Delivery tries the primary JSON endpoint first and, on any failure,
//! retries exactly once against the legacy form-encoded endpoint. Both
//! endpoints answer `{"code": 0, ...}` on success.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::DispatchConfig;
use crate::digest::Digest;
use crate::error::ChannelDeliveryError;
use crate::models::NotificationConfig;
use crate::traits::Channel;

#[derive(Debug, Deserialize)]
struct ProviderReply {
    code: i64,
    #[serde(default)]
    message: String,
}

impl ProviderReply {
    fn into_result(self) -> Result<(), ChannelDeliveryError> {
        if self.code == 0 {
            Ok(())
        } else {
            Err(ChannelDeliveryError::Rejected {
                code: self.code,
                message: self.message,
            })
        }
    }
}

pub struct PushChannel {
    client: reqwest::Client,
    primary_url: String,
    /// Contains a `{key}` placeholder.
    fallback_url: String,
}

impl PushChannel {
    pub fn new(config: &DispatchConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            primary_url: config.push_url.clone(),
            fallback_url: config.push_fallback_url.clone(),
        })
    }

    async fn send_primary(&self, key: &str, digest: &Digest) -> Result<(), ChannelDeliveryError> {
        let payload = serde_json::json!({
            "title": digest.title,
            "content": digest.text_body(),
            "short": digest.short(),
            "tp": "text",
        });

        let response = self
            .client
            .post(&self.primary_url)
            .bearer_auth(key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelDeliveryError::HttpStatus(status.as_u16()));
        }

        response.json::<ProviderReply>().await?.into_result()
    }

    async fn send_fallback(&self, key: &str, digest: &Digest) -> Result<(), ChannelDeliveryError> {
        let url = self.fallback_url.replace("{key}", key);
        let body = digest.text_body();
        let form = [("title", digest.title.as_str()), ("desp", body.as_str())];

        let response = self.client.post(&url).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelDeliveryError::HttpStatus(status.as_u16()));
        }

        response.json::<ProviderReply>().await?.into_result()
    }
}

#[async_trait]
impl Channel for PushChannel {
    fn name(&self) -> &str {
        "push"
    }

    fn is_configured(&self, config: &NotificationConfig) -> bool {
        config.has_push()
    }

    async fn deliver(
        &self,
        config: &NotificationConfig,
        digest: &Digest,
    ) -> Result<(), ChannelDeliveryError> {
        let key = config.send_key.trim();

        let primary = match self.send_primary(key, digest).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        tracing::warn!(
            config_id = config.id,
            error = %primary,
            "Primary push endpoint failed, retrying legacy endpoint"
        );

        self.send_fallback(key, digest)
            .await
            .map_err(|fallback| ChannelDeliveryError::Exhausted {
                primary: Box::new(primary),
                fallback: Box::new(fallback),
            })
    }
}
