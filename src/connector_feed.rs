//! Weather-alert feed connector.
//!
//! The upstream endpoint answers with a JavaScript snippet that embeds a
//! literal of the form:
//!
//! ```text
//! var alarminfo={"count":"2","data":[["北京市","101010100-20240101120000-0102.html","116.40","39.90"], ...]};
//! ```
//!
//! The literal is located with a regex and decoded with `serde_json` into a
//! fixed schema. Nothing from the payload is ever evaluated. Each entry's
//! compound link `<regionCode>-<YYYYMMDDHHMMSS>-<TTLL>` is decoded later,
//! inside the ingestion transaction, by [`decode_link`].

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

use crate::codes;
use crate::config::FeedConfig;
use crate::error::CycleError;
use crate::models::RawAlert;
use crate::traits::FeedSource;

/// Fields recovered from a compound detail link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLink {
    pub region_code: String,
    /// `YYYY-MM-DD HH:MM:SS`, source-local.
    pub publish_time: String,
    pub type_code: String,
    pub type_name: &'static str,
    pub level_code: String,
    pub level_name: &'static str,
}

/// Decode `"<regionCode>-<publishRaw>-<typeLevelCode>"`.
///
/// Unknown type or level codes resolve to [`codes::UNKNOWN_LABEL`]; only a
/// structurally malformed link is an error.
pub fn decode_link(link: &str) -> Result<DecodedLink, String> {
    let mut parts = link.split('-');
    let (region_code, publish_raw, type_level) = match (parts.next(), parts.next(), parts.next()) {
        (Some(r), Some(p), Some(t)) if !r.is_empty() => (r, p, t),
        _ => return Err(format!("detail link '{}' is not region-time-code", link)),
    };

    if publish_raw.len() != 14 || !publish_raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!(
            "detail link '{}' has publish time '{}', expected 14 digits",
            link, publish_raw
        ));
    }

    if type_level.len() < 4 || !type_level.is_char_boundary(4) {
        return Err(format!(
            "detail link '{}' has type/level code '{}', expected at least 4 characters",
            link, type_level
        ));
    }

    let publish_time = format!(
        "{}-{}-{} {}:{}:{}",
        &publish_raw[0..4],
        &publish_raw[4..6],
        &publish_raw[6..8],
        &publish_raw[8..10],
        &publish_raw[10..12],
        &publish_raw[12..14],
    );

    let type_code = type_level.get(0..2).unwrap_or_default().to_string();
    let level_code = type_level.get(2..4).unwrap_or_default().to_string();

    Ok(DecodedLink {
        region_code: region_code.to_string(),
        publish_time,
        type_name: codes::disaster_type_name(&type_code),
        level_name: codes::severity_level_name(&level_code),
        type_code,
        level_code,
    })
}

#[derive(Deserialize)]
struct FeedPayload {
    data: Vec<FeedEntry>,
}

#[derive(Deserialize)]
struct FeedEntry(String, String, Option<Coordinate>, Option<Coordinate>);

/// The feed is inconsistent about coordinate encoding.
#[derive(Deserialize)]
#[serde(untagged)]
enum Coordinate {
    Number(f64),
    Text(String),
}

impl Coordinate {
    fn value(self) -> Option<f64> {
        match self {
            Coordinate::Number(n) => Some(n),
            Coordinate::Text(s) => s.trim().parse().ok(),
        }
    }
}

fn alarminfo_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)var\s+alarminfo\s*=\s*(\{.*?\});").expect("alarminfo pattern is valid")
    })
}

/// Extract and decode the embedded literal from a raw feed response body.
pub fn parse_feed(body: &str) -> Result<Vec<RawAlert>, CycleError> {
    let literal = alarminfo_pattern()
        .captures(body)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| CycleError::Parse("alarminfo literal not found in response".to_string()))?;

    let payload: FeedPayload = serde_json::from_str(literal.as_str())
        .map_err(|e| CycleError::Parse(format!("alarminfo literal has unexpected shape: {}", e)))?;

    Ok(payload
        .data
        .into_iter()
        .map(|FeedEntry(region, link, lon, lat)| RawAlert {
            region,
            link,
            longitude: lon.and_then(Coordinate::value),
            latitude: lat.and_then(Coordinate::value),
        })
        .collect())
}

/// Fetches the public alert feed over HTTP.
pub struct HttpFeed {
    client: reqwest::Client,
    url: String,
    referer: String,
}

impl HttpFeed {
    pub fn new(config: &FeedConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            referer: config.referer.clone(),
        })
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self) -> Result<Vec<RawAlert>, CycleError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("_", Utc::now().timestamp_millis())])
            .header(reqwest::header::ACCEPT, "*/*")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .header(reqwest::header::REFERER, &self.referer)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CycleError::FetchStatus(status.as_u16()));
        }

        let body = response.text().await?;
        let entries = parse_feed(&body)?;
        tracing::debug!(url = %self.url, entries = entries.len(), "Feed fetched");
        Ok(entries)
    }
}
