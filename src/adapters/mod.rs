//! Concrete provider adapters
//!
//! - [`openai`]: content analysis through an OpenAI-compatible chat API
//! - [`admitad`]: alternative offers from the Admitad affiliate network
//! - [`page`]: product details scraped from the page itself
//! - [`affiliate`]: monetized link rewriting

pub mod admitad;
pub mod affiliate;
pub mod openai;
pub mod page;

use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::error::{AdapterError, AdapterResult};
use crate::sanitize::sanitize_body;

pub use admitad::AdmitadClient;
pub use affiliate::AffiliateLinker;
pub use openai::OpenAiAnalyzer;
pub use page::PageScraper;

pub const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// HTTP client shared by the adapters. `timeout` bounds a whole request.
pub fn http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
}

/// Returns the JSON body of a successful response.
///
/// Non-success statuses become `UpstreamUnavailable(status)`; the body is
/// logged only after sanitization.
pub async fn json_body(adapter: &str, response: Response) -> AdapterResult<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(
            "{} returned {}: {}",
            adapter,
            status,
            sanitize_body(&body)
        );
        return Err(AdapterError::UpstreamUnavailable(status.as_u16()));
    }

    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|_| {
        warn!("{} returned invalid json: {}", adapter, sanitize_body(&text));
        AdapterError::MalformedResponse
    })
}

/// Reads a number that upstreams send either as a JSON number or a string.
pub fn number_field(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => page::parse_price(s),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

/// Reads a string that may be nested as `{ "name": ... }`.
pub fn name_field(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map.get("name").and_then(Value::as_str)?,
        _ => return None,
    };
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
