//! Content analysis through an OpenAI-compatible chat completions API
//!
//! Text, URLs and images are turned into a canonical search query plus
//! category, brand and feature hints. Model output is parsed leniently: when
//! the reply is not the requested JSON the adapter still returns a usable
//! analysis built from the raw input.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapters::{http_client, json_body, number_field};
use crate::config::OpenAiConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::models::ContentAnalysis;
use crate::traits::{AnalysisInput, ContentAnalyzer};

const RESPONSE_SHAPE: &str = r#"Respond only with JSON of the form:
{"query": "short product search query", "category": "product category", "brand": "brand or null", "keyFeatures": ["feature"], "confidence": 0-100}"#;

pub struct OpenAiAnalyzer {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiAnalyzer {
    pub fn new(config: OpenAiConfig, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            config,
        })
    }

    fn messages(input: AnalysisInput<'_>) -> Value {
        match input {
            AnalysisInput::Text(text) => json!([{
                "role": "user",
                "content": format!("Analyze this product search query and extract structured information.\nQuery: \"{text}\"\n{RESPONSE_SHAPE}"),
            }]),
            AnalysisInput::Url(url) => json!([{
                "role": "user",
                "content": format!("Identify the product sold at this URL from its domain and path.\nURL: {url}\n{RESPONSE_SHAPE}"),
            }]),
            AnalysisInput::Image(bytes) => json!([{
                "role": "user",
                "content": [
                    { "type": "text", "text": format!("Identify the product in this image.\n{RESPONSE_SHAPE}") },
                    { "type": "image_url", "image_url": {
                        "url": format!("data:{};base64,{}", sniff_mime(bytes), BASE64.encode(bytes))
                    } }
                ],
            }]),
        }
    }
}

#[async_trait]
impl ContentAnalyzer for OpenAiAnalyzer {
    fn name(&self) -> &str {
        "openai"
    }

    async fn analyze(&self, input: AnalysisInput<'_>) -> AdapterResult<ContentAnalysis> {
        let Some(api_key) = &self.config.api_key else {
            return Err(AdapterError::NotConfigured);
        };

        let model = match input {
            AnalysisInput::Image(_) => &self.config.vision_model,
            _ => &self.config.model,
        };
        let body = json!({
            "model": model,
            "messages": Self::messages(input),
            "temperature": 0.3,
            "max_tokens": 500,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url.trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let envelope = match json_body(self.name(), response).await {
            Ok(envelope) => envelope,
            Err(AdapterError::MalformedResponse) => {
                return Ok(ContentAnalysis::passthrough(input.fallback_query()));
            }
            Err(err) => return Err(err),
        };

        let content = envelope["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default();
        if content.is_empty() {
            warn!("content analysis reply had no message content");
        }

        let analysis = parse_analysis(content, input);
        debug!(
            "Content analysis complete: {:?} ({}% confidence)",
            analysis.query, analysis.confidence
        );
        Ok(analysis)
    }
}

/// Reads the model reply, tolerating prose around the JSON object.
pub fn parse_analysis(content: &str, input: AnalysisInput<'_>) -> ContentAnalysis {
    let parsed = content
        .find('{')
        .zip(content.rfind('}'))
        .filter(|(start, end)| start < end)
        .and_then(|(start, end)| serde_json::from_str::<Value>(&content[start..=end]).ok())
        .filter(Value::is_object);

    let Some(json) = parsed else {
        let query = match input.fallback_query() {
            q if q.is_empty() => first_line(content),
            q => q,
        };
        return ContentAnalysis::passthrough(query);
    };

    let label = |key: &str| {
        json.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("unknown") && !v.eq_ignore_ascii_case("null"))
            .map(str::to_string)
    };

    let query = label("query")
        .or_else(|| label("productName"))
        .or_else(|| label("detectedProduct"))
        .unwrap_or_else(|| input.fallback_query());

    let key_features = json
        .get("keyFeatures")
        .or_else(|| json.get("features"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let confidence = json
        .get("confidence")
        .and_then(number_field)
        .map(|c| if c <= 1.0 { c * 100.0 } else { c })
        .map_or(0, |c| c.clamp(0.0, 100.0).round() as u8);

    ContentAnalysis {
        query,
        category: label("category"),
        brand: label("brand"),
        key_features,
        confidence,
    }
}

fn first_line(content: &str) -> String {
    content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.chars().take(80).collect())
        .unwrap_or_default()
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG") {
        "image/png"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() > 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_reply_is_parsed() {
        let reply = r#"Sure! {"query":"sony wh-1000xm5","category":"Audio","brand":"Sony",
            "keyFeatures":["noise cancelling","bluetooth"],"confidence":0.92}"#;
        let analysis = parse_analysis(reply, AnalysisInput::Text("sony headphones"));

        assert_eq!(analysis.query, "sony wh-1000xm5");
        assert_eq!(analysis.category.as_deref(), Some("Audio"));
        assert_eq!(analysis.brand.as_deref(), Some("Sony"));
        assert_eq!(analysis.key_features.len(), 2);
        assert_eq!(analysis.confidence, 92);
    }

    #[test]
    fn unknown_labels_are_dropped() {
        let reply = r#"{"productName":"Desk lamp","brand":"Unknown","confidence":65}"#;
        let analysis = parse_analysis(reply, AnalysisInput::Image(b"img"));
        assert_eq!(analysis.query, "Desk lamp");
        assert_eq!(analysis.brand, None);
        assert_eq!(analysis.confidence, 65);
    }

    #[test]
    fn prose_reply_falls_back_to_the_input() {
        let analysis = parse_analysis("I think these are headphones.", AnalysisInput::Text("wireless headphones"));
        assert_eq!(analysis.query, "wireless headphones");
        assert_eq!(analysis.confidence, 0);

        let analysis = parse_analysis(
            "no idea",
            AnalysisInput::Url("https://shop.example/p/blue-denim-jacket"),
        );
        assert_eq!(analysis.query, "blue denim jacket");
    }

    #[test]
    fn prose_reply_for_an_image_uses_its_first_line() {
        let analysis = parse_analysis("\nA red running shoe\nwith white laces", AnalysisInput::Image(b"img"));
        assert_eq!(analysis.query, "A red running shoe");
    }

    #[test]
    fn mime_sniffing() {
        assert_eq!(sniff_mime(b"\x89PNG\r\n"), "image/png");
        assert_eq!(sniff_mime(b"\xff\xd8\xff"), "image/jpeg");
    }
}
