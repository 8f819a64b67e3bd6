//! Traits and interfaces for provider adapters
//!
//! Every upstream capability the orchestrator needs sits behind one of these
//! traits. Implementations convert provider-specific payloads into the
//! canonical models and provider failures into [`AdapterError`].

use async_trait::async_trait;

use crate::error::{AdapterError, AdapterResult};
use crate::models::{CandidateProduct, ContentAnalysis};

/// What the content analyzer is asked to look at.
#[derive(Debug, Clone, Copy)]
pub enum AnalysisInput<'a> {
    Text(&'a str),
    Url(&'a str),
    Image(&'a [u8]),
}

impl AnalysisInput<'_> {
    /// Query to fall back to when the analyzer returns nothing usable.
    pub fn fallback_query(&self) -> String {
        match self {
            Self::Text(text) => text.trim().to_string(),
            Self::Url(url) => query_from_url(url).unwrap_or_default(),
            Self::Image(_) => String::new(),
        }
    }
}

/// Options passed to an alternative-search backend.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Restrict to a category when the backend supports it
    pub category: Option<String>,
    /// Maximum number of offers to return
    pub limit: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            category: None,
            limit: 20,
        }
    }
}

/// Turns text, a URL or an image into a canonical query plus hints.
///
/// Implementations must degrade unparseable upstream output into a
/// best-effort [`ContentAnalysis`] instead of returning `MalformedResponse`.
#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, input: AnalysisInput<'_>) -> AdapterResult<ContentAnalysis>;
}

/// Searches a product network for offers matching a query.
#[async_trait]
pub trait AlternativeSearch: Send + Sync {
    fn name(&self) -> &str;

    /// # Returns
    /// * `AdapterResult<Vec<CandidateProduct>>` - offers, possibly empty
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> AdapterResult<Vec<CandidateProduct>>;
}

/// Extracts the product shown on a single page.
#[async_trait]
pub trait ProductDetail: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, url: &str) -> AdapterResult<CandidateProduct>;
}

/// Rewrites a destination URL into a monetized one.
#[async_trait]
pub trait LinkRewriter: Send + Sync {
    fn name(&self) -> &str;

    async fn rewrite(&self, store: &str, destination_url: &str) -> AdapterResult<String>;

    /// Never fails: any error yields the destination URL unchanged.
    async fn rewrite_or_original(&self, store: &str, destination_url: &str) -> String {
        match self.rewrite(store, destination_url).await {
            Ok(url) if !url.trim().is_empty() => url,
            Ok(_) => destination_url.to_string(),
            Err(err) => {
                tracing::debug!(
                    "{} link rewrite failed, keeping destination url: {}",
                    self.name(),
                    err
                );
                destination_url.to_string()
            }
        }
    }
}

/// Derives a human query from the last meaningful path segment of a URL.
///
/// `https://shop.example/p/sony-wh-1000xm5-headphones?ref=x` becomes
/// `sony wh 1000xm5 headphones`.
pub fn query_from_url(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let segment = parsed
        .path_segments()?
        .rev()
        .map(|s| urlencoding::decode(s).map(|d| d.into_owned()).unwrap_or_default())
        .find(|s| s.chars().any(char::is_alphabetic) && s.len() > 3)?;

    let stem = segment
        .rsplit_once('.')
        .filter(|(_, ext)| matches!(*ext, "html" | "htm" | "php" | "aspx"))
        .map_or(segment.as_str(), |(stem, _)| stem);

    let words: Vec<&str> = stem
        .split(|c: char| c == '-' || c == '_' || c == '+' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .collect();

    if words.is_empty() {
        None
    } else {
        Some(words.join(" ").to_lowercase())
    }
}

/// Maps a non-success HTTP status into the adapter error space.
pub fn status_error(status: reqwest::StatusCode) -> AdapterError {
    AdapterError::UpstreamUnavailable(status.as_u16())
}
