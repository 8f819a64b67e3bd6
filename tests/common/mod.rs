#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use deal_finder::error::{AdapterError, AdapterResult};
use deal_finder::models::{CandidateProduct, ContentAnalysis, Money};
use deal_finder::traits::{
    AlternativeSearch, AnalysisInput, ContentAnalyzer, LinkRewriter, ProductDetail, SearchOptions,
};

pub fn product(title: &str, store: &str, list: f64, offer: f64) -> CandidateProduct {
    CandidateProduct::new(
        title,
        store,
        Money::usd(list),
        Money::usd(offer),
        format!("https://{}.example/p/{}", store.to_lowercase(), title.to_lowercase()),
    )
}

/// Backend returning a fixed outcome, optionally after a delay, and recording queries.
pub struct StubSearch {
    name: String,
    outcome: AdapterResult<Vec<CandidateProduct>>,
    delay: Option<Duration>,
    pub queries: Mutex<Vec<(String, Option<String>)>>,
}

impl StubSearch {
    pub fn returning(name: &str, products: Vec<CandidateProduct>) -> Self {
        Self::with_outcome(name, Ok(products))
    }

    pub fn failing(name: &str, err: AdapterError) -> Self {
        Self::with_outcome(name, Err(err))
    }

    fn with_outcome(name: &str, outcome: AdapterResult<Vec<CandidateProduct>>) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            delay: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlternativeSearch for StubSearch {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> AdapterResult<Vec<CandidateProduct>> {
        self.queries
            .lock()
            .unwrap()
            .push((query.to_string(), options.category.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}

pub struct StubAnalyzer(pub AdapterResult<ContentAnalysis>);

#[async_trait]
impl ContentAnalyzer for StubAnalyzer {
    fn name(&self) -> &str {
        "stub-analyzer"
    }

    async fn analyze(&self, _input: AnalysisInput<'_>) -> AdapterResult<ContentAnalysis> {
        self.0.clone()
    }
}

pub struct StubDetail(pub AdapterResult<CandidateProduct>);

#[async_trait]
impl ProductDetail for StubDetail {
    fn name(&self) -> &str {
        "stub-detail"
    }

    async fn fetch(&self, _url: &str) -> AdapterResult<CandidateProduct> {
        self.0.clone()
    }
}

/// Rewriter whose every call fails.
pub struct BrokenLinker;

#[async_trait]
impl LinkRewriter for BrokenLinker {
    fn name(&self) -> &str {
        "broken-linker"
    }

    async fn rewrite(&self, _store: &str, _url: &str) -> AdapterResult<String> {
        Err(AdapterError::UpstreamUnavailable(502))
    }
}

/// Rewriter that appends a marker, so tests can see it ran.
pub struct TaggingLinker;

#[async_trait]
impl LinkRewriter for TaggingLinker {
    fn name(&self) -> &str {
        "tagging-linker"
    }

    async fn rewrite(&self, _store: &str, url: &str) -> AdapterResult<String> {
        Ok(format!("{url}?aff=1"))
    }
}
