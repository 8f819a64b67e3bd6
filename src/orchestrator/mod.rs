//! Search orchestration
//!
//! One search runs as a single pass through
//! `Received -> Classified -> QueryResolved -> CandidatesGathered ->
//! LinksRewritten -> Ranked -> Completed`. Only request validation can end a
//! search in `Errored`; adapter failures degrade the result instead, and each
//! one is listed in [`SearchResponse::degraded`].

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::{AdmitadClient, AffiliateLinker, OpenAiAnalyzer, PageScraper};
use crate::config::{AppConfig, OrchestratorConfig};
use crate::database::SearchHistory;
use crate::error::{AdapterError, AdapterResult, SearchResult};
use crate::models::{
    CandidateProduct, ContentAnalysis, DegradedSource, SearchInput, SearchPayload, SearchRequest,
    SearchResponse,
};
use crate::ranking;
use crate::traits::{
    AlternativeSearch, AnalysisInput, ContentAnalyzer, LinkRewriter, ProductDetail, SearchOptions,
    query_from_url,
};

/// Progress of one search, logged at every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Received,
    Classified,
    QueryResolved,
    CandidatesGathered,
    LinksRewritten,
    Ranked,
    Completed,
    Errored,
}

/// Outcome of the query-resolution step.
#[derive(Debug, Default)]
struct Resolution {
    query: Option<String>,
    primary: Option<CandidateProduct>,
    analysis: Option<ContentAnalysis>,
}

pub struct SearchOrchestrator {
    analyzer: Option<Arc<dyn ContentAnalyzer>>,
    product_detail: Option<Arc<dyn ProductDetail>>,
    backends: Vec<Arc<dyn AlternativeSearch>>,
    linker: Arc<dyn LinkRewriter>,
    history: Option<SearchHistory>,
    config: OrchestratorConfig,
}

impl SearchOrchestrator {
    /// An orchestrator with no adapters and a pass-through link rewriter.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            analyzer: None,
            product_detail: None,
            backends: Vec::new(),
            linker: Arc::new(AffiliateLinker::disabled()),
            history: None,
            config,
        }
    }

    /// Wires the production adapters from the application configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let timeout = config.orchestrator.adapter_timeout;
        let admitad = Arc::new(AdmitadClient::new(config.admitad.clone(), timeout)?);

        Ok(Self::new(config.orchestrator.clone())
            .with_analyzer(Arc::new(OpenAiAnalyzer::new(config.openai.clone(), timeout)?))
            .with_product_detail(Arc::new(PageScraper::new(config.page.clone(), timeout)?))
            .with_backend(admitad.clone())
            .with_link_rewriter(Arc::new(AffiliateLinker::new(
                config.affiliate.clone(),
                Some(admitad),
            ))))
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn ContentAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_product_detail(mut self, product_detail: Arc<dyn ProductDetail>) -> Self {
        self.product_detail = Some(product_detail);
        self
    }

    /// Adds an alternative-search backend. Results merge in the order backends were added.
    pub fn with_backend(mut self, backend: Arc<dyn AlternativeSearch>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn with_link_rewriter(mut self, linker: Arc<dyn LinkRewriter>) -> Self {
        self.linker = linker;
        self
    }

    pub fn with_history(mut self, history: SearchHistory) -> Self {
        self.history = Some(history);
        self
    }

    /// Validates a wire payload and runs the search.
    pub async fn search_payload(&self, payload: SearchPayload) -> SearchResult<SearchResponse> {
        let request = SearchRequest::try_from(payload).inspect_err(|err| {
            debug!("Search rejected ({:?}): {}", SearchState::Errored, err);
        })?;
        Ok(self.search(request).await)
    }

    /// Runs one validated search. Adapter failures never make this fail.
    pub async fn search(&self, request: SearchRequest) -> SearchResponse {
        let id = Uuid::new_v4().to_string();
        let modality = request.modality();
        debug!("Search {} {:?} as {}", id, SearchState::Received, modality);
        debug!("Search {} {:?}", id, SearchState::Classified);

        let mut degraded = Vec::new();

        let Resolution {
            query,
            mut primary,
            analysis,
        } = self.resolve_query(&request.input, &mut degraded).await;
        debug!("Search {} {:?}: {:?}", id, SearchState::QueryResolved, query);

        let mut candidates = match query.as_deref() {
            Some(query) => {
                let options = SearchOptions {
                    category: analysis.as_ref().and_then(|a| a.category.clone()),
                    limit: self.config.per_backend_limit,
                };
                self.gather(query, &options, &mut degraded).await
            }
            None => Vec::new(),
        };
        if !request.filters.is_empty() {
            candidates.retain(|candidate| request.filters.matches(candidate));
        }
        debug!(
            "Search {} {:?}: {} candidates",
            id,
            SearchState::CandidatesGathered,
            candidates.len()
        );

        join_all(
            candidates
                .iter_mut()
                .chain(primary.iter_mut())
                .map(|product| self.rewrite_link(product)),
        )
        .await;
        debug!("Search {} {:?}", id, SearchState::LinksRewritten);

        ranking::rank(&mut candidates, request.sort, analysis.as_ref());
        // Savings look at every filtered candidate, not just the ones returned
        let savings = ranking::calculate_savings(primary.as_ref(), &candidates);
        candidates.truncate(self.config.max_candidates);
        debug!("Search {} {:?}", id, SearchState::Ranked);

        let response = SearchResponse {
            id,
            query: query.unwrap_or_default(),
            modality,
            primary_product: primary,
            candidates,
            savings,
            analysis,
            degraded,
            timestamp: Utc::now(),
        };

        info!(
            "Search {} completed: {} candidates, {} degraded sources",
            response.id,
            response.candidates.len(),
            response.degraded.len()
        );
        debug!("Search {} {:?}", response.id, SearchState::Completed);

        if let Some(history) = &self.history
            && let Err(err) = history
                .record(&response, request.requester_identity.as_deref())
                .await
        {
            warn!("Failed to record search {}: {:#}", response.id, err);
        }

        response
    }

    async fn resolve_query(
        &self,
        input: &SearchInput,
        degraded: &mut Vec<DegradedSource>,
    ) -> Resolution {
        match input {
            SearchInput::Text(text) => {
                let analysis = if self.config.analyze_text_queries && self.analyzer.is_some() {
                    self.analyze(AnalysisInput::Text(text), degraded).await
                } else {
                    None
                };
                Resolution {
                    query: Some(text.clone()),
                    primary: None,
                    analysis,
                }
            }
            SearchInput::Url(url) => {
                let primary = match &self.product_detail {
                    Some(detail) => self
                        .bounded(detail.fetch(url))
                        .await
                        .map_err(|err| degrade(degraded, detail.name(), &err))
                        .ok(),
                    None => {
                        degrade(degraded, "product-detail", &AdapterError::NotConfigured);
                        None
                    }
                };

                if let Some(primary) = primary {
                    return Resolution {
                        query: Some(primary.title.clone()),
                        primary: Some(primary),
                        analysis: None,
                    };
                }

                let analysis = self.analyze(AnalysisInput::Url(url), degraded).await;
                let query = analysis
                    .as_ref()
                    .map(|a| a.query.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .or_else(|| query_from_url(url));
                Resolution {
                    query,
                    primary: None,
                    analysis,
                }
            }
            SearchInput::Image(bytes) => {
                let analysis = self.analyze(AnalysisInput::Image(bytes), degraded).await;
                let query = analysis
                    .as_ref()
                    .map(|a| a.query.trim().to_string())
                    .filter(|q| !q.is_empty());
                Resolution {
                    query,
                    primary: None,
                    analysis,
                }
            }
        }
    }

    async fn analyze(
        &self,
        input: AnalysisInput<'_>,
        degraded: &mut Vec<DegradedSource>,
    ) -> Option<ContentAnalysis> {
        let Some(analyzer) = &self.analyzer else {
            degrade(degraded, "content-analysis", &AdapterError::NotConfigured);
            return None;
        };
        self.bounded(analyzer.analyze(input))
            .await
            .map_err(|err| degrade(degraded, analyzer.name(), &err))
            .ok()
    }

    /// Queries every backend concurrently and merges the successes in backend order.
    async fn gather(
        &self,
        query: &str,
        options: &SearchOptions,
        degraded: &mut Vec<DegradedSource>,
    ) -> Vec<CandidateProduct> {
        let outcomes = join_all(self.backends.iter().map(|backend| async move {
            (backend.name(), self.bounded(backend.search(query, options)).await)
        }))
        .await;

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(products) => {
                    debug!("{} answered with {} offers", name, products.len());
                    merged.extend(
                        products
                            .into_iter()
                            .filter(|product| seen.insert(product.id.clone())),
                    );
                }
                Err(err) => degrade(degraded, name, &err),
            }
        }
        merged
    }

    /// Sets `affiliate_url`, falling back to the destination on any failure.
    ///
    /// Products whose source already returned a monetized link keep it.
    async fn rewrite_link(&self, product: &mut CandidateProduct) {
        if product.is_monetized() {
            return;
        }

        let rewritten = tokio::time::timeout(
            self.config.adapter_timeout,
            self.linker
                .rewrite_or_original(&product.store, &product.destination_url),
        )
        .await;

        product.affiliate_url = match rewritten {
            Ok(url) => url,
            Err(_) => {
                debug!("{} timed out, keeping destination url", self.linker.name());
                product.destination_url.clone()
            }
        };
    }

    /// Bounds an adapter call by the configured timeout.
    async fn bounded<T>(&self, call: impl Future<Output = AdapterResult<T>>) -> AdapterResult<T> {
        tokio::time::timeout(self.config.adapter_timeout, call)
            .await
            .unwrap_or(Err(AdapterError::Timeout))
    }
}

fn degrade(degraded: &mut Vec<DegradedSource>, adapter: &str, err: &AdapterError) {
    match err {
        AdapterError::NotConfigured => debug!("{} not configured, degrading", adapter),
        _ => warn!("{} failed, degrading: {}", adapter, err),
    }
    degraded.push(DegradedSource {
        adapter: adapter.to_string(),
        reason: err.label().to_string(),
    });
}
