//! HTTP entry point
//!
//! `POST /api/search` is rate limited before the payload is validated, so a
//! flood of malformed requests is rejected as cheaply as a flood of valid ones.
//! History routes only ever return the searches of the identity asking.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{ConnectInfo, Path, Query, Request, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::database::{SavingsTotal, SearchHistory, SearchRecord};
use crate::error::{ErrorKind, SearchError};
use crate::models::{SearchPayload, SearchResponse};
use crate::orchestrator::SearchOrchestrator;
use crate::rate_limiter::{ANONYMOUS_IDENTITY, RateLimitInfo, RateLimitPolicy, RateLimiter};
use crate::sanitize::redact_secrets;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SearchOrchestrator>,
    pub limiter: Arc<RateLimiter>,
    pub policy: RateLimitPolicy,
    pub history: Option<SearchHistory>,
    /// Key rate limits on `x-forwarded-for` / `x-real-ip`
    pub trust_forwarded_headers: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/search", post(search))
        .route("/api/search/:id", get(get_search))
        .route("/api/searches", get(recent_searches))
        .route("/api/savings", get(total_savings))
        .route("/api/rate-limit", get(rate_limit_info))
        .with_state(state)
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn run_http_server(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {err}");
        }
    })
    .await
    .context("server error")?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn search(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<SearchPayload>, JsonRejection>,
) -> Result<Json<SearchResponse>, SearchError> {
    let declared = payload
        .as_ref()
        .ok()
        .and_then(|Json(p)| p.requester_identity.as_deref());
    let identity = rate_limit_identity(
        declared,
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.trust_forwarded_headers,
    );
    state.limiter.check(&identity, state.policy)?;

    let Json(payload) =
        payload.map_err(|rejection| SearchError::InvalidInput(rejection.body_text()))?;
    let response = state.orchestrator.search_payload(payload).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    identity: Option<String>,
    limit: Option<u32>,
}

/// History store and the identity whose history is being read.
fn history_scope<'a>(
    state: &'a AppState,
    query: &HistoryQuery,
    headers: &HeaderMap,
) -> Result<(&'a SearchHistory, String), Response> {
    let Some(history) = &state.history else {
        return Err(not_found("Search history is disabled"));
    };

    let identity = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .or(query.identity.as_deref())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            SearchError::InvalidInput("An identity is required to read search history".to_string())
                .into_response()
        })?;

    Ok((history, identity.to_string()))
}

async fn get_search(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<SearchRecord>, Response> {
    let (history, identity) = history_scope(&state, &query, &headers)?;

    match history.find_for(&id, &identity).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(not_found("Search not found")),
        Err(err) => Err(SearchError::Internal(err.to_string()).into_response()),
    }
}

async fn recent_searches(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<SearchRecord>>, Response> {
    let (history, identity) = history_scope(&state, &query, &headers)?;

    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    history
        .recent_for(&identity, limit)
        .await
        .map(Json)
        .map_err(|err| SearchError::Internal(err.to_string()).into_response())
}

async fn total_savings(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<SavingsTotal>, Response> {
    let (history, identity) = history_scope(&state, &query, &headers)?;

    history
        .total_savings(&identity)
        .await
        .map(Json)
        .map_err(|err| SearchError::Internal(err.to_string()).into_response())
}

#[derive(Debug, Deserialize)]
struct RateLimitQuery {
    identity: Option<String>,
}

async fn rate_limit_info(
    State(state): State<AppState>,
    Query(query): Query<RateLimitQuery>,
) -> Result<Json<RateLimitInfo>, Response> {
    let identity = query
        .identity
        .filter(|i| !i.trim().is_empty())
        .unwrap_or_else(|| ANONYMOUS_IDENTITY.to_string());

    state
        .limiter
        .info(&identity)
        .map(Json)
        .ok_or_else(|| not_found("No rate limit window for this identity"))
}

/// Declared identity, then `x-user-id`, then the client address, then the shared anonymous bucket.
///
/// The client address comes from `x-forwarded-for` / `x-real-ip` only when
/// `trust_forwarded` is set, otherwise from the socket peer.
pub fn rate_limit_identity(
    declared: Option<&str>,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded: bool,
) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let forwarded = || {
        header_value("x-forwarded-for")
            .and_then(|forwarded| forwarded.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| header_value("x-real-ip"))
    };

    declared
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header_value("x-user-id"))
        .map(str::to_string)
        .or_else(|| trust_forwarded.then(forwarded).flatten().map(str::to_string))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| ANONYMOUS_IDENTITY.to_string())
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "message": message }))).into_response()
}

impl IntoResponse for SearchError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Internal => {
                error!("search failed: {}", redact_secrets(&self.to_string()));
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "kind": self.kind(),
            "message": self.public_message(),
        }));
        let mut response = (status, body).into_response();

        if let Self::RateLimited { retry_after } = self {
            let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}
