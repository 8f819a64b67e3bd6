//! Environment-driven configuration
//!
//! Values come from the process environment, optionally seeded from a `.env`
//! file by `dotenvy` in `main`. Provider credentials are optional: a provider
//! without them reports `NotConfigured` and the search degrades around it.

use anyhow::{Context, Result};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::rate_limiter::RateLimitPolicy;
use crate::sanitize::REDACTED;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub rate_limit: RateLimitPolicy,
    pub max_tracked_identities: usize,
    /// Key rate limits on `x-forwarded-for` / `x-real-ip`; only safe behind a proxy that sets them
    pub trust_forwarded_headers: bool,
    pub orchestrator: OrchestratorConfig,
    pub page: PageConfig,
    pub openai: OpenAiConfig,
    pub admitad: AdmitadConfig,
    pub affiliate: AffiliateConfig,
}

/// Knobs of a single search.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound for every adapter call
    pub adapter_timeout: Duration,
    /// Candidates kept after merging and filtering
    pub max_candidates: usize,
    /// Offers requested from each backend
    pub per_backend_limit: usize,
    /// Run content analysis on plain text queries as well
    pub analyze_text_queries: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            adapter_timeout: Duration::from_secs(8),
            max_candidates: 50,
            per_backend_limit: 20,
            analyze_text_queries: true,
        }
    }
}

/// Limits on fetching caller-supplied product pages.
#[derive(Debug, Clone)]
pub struct PageConfig {
    /// Hosts fetched even though they are not public, e.g. an internal catalog
    pub allowed_hosts: Vec<String>,
    pub max_body_bytes: usize,
    pub max_redirects: usize,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            max_body_bytes: 2 * 1024 * 1024,
            max_redirects: 5,
        }
    }
}

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub vision_model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            vision_model: "gpt-4o-mini".to_string(),
        }
    }
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| REDACTED))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("vision_model", &self.vision_model)
            .finish()
    }
}

#[derive(Clone)]
pub struct AdmitadConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Pre-encoded `client_id:client_secret` for the Basic header
    pub base64_header: Option<String>,
    pub base_url: String,
    pub website_id: Option<String>,
    pub scope: String,
}

impl AdmitadConfig {
    pub fn is_configured(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some() && self.base64_header.is_some()
    }
}

impl Default for AdmitadConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            base64_header: None,
            base_url: "https://api.admitad.com".to_string(),
            website_id: None,
            scope: "public advcampaigns deeplink_generator".to_string(),
        }
    }
}

impl fmt::Debug for AdmitadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmitadConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| REDACTED))
            .field("base64_header", &self.base64_header.as_ref().map(|_| REDACTED))
            .field("base_url", &self.base_url)
            .field("website_id", &self.website_id)
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AffiliateConfig {
    pub amazon_tag: Option<String>,
    /// Value of a `ref` parameter appended to links no other rule monetizes
    pub ref_param: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = parse_or(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?;
        let database_url =
            get("DATABASE_URL").unwrap_or_else(|| "sqlite:database/searches.db".to_string());

        let rate_limit = RateLimitPolicy {
            limit: parse_or(&get, "RATE_LIMIT_MAX_REQUESTS", 10)?,
            window: Duration::from_millis(parse_or(&get, "RATE_LIMIT_WINDOW_MS", 60_000)?),
        };
        let max_tracked_identities = parse_or(&get, "RATE_LIMIT_MAX_IDENTITIES", 10_000)?;
        let trust_forwarded_headers = parse_or(&get, "TRUST_FORWARDED_HEADERS", false)?;

        let defaults = OrchestratorConfig::default();
        let orchestrator = OrchestratorConfig {
            adapter_timeout: Duration::from_millis(parse_or(
                &get,
                "ADAPTER_TIMEOUT_MS",
                defaults.adapter_timeout.as_millis() as u64,
            )?),
            max_candidates: parse_or(&get, "MAX_CANDIDATES", defaults.max_candidates)?,
            per_backend_limit: parse_or(&get, "PER_BACKEND_LIMIT", defaults.per_backend_limit)?,
            analyze_text_queries: parse_or(
                &get,
                "ANALYZE_TEXT_QUERIES",
                defaults.analyze_text_queries,
            )?,
        };

        let page_defaults = PageConfig::default();
        let page = PageConfig {
            allowed_hosts: get("PAGE_FETCH_ALLOWED_HOSTS")
                .map(|hosts| {
                    hosts
                        .split(',')
                        .map(str::trim)
                        .filter(|h| !h.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            max_body_bytes: parse_or(&get, "PAGE_MAX_BODY_BYTES", page_defaults.max_body_bytes)?,
            max_redirects: parse_or(&get, "PAGE_MAX_REDIRECTS", page_defaults.max_redirects)?,
        };

        let openai_defaults = OpenAiConfig::default();
        let openai = OpenAiConfig {
            api_key: get("OPENAI_API_KEY"),
            base_url: get("OPENAI_BASE_URL").unwrap_or(openai_defaults.base_url),
            model: get("OPENAI_MODEL").unwrap_or(openai_defaults.model),
            vision_model: get("OPENAI_VISION_MODEL").unwrap_or(openai_defaults.vision_model),
        };

        let admitad_defaults = AdmitadConfig::default();
        let admitad = AdmitadConfig {
            client_id: get("ADMITAD_CLIENT_ID"),
            client_secret: get("ADMITAD_CLIENT_SECRET"),
            base64_header: get("ADMITAD_BASE64_HEADER"),
            base_url: get("ADMITAD_BASE_URL").unwrap_or(admitad_defaults.base_url),
            website_id: get("ADMITAD_WEBSITE_ID"),
            scope: get("ADMITAD_SCOPE").unwrap_or(admitad_defaults.scope),
        };

        let affiliate = AffiliateConfig {
            amazon_tag: get("AMAZON_ASSOCIATE_TAG"),
            ref_param: get("AFFILIATE_REF"),
        };

        Ok(Self {
            bind_addr,
            database_url,
            rate_limit,
            max_tracked_identities,
            trust_forwarded_headers,
            orchestrator,
            page,
            openai,
            admitad,
            affiliate,
        })
    }

    /// Logs a warning for every provider running in degraded mode.
    pub fn warn_unconfigured(&self) {
        if self.openai.api_key.is_none() {
            warn!("OPENAI_API_KEY not set - content analysis is disabled, URL and image searches will degrade");
        }
        if !self.admitad.is_configured() {
            warn!("ADMITAD_CLIENT_ID / ADMITAD_CLIENT_SECRET / ADMITAD_BASE64_HEADER not set - alternative search returns no offers");
        }
        if self.affiliate.amazon_tag.is_none() {
            warn!("AMAZON_ASSOCIATE_TAG not set - Amazon links are not monetized");
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid value for {key}: '{raw}'")),
        None => Ok(default),
    }
}
