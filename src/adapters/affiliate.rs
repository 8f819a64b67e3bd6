//! Affiliate link rewriting

use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;
use url::Url;

use crate::adapters::AdmitadClient;
use crate::config::AffiliateConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::traits::LinkRewriter;

/// Rewrites destination URLs into monetized links.
///
/// Admitad tracking links are already monetized and pass through untouched.
/// Otherwise the rules apply in order, first match wins:
/// 1. Amazon stores get the associate `tag` parameter
/// 2. Other stores go through the Admitad deeplink generator, when configured
/// 3. A generic `ref` parameter, when configured
/// 4. The URL unchanged
pub struct AffiliateLinker {
    amazon_tag: Option<String>,
    ref_param: Option<String>,
    admitad: Option<Arc<AdmitadClient>>,
}

impl AffiliateLinker {
    pub fn new(config: AffiliateConfig, admitad: Option<Arc<AdmitadClient>>) -> Self {
        Self {
            amazon_tag: config.amazon_tag,
            ref_param: config.ref_param,
            admitad: admitad.filter(|client| client.is_configured()),
        }
    }

    /// A linker that returns every URL unchanged.
    pub fn disabled() -> Self {
        Self::new(AffiliateConfig::default(), None)
    }
}

#[async_trait]
impl LinkRewriter for AffiliateLinker {
    fn name(&self) -> &str {
        "affiliate"
    }

    async fn rewrite(&self, store: &str, destination_url: &str) -> AdapterResult<String> {
        let url = Url::parse(destination_url).map_err(|_| AdapterError::MalformedResponse)?;

        if is_admitad_link(&url) {
            trace!("{} link is already an admitad link", store);
            return Ok(destination_url.to_string());
        }

        if let Some(tag) = &self.amazon_tag
            && is_amazon(store, &url)
        {
            trace!("Tagging {} amazon link", store);
            return Ok(set_query_param(url, "tag", tag));
        }

        if let Some(admitad) = &self.admitad {
            return admitad.deeplink(destination_url).await;
        }

        match &self.ref_param {
            Some(reference) => Ok(set_query_param(url, "ref", reference)),
            None => Ok(destination_url.to_string()),
        }
    }
}

fn is_amazon(store: &str, url: &Url) -> bool {
    if store.to_lowercase().contains("amazon") {
        return true;
    }
    url.host_str().is_some_and(|host| {
        let host = host.to_lowercase();
        host == "amzn.to" || host.split('.').any(|label| label == "amazon")
    })
}

fn is_admitad_link(url: &Url) -> bool {
    url.host_str().is_some_and(|host| {
        host.to_lowercase()
            .split('.')
            .any(|label| label == "admitad")
    })
}

/// Replaces `key` in the query string, keeping every other parameter.
fn set_query_param(mut url: Url, key: &str, value: &str) -> String {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(key, value);
    url.to_string()
}
