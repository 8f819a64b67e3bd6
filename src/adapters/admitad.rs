//! Admitad affiliate network: product search and deeplink generation
//!
//! Authentication is an OAuth client-credentials exchange. The access token is
//! cached until one minute before it expires; the cache sits behind an async
//! mutex held across the refresh, so concurrent searches wait for the single
//! in-flight exchange instead of issuing their own.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::adapters::{http_client, json_body, name_field, number_field};
use crate::config::AdmitadConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::models::{CandidateProduct, DEFAULT_CURRENCY, Money};
use crate::traits::{AlternativeSearch, SearchOptions};

/// Tokens are refreshed this long before the upstream expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

pub struct AdmitadClient {
    client: Client,
    config: AdmitadConfig,
    token: Mutex<Option<CachedToken>>,
}

impl AdmitadClient {
    pub fn new(config: AdmitadConfig, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            config,
            token: Mutex::new(None),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Cached access token, exchanging credentials when missing or near expiry.
    async fn access_token(&self) -> AdapterResult<String> {
        let (Some(client_id), Some(client_secret), Some(basic)) = (
            &self.config.client_id,
            &self.config.client_secret,
            &self.config.base64_header,
        ) else {
            return Err(AdapterError::NotConfigured);
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.expires_at
        {
            return Ok(token.access_token.clone());
        }

        debug!("exchanging admitad client credentials");
        let response = self
            .client
            .post(self.endpoint("token/"))
            .header("Authorization", format!("Basic {basic}"))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("scope", self.config.scope.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("Admitad token exchange failed: {}", status);
            return Err(AdapterError::UpstreamUnavailable(status.as_u16()));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|_| AdapterError::UpstreamUnavailable(status.as_u16()))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        info!("Admitad access token refreshed, valid for {}s", lifetime.as_secs());
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn authorized_get(&self, url: &str) -> AdapterResult<Value> {
        let token = self.access_token().await?;
        let response = self.client.get(url).bearer_auth(token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
        }
        json_body("admitad", response).await
    }

    /// Monetized deeplink for `destination_url`.
    pub async fn deeplink(&self, destination_url: &str) -> AdapterResult<String> {
        let mut url = format!(
            "{}?url={}",
            self.endpoint("coupons/deeplink/"),
            urlencoding::encode(destination_url)
        );
        if let Some(website_id) = &self.config.website_id {
            url.push_str(&format!("&website_id={}", urlencoding::encode(website_id)));
        }

        let body = self.authorized_get(&url).await?;
        body.get("deeplink")
            .and_then(Value::as_str)
            .filter(|link| link.starts_with("http"))
            .map(str::to_string)
            .ok_or(AdapterError::MalformedResponse)
    }

    fn search_url(&self, query: &str, options: &SearchOptions) -> String {
        let path = match &self.config.website_id {
            Some(id) => format!("advcampaigns/website/{}/products/", urlencoding::encode(id)),
            None => "products/".to_string(),
        };
        let mut url = format!(
            "{}?q={}&limit={}",
            self.endpoint(&path),
            urlencoding::encode(query),
            options.limit
        );
        if let Some(category) = &options.category {
            url.push_str(&format!("&category={}", urlencoding::encode(category)));
        }
        url
    }
}

#[async_trait]
impl AlternativeSearch for AdmitadClient {
    fn name(&self) -> &str {
        "admitad"
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> AdapterResult<Vec<CandidateProduct>> {
        if !self.is_configured() {
            return Err(AdapterError::NotConfigured);
        }

        info!("Searching admitad for: {}", query);
        let body = self.authorized_get(&self.search_url(query, options)).await?;
        let products = parse_products(&body)?;

        info!("Found {} admitad offers for: {}", products.len(), query);
        Ok(products)
    }
}

/// Validates a product listing. Items that cannot become a candidate are skipped.
pub fn parse_products(body: &Value) -> AdapterResult<Vec<CandidateProduct>> {
    let results = body
        .get("results")
        .and_then(Value::as_array)
        .ok_or(AdapterError::MalformedResponse)?;

    let products = results
        .iter()
        .filter_map(|item| {
            let product = parse_product(item);
            if product.is_none() {
                trace!("Skipping incomplete admitad item: {}", item);
            }
            product
        })
        .collect();
    Ok(products)
}

fn parse_product(item: &Value) -> Option<CandidateProduct> {
    let title = item
        .get("name")
        .or_else(|| item.get("title"))
        .and_then(name_field)?;
    let tracking = http_link(item, &["deeplink", "gotoLink", "goto_link"]);
    let merchant = http_link(item, &["url", "productUrl", "product_url"]);
    let destination = merchant.or_else(|| tracking.clone())?;
    let price = item
        .get("price")
        .and_then(number_field)
        .filter(|p| *p >= 0.0)?;

    let currency = item
        .get("currency")
        .and_then(name_field)
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    let old_price = item
        .get("oldPrice")
        .or_else(|| item.get("old_price"))
        .and_then(number_field);
    let store = item
        .get("shop_name")
        .or_else(|| item.get("merchant"))
        .or_else(|| item.get("campaign"))
        .and_then(name_field)
        .unwrap_or_else(|| "Unknown Store".to_string());
    let image = http_link(item, &["image", "imageUrl", "picture"]);

    let offer = Money::from_decimal(price, currency.clone());
    let list = old_price.map_or_else(|| offer.clone(), |old| Money::from_decimal(old, currency));

    Some(
        CandidateProduct::new(title, store, list, offer, destination)
            .with_affiliate_url(tracking)
            .with_image(image)
            .with_category(item.get("category").and_then(name_field))
            .with_brand(item.get("vendor").or_else(|| item.get("brand")).and_then(name_field))
            .with_rating(item.get("rating").and_then(number_field).map(|r| r as f32))
            .with_reviews(
                item.get("reviewsCount")
                    .or_else(|| item.get("reviews_count"))
                    .and_then(number_field)
                    .map_or(0, |r| r.max(0.0) as u32),
            )
            .with_availability(
                match item.get("available").and_then(Value::as_bool) {
                    Some(false) => "out of stock",
                    _ => "in stock",
                },
            ),
    )
}

/// First value under `keys` that is an absolute http(s) link.
fn http_link(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| item.get(*key).and_then(Value::as_str))
        .find(|link| link.starts_with("http"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn results_are_normalized() {
        let body = json!({
            "results": [
                {"id": 1, "name": "Wireless Headphones", "price": "59.90", "oldPrice": 99,
                 "currency": "EUR", "deeplink": "https://ad.admitad.example/g/1",
                 "campaign": {"name": "Audio Store"}, "category": {"name": "Audio"},
                 "rating": 4.4, "reviewsCount": 87},
                {"id": 2, "name": "No link", "price": 10},
                {"id": 3, "name": "No price", "deeplink": "https://ad.admitad.example/g/3"}
            ]
        });
        let products = parse_products(&body).unwrap();

        assert_eq!(products.len(), 1);
        let p = &products[0];
        assert_eq!(p.store, "Audio Store");
        assert_eq!(p.offer_price, Money::new(5990, "EUR"));
        assert_eq!(p.list_price, Money::new(9900, "EUR"));
        assert_eq!(p.category.as_deref(), Some("Audio"));
        assert_eq!(p.review_count, 87);
        assert_eq!(p.destination_url, "https://ad.admitad.example/g/1");
        assert!(!p.is_monetized());
    }

    #[test]
    fn merchant_url_is_the_destination_and_deeplink_the_affiliate_link() {
        let body = json!({
            "results": [
                {"name": "Desk Lamp", "price": 25, "url": "https://lamps.example/p/7",
                 "gotoLink": "https://ad.admitad.com/g/7", "shop_name": "Lamps"}
            ]
        });
        let products = parse_products(&body).unwrap();

        assert_eq!(products[0].destination_url, "https://lamps.example/p/7");
        assert_eq!(products[0].affiliate_url, "https://ad.admitad.com/g/7");
        assert!(products[0].is_monetized());
    }

    #[test]
    fn body_without_results_is_malformed() {
        assert_eq!(
            parse_products(&json!({"detail": "oops"})).unwrap_err(),
            AdapterError::MalformedResponse
        );
    }

    #[test]
    fn empty_results_are_fine() {
        assert!(parse_products(&json!({"results": []})).unwrap().is_empty());
    }
}
