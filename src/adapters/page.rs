//! Product-detail extraction straight from a product page
//!
//! The page is fetched once and read in three passes, first hit wins:
//! JSON-LD `Product` blocks, OpenGraph / `product:` meta tags, then plain
//! CSS fallbacks (`h1`, `[itemprop=price]`, `<title>`).

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use scraper::{Html, Selector};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::adapters::{USER_AGENT, name_field, number_field};
use crate::config::PageConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::models::{CandidateProduct, DEFAULT_CURRENCY, Money};
use crate::outbound;
use crate::sanitize::sanitize_url;
use crate::traits::{ProductDetail, status_error};

pub struct PageScraper {
    client: Client,
    config: PageConfig,
}

impl PageScraper {
    pub fn new(config: PageConfig, timeout: Duration) -> reqwest::Result<Self> {
        // Redirects are followed by hand so every hop is checked
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .redirect(Policy::none())
            .build()?;
        Ok(Self { client, config })
    }

    async fn get_public(&self, url: &str) -> AdapterResult<Response> {
        let mut target = Url::parse(url).map_err(|_| AdapterError::MalformedResponse)?;
        let mut hops = 0;

        loop {
            outbound::ensure_public(&target, &self.config.allowed_hosts).await?;
            let response = self.client.get(target.clone()).send().await?;
            let status = response.status();
            if !status.is_redirection() {
                return Ok(response);
            }

            hops += 1;
            if hops > self.config.max_redirects {
                warn!("Too many redirects fetching {}", sanitize_url(url));
                return Err(status_error(status));
            }
            target = response
                .headers()
                .get(LOCATION)
                .and_then(|location| location.to_str().ok())
                .and_then(|location| target.join(location).ok())
                .ok_or_else(|| status_error(status))?;
            debug!("Following redirect to {}", sanitize_url(target.as_str()));
        }
    }

    /// Reads the body, giving up once it grows past `max_body_bytes`.
    async fn read_capped(&self, mut response: Response) -> AdapterResult<String> {
        let limit = self.config.max_body_bytes;
        if let Some(declared) = response.content_length().filter(|len| *len > limit as u64) {
            warn!("Product page declares {} bytes, over the {} byte limit", declared, limit);
            return Err(AdapterError::MalformedResponse);
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                warn!("Product page exceeded the {} byte limit", limit);
                return Err(AdapterError::MalformedResponse);
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[async_trait]
impl ProductDetail for PageScraper {
    fn name(&self) -> &str {
        "page-scraper"
    }

    async fn fetch(&self, url: &str) -> AdapterResult<CandidateProduct> {
        info!("Fetching product page {}", sanitize_url(url));

        let response = self.get_public(url).await?;
        if !response.status().is_success() {
            return Err(status_error(response.status()));
        }

        let html = self.read_capped(response).await?;
        let product = extract_product(&html, url)?;
        debug!("Extracted {} at {}", product.title, product.offer_price);
        Ok(product)
    }
}

/// Fields gathered from a page before they are turned into a candidate.
#[derive(Debug, Default)]
struct PageFields {
    title: Option<String>,
    price: Option<f64>,
    list_price: Option<f64>,
    currency: Option<String>,
    image: Option<String>,
    store: Option<String>,
    brand: Option<String>,
    category: Option<String>,
    availability: Option<String>,
    rating: Option<f64>,
    reviews: Option<f64>,
}

impl PageFields {
    /// Fills every still-empty field from `other`.
    fn merge(&mut self, other: PageFields) {
        macro_rules! fill {
            ($($field:ident),*) => { $( if self.$field.is_none() { self.$field = other.$field; } )* };
        }
        fill!(title, price, list_price, currency, image, store, brand, category, availability, rating, reviews);
    }
}

/// Parses a product page into a candidate. Title and price are required.
pub fn extract_product(html: &str, page_url: &str) -> AdapterResult<CandidateProduct> {
    let document = Html::parse_document(html);

    let mut fields = from_json_ld(&document);
    fields.merge(from_meta(&document));
    fields.merge(from_markup(&document));

    let title = fields.title.ok_or(AdapterError::MalformedResponse)?;
    let price = fields
        .price
        .filter(|p| *p >= 0.0)
        .ok_or(AdapterError::MalformedResponse)?;

    let currency = fields.currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    let offer = Money::from_decimal(price, currency.clone());
    let list = fields
        .list_price
        .map_or_else(|| offer.clone(), |lp| Money::from_decimal(lp, currency));
    let store = fields
        .store
        .or_else(|| host_name(page_url))
        .unwrap_or_else(|| "Unknown Store".to_string());
    let image = fields.image.map(|src| absolutize(&src, page_url));

    Ok(CandidateProduct::new(title, store, list, offer, page_url)
        .with_image(image)
        .with_brand(fields.brand)
        .with_category(fields.category)
        .with_rating(fields.rating.map(|r| r as f32))
        .with_reviews(fields.reviews.map_or(0, |r| r.max(0.0) as u32))
        .with_availability(fields.availability.unwrap_or_else(|| "unknown".to_string())))
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn text_of(document: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    document
        .select(&sel)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|t| !t.is_empty())
}

fn attr_of(document: &Html, css: &str, attr: &str) -> Option<String> {
    let sel = selector(css)?;
    document
        .select(&sel)
        .filter_map(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn meta(document: &Html, property: &str) -> Option<String> {
    attr_of(document, &format!(r#"meta[property="{property}"]"#), "content")
        .or_else(|| attr_of(document, &format!(r#"meta[name="{property}"]"#), "content"))
}

fn from_meta(document: &Html) -> PageFields {
    PageFields {
        title: meta(document, "og:title"),
        price: meta(document, "product:price:amount")
            .or_else(|| meta(document, "og:price:amount"))
            .and_then(|p| parse_price(&p)),
        list_price: meta(document, "product:original_price:amount").and_then(|p| parse_price(&p)),
        currency: meta(document, "product:price:currency")
            .or_else(|| meta(document, "og:price:currency")),
        image: meta(document, "og:image"),
        store: meta(document, "og:site_name"),
        brand: meta(document, "product:brand"),
        category: meta(document, "product:category"),
        availability: meta(document, "product:availability")
            .or_else(|| meta(document, "og:availability")),
        ..PageFields::default()
    }
}

fn from_markup(document: &Html) -> PageFields {
    PageFields {
        title: text_of(document, "h1").or_else(|| text_of(document, "title")),
        price: attr_of(document, r#"[itemprop="price"]"#, "content")
            .or_else(|| text_of(document, r#"[itemprop="price"]"#))
            .and_then(|p| parse_price(&p)),
        currency: attr_of(document, r#"[itemprop="priceCurrency"]"#, "content"),
        image: attr_of(document, r#"[itemprop="image"]"#, "src")
            .or_else(|| attr_of(document, r#"[itemprop="image"]"#, "content")),
        ..PageFields::default()
    }
}

fn from_json_ld(document: &Html) -> PageFields {
    let Some(sel) = selector(r#"script[type="application/ld+json"]"#) else {
        return PageFields::default();
    };

    document
        .select(&sel)
        .filter_map(|el| serde_json::from_str::<Value>(&el.text().collect::<String>()).ok())
        .find_map(|json| find_product(&json).map(product_fields))
        .unwrap_or_default()
}

fn is_product(value: &Value) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => t == "Product",
        Some(Value::Array(types)) => types.iter().any(|t| t == "Product"),
        _ => false,
    }
}

fn find_product(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_product),
        Value::Object(map) => {
            if is_product(value) {
                Some(value)
            } else {
                map.get("@graph").and_then(find_product)
            }
        }
        _ => None,
    }
}

fn product_fields(product: &Value) -> PageFields {
    let offer = match product.get("offers") {
        Some(Value::Array(offers)) => offers.first(),
        other => other,
    };
    let offer_field = |key: &str| offer.and_then(|o| o.get(key));

    let image = match product.get("image") {
        Some(Value::String(src)) => Some(src.clone()),
        Some(Value::Array(images)) => images.iter().find_map(|i| {
            i.as_str()
                .map(str::to_string)
                .or_else(|| i.get("url").and_then(Value::as_str).map(str::to_string))
        }),
        Some(Value::Object(img)) => img.get("url").and_then(Value::as_str).map(str::to_string),
        _ => None,
    };

    let rating = product.get("aggregateRating");
    let rating_field = |key: &str| rating.and_then(|r| r.get(key)).and_then(number_field);

    PageFields {
        title: product.get("name").and_then(name_field),
        price: offer_field("price")
            .or_else(|| offer_field("lowPrice"))
            .and_then(number_field),
        list_price: offer_field("highPrice").and_then(number_field),
        currency: offer_field("priceCurrency").and_then(name_field),
        image,
        store: offer_field("seller").and_then(name_field),
        brand: product.get("brand").and_then(name_field),
        category: product.get("category").and_then(name_field),
        availability: offer_field("availability")
            .and_then(Value::as_str)
            .map(|a| a.rsplit('/').next().unwrap_or(a).to_string()),
        rating: rating_field("ratingValue"),
        reviews: rating_field("reviewCount").or_else(|| rating_field("ratingCount")),
    }
}

/// Parses prices like `$1,299.99`, `1.299,99 €` or `49`.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');
    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (None, Some(comma)) if cleaned.len() - comma - 1 == 2 => cleaned.replace(',', "."),
        (None, Some(_)) => cleaned.replace(',', ""),
        _ => cleaned,
    };

    normalized.trim_matches('.').parse().ok()
}

fn host_name(page_url: &str) -> Option<String> {
    let parsed = url::Url::parse(page_url).ok()?;
    let host = parsed.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

fn absolutize(src: &str, page_url: &str) -> String {
    if src.starts_with("http") {
        src.to_string()
    } else if src.starts_with("//") {
        format!("https:{src}")
    } else {
        url::Url::parse(page_url)
            .and_then(|base| base.join(src))
            .map_or_else(|_| src.to_string(), |u| u.to_string())
    }
}
