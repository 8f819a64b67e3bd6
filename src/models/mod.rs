//! Data models for search requests, product offers and search responses

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SearchError;
use crate::outbound;

pub const DEFAULT_CURRENCY: &str = "USD";

/// A price in the smallest unit of its currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Money {
    pub amount_cents: i64,
    pub currency: String,
}

impl Money {
    pub fn new(amount_cents: i64, currency: impl Into<String>) -> Self {
        Self {
            amount_cents,
            currency: currency.into(),
        }
    }

    /// Build from a decimal amount such as `49.99`.
    pub fn from_decimal(amount: f64, currency: impl Into<String>) -> Self {
        Self::new((amount * 100.0).round() as i64, currency)
    }

    pub fn zero(currency: impl Into<String>) -> Self {
        Self::new(0, currency)
    }

    pub fn usd(amount: f64) -> Self {
        Self::from_decimal(amount, DEFAULT_CURRENCY)
    }

    pub fn to_decimal(&self) -> f64 {
        self.amount_cents as f64 / 100.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.to_decimal(), self.currency)
    }
}

/// Kind of input a search carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Url,
    Image,
}

impl FromStr for Modality {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "url" => Ok(Self::Url),
            "image" => Ok(Self::Image),
            _ => Err(SearchError::InvalidInput("Invalid search type".to_string())),
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Url => "url",
            Self::Image => "image",
        };
        f.write_str(name)
    }
}

/// Validated search payload. Exactly one modality, by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchInput {
    Text(String),
    Url(String),
    Image(Vec<u8>),
}

impl SearchInput {
    pub fn modality(&self) -> Modality {
        match self {
            Self::Text(_) => Modality::Text,
            Self::Url(_) => Modality::Url,
            Self::Image(_) => Modality::Image,
        }
    }
}

/// Ordering applied to the candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    #[default]
    PriceAsc,
    PriceDesc,
    RatingDesc,
    ReviewsDesc,
    SimilarityDesc,
    DiscountDesc,
}

impl FromStr for SortOrder {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "price" | "price-low" | "price-asc" => Ok(Self::PriceAsc),
            "price-desc" | "price-high" => Ok(Self::PriceDesc),
            "rating" | "rating-desc" => Ok(Self::RatingDesc),
            "reviews" | "reviews-desc" => Ok(Self::ReviewsDesc),
            "similarity" | "similarity-desc" => Ok(Self::SimilarityDesc),
            "discount" | "discount-desc" => Ok(Self::DiscountDesc),
            other => Err(SearchError::InvalidInput(format!("Unknown sort order '{other}'"))),
        }
    }
}

/// Optional narrowing applied after candidates are merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchFilters {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub stores: Vec<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.min_price.is_none()
            && self.max_price.is_none()
            && self.stores.is_empty()
            && self.category.is_none()
            && self.brand.is_none()
    }

    pub fn matches(&self, product: &CandidateProduct) -> bool {
        let price = product.offer_price.amount_cents;
        if let Some(min) = self.min_price
            && price < Money::usd(min).amount_cents
        {
            return false;
        }
        if let Some(max) = self.max_price
            && price > Money::usd(max).amount_cents
        {
            return false;
        }
        if !self.stores.is_empty()
            && !self
                .stores
                .iter()
                .any(|store| store.eq_ignore_ascii_case(&product.store))
        {
            return false;
        }
        if let Some(category) = &self.category
            && !product
                .category
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(category))
        {
            return false;
        }
        if let Some(brand) = &self.brand
            && !product
                .brand
                .as_deref()
                .is_some_and(|b| b.eq_ignore_ascii_case(brand))
        {
            return false;
        }
        true
    }
}

/// Search request as it arrives on the wire, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPayload {
    #[serde(alias = "type")]
    pub modality: Option<String>,
    pub query: Option<String>,
    pub url: Option<String>,
    pub image_data: Option<String>,
    #[serde(alias = "userId")]
    pub requester_identity: Option<String>,
    #[serde(alias = "sortBy")]
    pub sort: Option<String>,
    #[serde(default)]
    pub filters: SearchFilters,
}

/// A validated, immutable search request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub input: SearchInput,
    pub requester_identity: Option<String>,
    pub sort: SortOrder,
    pub filters: SearchFilters,
}

impl SearchRequest {
    pub fn text(query: impl Into<String>) -> Self {
        Self::from_input(SearchInput::Text(query.into()))
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::from_input(SearchInput::Url(url.into()))
    }

    pub fn image(bytes: Vec<u8>) -> Self {
        Self::from_input(SearchInput::Image(bytes))
    }

    fn from_input(input: SearchInput) -> Self {
        Self {
            input,
            requester_identity: None,
            sort: SortOrder::default(),
            filters: SearchFilters::default(),
        }
    }

    pub fn modality(&self) -> Modality {
        self.input.modality()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn decode_image(data: &str) -> Result<Vec<u8>, SearchError> {
    let encoded = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|_| SearchError::InvalidInput("Image data must be base64 encoded".to_string()))?;
    if bytes.is_empty() {
        return Err(SearchError::InvalidInput("Image data is empty".to_string()));
    }
    Ok(bytes)
}

fn validate_url(raw: &str) -> Result<(), SearchError> {
    let parsed = url::Url::parse(raw)
        .map_err(|_| SearchError::InvalidInput("URL is not valid".to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(SearchError::InvalidInput(
            "URL must use http or https".to_string(),
        ));
    }
    if !outbound::host_is_public(&parsed) {
        return Err(SearchError::InvalidInput(
            "URL must point to a public host".to_string(),
        ));
    }
    Ok(())
}

impl TryFrom<SearchPayload> for SearchRequest {
    type Error = SearchError;

    fn try_from(payload: SearchPayload) -> Result<Self, Self::Error> {
        let modality: Modality = payload
            .modality
            .as_deref()
            .ok_or_else(|| SearchError::InvalidInput("Invalid search type".to_string()))?
            .parse()?;

        let query = non_empty(payload.query);
        let url = non_empty(payload.url);
        let image = non_empty(payload.image_data);

        let populated = [query.is_some(), url.is_some(), image.is_some()]
            .into_iter()
            .filter(|p| *p)
            .count();
        if populated > 1 {
            return Err(SearchError::InvalidInput(format!(
                "Only the {modality} payload may be set for a {modality} search"
            )));
        }

        let input = match modality {
            Modality::Text => SearchInput::Text(query.ok_or_else(|| {
                SearchError::InvalidInput("Query required for text search".to_string())
            })?),
            Modality::Url => {
                let url = url.ok_or_else(|| {
                    SearchError::InvalidInput("URL required for URL search".to_string())
                })?;
                validate_url(&url)?;
                SearchInput::Url(url)
            }
            Modality::Image => {
                let data = image.ok_or_else(|| {
                    SearchError::InvalidInput("Image data required for image search".to_string())
                })?;
                SearchInput::Image(decode_image(&data)?)
            }
        };

        let sort = match payload.sort.as_deref() {
            Some(raw) => raw.parse()?,
            None => SortOrder::default(),
        };

        Ok(Self {
            input,
            requester_identity: non_empty(payload.requester_identity),
            sort,
            filters: payload.filters,
        })
    }
}

/// A normalized product offer from any backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateProduct {
    pub id: String,
    pub title: String,
    pub store: String,
    pub list_price: Money,
    pub offer_price: Money,
    pub image_url: Option<String>,
    pub destination_url: String,
    /// Monetized link. Equal to `destination_url` until rewritten.
    pub affiliate_url: String,
    pub rating: Option<f32>,
    pub review_count: u32,
    pub availability: String,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub similarity_score: Option<u8>,
}

impl CandidateProduct {
    /// Builds a candidate and enforces `offer_price <= list_price`.
    pub fn new(
        title: impl Into<String>,
        store: impl Into<String>,
        list_price: Money,
        offer_price: Money,
        destination_url: impl Into<String>,
    ) -> Self {
        let store = store.into();
        let destination_url = destination_url.into();
        let list_price = if list_price.amount_cents < offer_price.amount_cents {
            offer_price.clone()
        } else {
            list_price
        };
        let id = format!("{:x}", md5::compute(format!("{store}:{destination_url}")));

        Self {
            id,
            title: title.into(),
            store,
            list_price,
            offer_price,
            image_url: None,
            affiliate_url: destination_url.clone(),
            destination_url,
            rating: None,
            review_count: 0,
            availability: "unknown".to_string(),
            category: None,
            brand: None,
            similarity_score: None,
        }
    }

    pub fn with_rating(mut self, rating: Option<f32>) -> Self {
        self.rating = rating
            .filter(|r| r.is_finite())
            .map(|r| r.clamp(0.0, 5.0));
        self
    }

    pub fn with_reviews(mut self, review_count: u32) -> Self {
        self.review_count = review_count;
        self
    }

    pub fn with_image(mut self, image_url: Option<String>) -> Self {
        self.image_url = image_url;
        self
    }

    pub fn with_availability(mut self, availability: impl Into<String>) -> Self {
        self.availability = availability.into();
        self
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    pub fn with_brand(mut self, brand: Option<String>) -> Self {
        self.brand = brand;
        self
    }

    /// Monetized link handed out by the source itself, e.g. a network deeplink.
    pub fn with_affiliate_url(mut self, affiliate_url: Option<String>) -> Self {
        if let Some(url) = affiliate_url {
            self.affiliate_url = url;
        }
        self
    }

    /// Whether `affiliate_url` already differs from the destination.
    pub fn is_monetized(&self) -> bool {
        self.affiliate_url != self.destination_url
    }

    /// Percent off the list price, 0 when there is no list price.
    pub fn discount_percent(&self) -> f64 {
        if self.list_price.amount_cents <= 0 {
            return 0.0;
        }
        let off = (self.list_price.amount_cents - self.offer_price.amount_cents) as f64;
        (off / self.list_price.amount_cents as f64 * 100.0).max(0.0)
    }
}

/// Structured hints derived from text, a URL or an image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentAnalysis {
    /// Canonical query to search alternatives with.
    pub query: String,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub key_features: Vec<String>,
    /// 0-100
    pub confidence: u8,
}

impl ContentAnalysis {
    /// Analysis carrying only a query, used when nothing better is available.
    pub fn passthrough(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsSummary {
    pub original_price: Money,
    pub cheapest_price: Money,
    pub amount: Money,
    /// 0-100
    pub percent: f64,
    /// Set when the reference price was below the cheapest offer and the amount was clamped.
    pub anomaly: bool,
}

/// An adapter that failed during a search and was degraded around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradedSource {
    pub adapter: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub id: String,
    pub query: String,
    pub modality: Modality,
    pub primary_product: Option<CandidateProduct>,
    pub candidates: Vec<CandidateProduct>,
    pub savings: SavingsSummary,
    pub analysis: Option<ContentAnalysis>,
    pub degraded: Vec<DegradedSource>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn payload(modality: &str) -> SearchPayload {
        SearchPayload {
            modality: Some(modality.to_string()),
            ..SearchPayload::default()
        }
    }

    #[test]
    fn text_payload_becomes_text_request() {
        let mut p = payload("text");
        p.query = Some("  wireless headphones ".to_string());
        p.requester_identity = Some("user-1".to_string());

        let request = SearchRequest::try_from(p).unwrap();
        assert_eq!(request.input, SearchInput::Text("wireless headphones".to_string()));
        assert_eq!(request.requester_identity.as_deref(), Some("user-1"));
        assert_eq!(request.sort, SortOrder::PriceAsc);
    }

    #[test]
    fn missing_payload_for_modality_is_rejected() {
        let mut p = payload("url");
        p.query = Some("headphones".to_string());
        let err = SearchRequest::try_from(p).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn unknown_modality_is_rejected() {
        let err = SearchRequest::try_from(payload("video")).unwrap_err();
        assert_eq!(err.public_message(), "Invalid search type");
    }

    #[test]
    fn conflicting_payloads_are_rejected() {
        let mut p = payload("text");
        p.query = Some("laptop".to_string());
        p.url = Some("https://shop.example/laptop".to_string());
        assert!(SearchRequest::try_from(p).is_err());
    }

    #[test]
    fn non_http_urls_are_rejected() {
        let mut p = payload("url");
        p.url = Some("ftp://files.example/item".to_string());
        assert!(SearchRequest::try_from(p).is_err());
    }

    #[test]
    fn private_and_loopback_urls_are_rejected() {
        for url in [
            "http://169.254.169.254/latest/meta-data/",
            "http://127.0.0.1:8080/admin",
            "http://localhost/",
            "http://[::1]/",
            "http://10.0.0.12/internal",
        ] {
            let mut p = payload("url");
            p.url = Some(url.to_string());
            let err = SearchRequest::try_from(p).unwrap_err();
            assert_eq!(err.public_message(), "URL must point to a public host", "{url}");
        }

        let mut p = payload("url");
        p.url = Some("https://shop.example/p/lamp".to_string());
        assert!(SearchRequest::try_from(p).is_ok());
    }

    #[test]
    fn image_data_urls_are_decoded() {
        let mut p = payload("image");
        p.image_data = Some("data:image/png;base64,aGVsbG8=".to_string());
        let request = SearchRequest::try_from(p).unwrap();
        assert_eq!(request.input, SearchInput::Image(b"hello".to_vec()));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let mut p = payload("image");
        p.image_data = Some("not base64!!".to_string());
        assert!(SearchRequest::try_from(p).is_err());
    }

    #[test]
    fn sort_aliases_parse() {
        assert_eq!("price-low".parse::<SortOrder>().unwrap(), SortOrder::PriceAsc);
        assert_eq!("rating".parse::<SortOrder>().unwrap(), SortOrder::RatingDesc);
        assert!("cheapest-first".parse::<SortOrder>().is_err());
    }

    #[test]
    fn candidate_list_price_never_below_offer() {
        let product = CandidateProduct::new(
            "Headphones",
            "Shop",
            Money::usd(50.0),
            Money::usd(60.0),
            "https://shop.example/p/1",
        )
        .with_rating(Some(7.5));

        assert_eq!(product.list_price, Money::usd(60.0));
        assert_eq!(product.rating, Some(5.0));
        assert_eq!(product.affiliate_url, product.destination_url);
    }

    #[test]
    fn filters_match_on_price_and_store() {
        let product = CandidateProduct::new(
            "Headphones",
            "Shop",
            Money::usd(100.0),
            Money::usd(80.0),
            "https://shop.example/p/1",
        );
        let filters = SearchFilters {
            max_price: Some(90.0),
            stores: vec!["shop".to_string()],
            ..SearchFilters::default()
        };
        assert!(filters.matches(&product));

        let too_cheap = SearchFilters {
            max_price: Some(50.0),
            ..SearchFilters::default()
        };
        assert!(!too_cheap.matches(&product));
    }
}
