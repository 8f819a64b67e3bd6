//! Candidate ordering, similarity scoring and savings calculation
//!
//! Everything here is pure and deterministic: the same candidates in the
//! same arrival order always produce the same ranking.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::{CandidateProduct, ContentAnalysis, DEFAULT_CURRENCY, Money, SavingsSummary, SortOrder};

const BASE_SIMILARITY: u32 = 50;
const CATEGORY_BONUS: u32 = 20;
const BRAND_BONUS: u32 = 15;
const KEYWORD_BONUS: u32 = 3;
const KEYWORD_CAP: u32 = 15;

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect()
}

fn same_label(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => !a.trim().is_empty() && a.trim().eq_ignore_ascii_case(b.trim()),
        _ => false,
    }
}

/// Scores how closely a candidate matches the analyzed input, 0-100.
pub fn similarity_score(product: &CandidateProduct, analysis: &ContentAnalysis) -> u8 {
    let mut score = BASE_SIMILARITY;

    if same_label(product.category.as_deref(), analysis.category.as_deref()) {
        score += CATEGORY_BONUS;
    }
    if same_label(product.brand.as_deref(), analysis.brand.as_deref()) {
        score += BRAND_BONUS;
    }

    let mut keywords = tokens(&analysis.query);
    for feature in &analysis.key_features {
        keywords.extend(tokens(feature));
    }
    let shared = tokens(&product.title).intersection(&keywords).count() as u32;
    score += (shared * KEYWORD_BONUS).min(KEYWORD_CAP);

    score.min(100) as u8
}

fn by_rating_then_reviews(a: &CandidateProduct, b: &CandidateProduct) -> Ordering {
    let rating = |p: &CandidateProduct| p.rating.unwrap_or(-1.0);
    rating(b)
        .total_cmp(&rating(a))
        .then_with(|| b.review_count.cmp(&a.review_count))
}

fn compare(order: SortOrder, a: &CandidateProduct, b: &CandidateProduct) -> Ordering {
    let primary = match order {
        SortOrder::PriceAsc => a.offer_price.amount_cents.cmp(&b.offer_price.amount_cents),
        SortOrder::PriceDesc => b.offer_price.amount_cents.cmp(&a.offer_price.amount_cents),
        SortOrder::RatingDesc | SortOrder::ReviewsDesc => Ordering::Equal,
        SortOrder::SimilarityDesc => b
            .similarity_score
            .unwrap_or(0)
            .cmp(&a.similarity_score.unwrap_or(0)),
        SortOrder::DiscountDesc => b.discount_percent().total_cmp(&a.discount_percent()),
    };

    let secondary = match order {
        SortOrder::ReviewsDesc => b
            .review_count
            .cmp(&a.review_count)
            .then_with(|| by_rating_then_reviews(a, b)),
        _ => by_rating_then_reviews(a, b),
    };

    primary.then(secondary)
}

/// Scores (when an analysis is available) and sorts candidates in place.
///
/// The sort is stable, so candidates that compare equal keep arrival order.
pub fn rank(candidates: &mut [CandidateProduct], order: SortOrder, analysis: Option<&ContentAnalysis>) {
    if let Some(analysis) = analysis {
        for candidate in candidates.iter_mut() {
            candidate.similarity_score = Some(similarity_score(candidate, analysis));
        }
    }
    candidates.sort_by(|a, b| compare(order, a, b));
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Savings of `cheapest` against `original`, clamped to `[0, original]`.
pub fn savings_between(original: &Money, cheapest: &Money) -> SavingsSummary {
    let raw = original.amount_cents - cheapest.amount_cents;
    let amount = raw.max(0);
    let percent = if original.amount_cents > 0 {
        round2(amount as f64 / original.amount_cents as f64 * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    SavingsSummary {
        original_price: original.clone(),
        cheapest_price: cheapest.clone(),
        amount: Money::new(amount, cheapest.currency.clone()),
        percent,
        anomaly: raw < 0,
    }
}

/// Best deal among `candidates` compared with the primary product or, without
/// one, with the highest list price seen.
pub fn calculate_savings(
    primary: Option<&CandidateProduct>,
    candidates: &[CandidateProduct],
) -> SavingsSummary {
    let Some(cheapest) = candidates
        .iter()
        .min_by_key(|c| c.offer_price.amount_cents)
    else {
        let reference = primary
            .map(|p| p.list_price.clone())
            .unwrap_or_else(|| Money::zero(DEFAULT_CURRENCY));
        return SavingsSummary {
            cheapest_price: primary.map_or_else(|| reference.clone(), |p| p.offer_price.clone()),
            amount: Money::zero(reference.currency.clone()),
            original_price: reference,
            percent: 0.0,
            anomaly: false,
        };
    };

    let reference = match primary {
        Some(primary) => primary.list_price.clone(),
        None => candidates
            .iter()
            .max_by_key(|c| c.list_price.amount_cents)
            .map_or_else(|| cheapest.list_price.clone(), |c| c.list_price.clone()),
    };

    savings_between(&reference, &cheapest.offer_price)
}
