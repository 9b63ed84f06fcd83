//! Normalization pipeline: raw listing candidates to canonical records
//!
//! Each candidate is either converted into a [`PriceRecord`] or discarded.
//! Discards happen for three reasons: the title does not match the product
//! closely enough, the price text cannot be parsed into a positive amount
//! with a currency, or the price is an outlier against the product's
//! reference price. The pipeline is a pure function of its inputs, so
//! feeding the same candidate twice yields the same decision.

use crate::config::NormalizeConfig;
use crate::model::{ListingCandidate, Platform, PriceRecord, ProductSpec};
use chrono::{DateTime, Utc};

/// Result of normalizing one batch of candidates
#[derive(Debug)]
pub struct NormalizeOutcome {
    pub records: Vec<PriceRecord>,
    pub discarded: usize,
}

/// Converts a batch of candidates for one (product, platform) pair
///
/// Keeps at most `max_results` records, in candidate order. `observed_at`
/// is stamped by the caller once per fetch so the pipeline itself stays
/// deterministic.
pub fn normalize(
    product: &ProductSpec,
    platform: Platform,
    candidates: &[ListingCandidate],
    config: &NormalizeConfig,
    max_results: usize,
    observed_at: DateTime<Utc>,
) -> NormalizeOutcome {
    let mut records = Vec::new();
    let mut discarded = 0;

    for candidate in candidates {
        if records.len() >= max_results {
            break;
        }

        let confidence = match_confidence(product, &candidate.title);
        if confidence < config.match_confidence_threshold {
            tracing::debug!(
                "Discarding candidate '{}': confidence {:.3} below threshold",
                candidate.title,
                confidence
            );
            discarded += 1;
            continue;
        }

        let parsed = parse_price(&candidate.price_text);
        let (price, derived_currency) = match parsed {
            Some(parsed) if parsed.0 > 0.0 => parsed,
            _ => {
                tracing::warn!(
                    "Discarding candidate '{}': unparseable or non-positive price '{}'",
                    candidate.title,
                    candidate.price_text
                );
                discarded += 1;
                continue;
            }
        };

        let currency = match candidate.currency.clone().or(derived_currency) {
            Some(currency) => currency,
            None => {
                tracing::warn!(
                    "Discarding candidate '{}': no currency in '{}'",
                    candidate.title,
                    candidate.price_text
                );
                discarded += 1;
                continue;
            }
        };

        if let Some(reference) = product.reference_price {
            let multiple = config.price_outlier_multiple;
            if price > reference * multiple || price < reference / multiple {
                tracing::warn!(
                    "Discarding candidate '{}': price {} is an outlier against reference {}",
                    candidate.title,
                    price,
                    reference
                );
                discarded += 1;
                continue;
            }
        }

        records.push(PriceRecord {
            gtin: product.gtin.clone(),
            platform,
            price,
            currency,
            title: candidate.title.clone(),
            rating: candidate.rating,
            url: candidate.url.clone(),
            observed_at,
            confidence,
        });
    }

    NormalizeOutcome { records, discarded }
}

/// Similarity between a candidate title and the product's brand plus
/// description, in [0, 1]
pub fn match_confidence(product: &ProductSpec, title: &str) -> f64 {
    let target = format!("{} {}", product.brand, product.description).to_lowercase();
    strsim::jaro_winkler(&target, &title.to_lowercase())
}

/// Parses raw price text into an amount and, when a symbol or code is
/// present, a currency
///
/// Handles `$1,299.99`, `1.299,99 EUR`, `£45`, and similar shapes. When
/// both separators appear, the last one is the decimal point; a lone comma
/// followed by exactly two digits is also treated as one.
pub fn parse_price(text: &str) -> Option<(f64, Option<String>)> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut currency: Option<String> = None;
    let mut numeric = String::new();

    for ch in trimmed.chars() {
        match ch {
            '0'..='9' | '.' | ',' => numeric.push(ch),
            '$' => {
                currency.get_or_insert_with(|| "USD".to_string());
            }
            '€' => {
                currency.get_or_insert_with(|| "EUR".to_string());
            }
            '£' => {
                currency.get_or_insert_with(|| "GBP".to_string());
            }
            _ => {}
        }
    }

    // A trailing or leading ISO code such as "EUR" or "usd"
    if currency.is_none() {
        for token in trimmed.split_whitespace() {
            let letters: String = token.chars().filter(|c| c.is_ascii_alphabetic()).collect();
            if letters.len() == 3 {
                currency = Some(letters.to_uppercase());
                break;
            }
        }
    }

    if numeric.is_empty() {
        return None;
    }

    let amount = parse_numeric(&numeric)?;
    Some((amount, currency))
}

fn parse_numeric(digits: &str) -> Option<f64> {
    let last_dot = digits.rfind('.');
    let last_comma = digits.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => {
            // The later separator is the decimal point
            let (decimal, thousands) = if dot > comma { ('.', ',') } else { (',', '.') };
            let cleaned: String = digits.chars().filter(|&c| c != thousands).collect();
            cleaned.replace(decimal, ".")
        }
        (None, Some(comma)) => {
            let after = digits.len() - comma - 1;
            if after == 2 {
                digits.replace(',', ".")
            } else {
                digits.replace(',', "")
            }
        }
        (Some(dot), None) => {
            let after = digits.len() - dot - 1;
            if after == 3 && digits.matches('.').count() == 1 && digits.len() > 4 {
                // "1.299" is a thousands-separated integer
                digits.replace('.', "")
            } else {
                digits.to_string()
            }
        }
        (None, None) => digits.to_string(),
    };

    normalized.parse::<f64>().ok()
}
