//! Core data model shared across the engine
//!
//! # Components
//!
//! - `Platform`: the closed set of supported e-commerce platforms
//! - `ProductSpec`: one tracked product (GTIN + brand + description)
//! - `ScrapeRequest`: a batch of products crossed with target platforms
//! - `ListingCandidate`: one raw result returned by a platform adapter
//! - `PriceRecord`: the canonical, normalized price observation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported e-commerce platforms
///
/// Adding a platform means adding one variant here and registering one
/// adapter; the scheduler never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    Amazon,
    Ebay,
    GoogleShopping,
    Walmart,
}

impl Platform {
    /// All platform variants, in declaration order
    pub const ALL: [Platform; 4] = [
        Platform::Amazon,
        Platform::Ebay,
        Platform::GoogleShopping,
        Platform::Walmart,
    ];

    /// Returns the canonical string name for this platform
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amazon => "amazon",
            Self::Ebay => "ebay",
            Self::GoogleShopping => "google-shopping",
            Self::Walmart => "walmart",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "amazon" => Ok(Self::Amazon),
            "ebay" => Ok(Self::Ebay),
            "google-shopping" => Ok(Self::GoogleShopping),
            "walmart" => Ok(Self::Walmart),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// One tracked product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSpec {
    /// Global Trade Item Number, the stable product key
    pub gtin: String,

    /// Brand name, used for match scoring
    pub brand: String,

    /// Free-text product description, used for match scoring
    pub description: String,

    /// Known typical price for this product, if any
    ///
    /// Used by the normalization pipeline to reject outlier prices. A
    /// product with no reference price skips the outlier check.
    #[serde(rename = "reference-price", default)]
    pub reference_price: Option<f64>,
}

/// A scrape request: products crossed with target platforms
///
/// Immutable once submitted; the engine expands it into one subtask per
/// (product, platform) pair.
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub products: Vec<ProductSpec>,
    pub platforms: Vec<Platform>,

    /// Upper bound on price records kept per (product, platform) pair
    pub max_results_per_platform: usize,
}

/// The query handed to a platform adapter for one fetch attempt
#[derive(Debug, Clone)]
pub struct ProductQuery {
    pub product: ProductSpec,
    pub max_results: usize,
}

/// One raw listing returned by a platform adapter
///
/// Ephemeral: candidates exist only between the fetch and the
/// normalization pipeline, which either converts each one into a
/// [`PriceRecord`] or discards it.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingCandidate {
    /// Listing title as scraped
    pub title: String,

    /// Raw price text, e.g. `"$1,299.99"` or `"1.299,99 EUR"`
    pub price_text: String,

    /// Explicit currency code when the platform exposes one; otherwise the
    /// normalization pipeline derives it from the price text
    pub currency: Option<String>,

    /// Raw rating value, if the listing carries one
    pub rating: Option<f64>,

    /// Source URL of the listing
    pub url: String,

    /// Platform-specific metadata, passed through unmodified
    pub metadata: Vec<(String, String)>,
}

/// Canonical, platform-agnostic price observation
///
/// Immutable once produced; appended to the external result store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceRecord {
    pub gtin: String,
    pub platform: Platform,
    pub price: f64,
    pub currency: String,
    pub title: String,
    pub rating: Option<f64>,
    pub url: String,
    pub observed_at: DateTime<Utc>,

    /// Similarity score between the listing and the product spec, in [0, 1]
    pub confidence: f64,
}
