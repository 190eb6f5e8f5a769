//! Canonical product model and raw tier payloads.
//!
//! Every acquisition tier produces `RawPayload` values; the normalizer is
//! the only component that turns them into `CanonicalProduct` records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which tier a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionSource {
    DirectApi,
    Browser,
    Synthetic,
}

impl AcquisitionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectApi => "direct_api",
            Self::Browser => "browser",
            Self::Synthetic => "synthetic",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "direct_api" => Some(Self::DirectApi),
            "browser" => Some(Self::Browser),
            "synthetic" => Some(Self::Synthetic),
            _ => None,
        }
    }
}

/// The normalized, storage-ready product record.
///
/// Immutable once constructed; upserted into storage by `source_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalProduct {
    /// Stable identifier on the source platform.
    pub source_id: String,
    pub title: String,
    pub description: Option<String>,
    pub price: f64,
    pub original_price: Option<f64>,
    pub currency: String,
    pub category: Option<String>,
    pub seller_name: Option<String>,
    pub seller_rating: Option<f64>,
    pub product_rating: Option<f64>,
    pub reviews_count: i64,
    pub sales_count: i64,
    pub sales_7d: i64,
    pub sales_30d: i64,
    /// Discount percentage, derived when original price exceeds current.
    pub discount_percent: Option<i32>,
    pub image_url: String,
    pub images: Vec<String>,
    pub video_url: Option<String>,
    pub product_url: String,
    pub affiliate_url: Option<String>,
    pub free_shipping: bool,
    pub trending: bool,
    pub on_sale: bool,
    pub in_stock: bool,
    /// Which tier produced this record.
    pub source: AcquisitionSource,
    pub collected_at: DateTime<Utc>,
}

/// Product card fields extracted from rendered DOM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomFragment {
    pub title: String,
    pub price_text: String,
    pub image_url: Option<String>,
    pub product_url: Option<String>,
    pub sales_text: Option<String>,
    pub rating_text: Option<String>,
}

/// A synthetic catalog entry before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateProduct {
    pub source_id: String,
    pub name: String,
    pub category: String,
    pub base_price: f64,
    /// Discount as a fraction of the base price.
    pub discount: f64,
    /// Deterministic seed derived from the id hash.
    pub seed: u64,
}

/// Raw acquisition output, tagged by the tier shape that produced it.
///
/// One record per payload; batch-level structure is flattened by the tiers.
#[derive(Debug, Clone)]
pub enum RawPayload {
    /// A single item object from the platform API (direct tier).
    ApiJson(serde_json::Value),
    /// A single product object lifted out of embedded page state (browser tier).
    EmbeddedState(serde_json::Value),
    /// Fields scraped from a rendered product card (browser tier fallback).
    Dom(DomFragment),
    /// A deterministic catalog entry (synthetic tier).
    Template(TemplateProduct),
}

impl RawPayload {
    /// The acquisition source this payload shape maps to.
    pub fn source(&self) -> AcquisitionSource {
        match self {
            Self::ApiJson(_) => AcquisitionSource::DirectApi,
            Self::EmbeddedState(_) | Self::Dom(_) => AcquisitionSource::Browser,
            Self::Template(_) => AcquisitionSource::Synthetic,
        }
    }
}
