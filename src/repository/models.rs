//! Diesel row types and conversions for product storage.

use chrono::Utc;
use diesel::prelude::*;

use crate::models::{AcquisitionSource, CanonicalProduct};
use crate::schema::products;

/// Database row for a product.
#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = products)]
pub struct ProductRecord {
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
    pub discount_percent: Option<i32>,
    pub image_url: String,
    pub images: String,
    pub video_url: Option<String>,
    pub product_url: String,
    pub affiliate_url: Option<String>,
    pub free_shipping: bool,
    pub trending: bool,
    pub on_sale: bool,
    pub in_stock: bool,
    pub source: String,
    pub collected_at: String,
    pub updated_at: String,
}

impl From<&CanonicalProduct> for ProductRecord {
    fn from(product: &CanonicalProduct) -> Self {
        Self {
            source_id: product.source_id.clone(),
            title: product.title.clone(),
            description: product.description.clone(),
            price: product.price,
            original_price: product.original_price,
            currency: product.currency.clone(),
            category: product.category.clone(),
            seller_name: product.seller_name.clone(),
            seller_rating: product.seller_rating,
            product_rating: product.product_rating,
            reviews_count: product.reviews_count,
            sales_count: product.sales_count,
            sales_7d: product.sales_7d,
            sales_30d: product.sales_30d,
            discount_percent: product.discount_percent,
            image_url: product.image_url.clone(),
            images: serde_json::to_string(&product.images).unwrap_or_else(|_| "[]".to_string()),
            video_url: product.video_url.clone(),
            product_url: product.product_url.clone(),
            affiliate_url: product.affiliate_url.clone(),
            free_shipping: product.free_shipping,
            trending: product.trending,
            on_sale: product.on_sale,
            in_stock: product.in_stock,
            source: product.source.as_str().to_string(),
            collected_at: product.collected_at.to_rfc3339(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }
}

impl ProductRecord {
    /// Convert back into the canonical shape.
    pub fn into_product(self) -> CanonicalProduct {
        CanonicalProduct {
            source_id: self.source_id,
            title: self.title,
            description: self.description,
            price: self.price,
            original_price: self.original_price,
            currency: self.currency,
            category: self.category,
            seller_name: self.seller_name,
            seller_rating: self.seller_rating,
            product_rating: self.product_rating,
            reviews_count: self.reviews_count,
            sales_count: self.sales_count,
            sales_7d: self.sales_7d,
            sales_30d: self.sales_30d,
            discount_percent: self.discount_percent,
            image_url: self.image_url,
            images: serde_json::from_str(&self.images).unwrap_or_default(),
            video_url: self.video_url,
            product_url: self.product_url,
            affiliate_url: self.affiliate_url,
            free_shipping: self.free_shipping,
            trending: self.trending,
            on_sale: self.on_sale,
            in_stock: self.in_stock,
            source: AcquisitionSource::from_str(&self.source)
                .unwrap_or(AcquisitionSource::Synthetic),
            collected_at: chrono::DateTime::parse_from_rfc3339(&self.collected_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}
