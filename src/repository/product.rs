//! Product repository: idempotent upserts keyed by source id.

use diesel::prelude::*;
use diesel_async::{RunQueryDsl, SimpleAsyncConnection};
use tracing::warn;

use super::models::ProductRecord;
use super::pool::{AsyncSqlitePool, DieselError};
use crate::models::CanonicalProduct;
use crate::schema::products;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    source_id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    price DOUBLE NOT NULL,
    original_price DOUBLE,
    currency TEXT NOT NULL,
    category TEXT,
    seller_name TEXT,
    seller_rating DOUBLE,
    product_rating DOUBLE,
    reviews_count BIGINT NOT NULL DEFAULT 0,
    sales_count BIGINT NOT NULL DEFAULT 0,
    sales_7d BIGINT NOT NULL DEFAULT 0,
    sales_30d BIGINT NOT NULL DEFAULT 0,
    discount_percent INTEGER,
    image_url TEXT NOT NULL DEFAULT '',
    images TEXT NOT NULL DEFAULT '[]',
    video_url TEXT,
    product_url TEXT NOT NULL DEFAULT '',
    affiliate_url TEXT,
    free_shipping BOOLEAN NOT NULL DEFAULT 0,
    trending BOOLEAN NOT NULL DEFAULT 0,
    on_sale BOOLEAN NOT NULL DEFAULT 0,
    in_stock BOOLEAN NOT NULL DEFAULT 1,
    source TEXT NOT NULL,
    collected_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_products_category ON products(category);
CREATE INDEX IF NOT EXISTS idx_products_trending ON products(trending);
"#;

/// SQLite-backed product storage.
#[derive(Clone)]
pub struct ProductRepository {
    pool: AsyncSqlitePool,
}

impl ProductRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(SCHEMA_SQL).await?;
        Ok(())
    }

    /// Upsert a batch of products by `source_id`.
    ///
    /// Returns how many rows were written. A row that fails does not abort
    /// the remaining inserts; it is logged and skipped.
    pub async fn upsert_products(&self, batch: &[CanonicalProduct]) -> Result<usize, DieselError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.get().await?;
        let mut saved = 0;

        for product in batch {
            let record = ProductRecord::from(product);
            let result = diesel::insert_into(products::table)
                .values(&record)
                .on_conflict(products::source_id)
                .do_update()
                .set(&record)
                .execute(&mut conn)
                .await;

            match result {
                Ok(_) => saved += 1,
                Err(e) => {
                    warn!("Failed to save product {}: {}", product.source_id, e);
                }
            }
        }

        Ok(saved)
    }

    /// Count all stored products.
    pub async fn count(&self) -> Result<i64, DieselError> {
        let mut conn = self.pool.get().await?;
        products::table.count().get_result(&mut conn).await
    }

    /// Most recently updated products.
    pub async fn recent(&self, limit: i64) -> Result<Vec<CanonicalProduct>, DieselError> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<ProductRecord> = products::table
            .order(products::updated_at.desc())
            .limit(limit)
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(ProductRecord::into_product).collect())
    }

    /// Fetch one product by source id.
    pub async fn get(&self, source_id: &str) -> Result<Option<CanonicalProduct>, DieselError> {
        let mut conn = self.pool.get().await?;
        let row: Option<ProductRecord> = products::table
            .find(source_id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(ProductRecord::into_product))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AcquisitionSource;
    use chrono::Utc;

    fn product(source_id: &str, price: f64) -> CanonicalProduct {
        CanonicalProduct {
            source_id: source_id.to_string(),
            title: format!("Produto {}", source_id),
            description: None,
            price,
            original_price: None,
            currency: "BRL".to_string(),
            category: Some("Eletrônicos".to_string()),
            seller_name: None,
            seller_rating: None,
            product_rating: None,
            reviews_count: 0,
            sales_count: 10,
            sales_7d: 4,
            sales_30d: 10,
            discount_percent: None,
            image_url: String::new(),
            images: Vec::new(),
            video_url: None,
            product_url: format!("https://shop.example.com/p/{}", source_id),
            affiliate_url: None,
            free_shipping: false,
            trending: false,
            on_sale: false,
            in_stock: true,
            source: AcquisitionSource::DirectApi,
            collected_at: Utc::now(),
        }
    }

    async fn repo() -> (ProductRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = AsyncSqlitePool::from_path(&dir.path().join("test.db"));
        let repo = ProductRepository::new(pool);
        repo.ensure_schema().await.unwrap();
        (repo, dir)
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let (repo, _dir) = repo().await;
        let batch = vec![product("a", 10.0), product("b", 20.0)];

        assert_eq!(repo.upsert_products(&batch).await.unwrap(), 2);
        assert_eq!(repo.upsert_products(&batch).await.unwrap(), 2);
        // No duplicates keyed by source_id
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_updates_existing_row() {
        let (repo, _dir) = repo().await;

        repo.upsert_products(&[product("a", 10.0)]).await.unwrap();
        repo.upsert_products(&[product("a", 8.5)]).await.unwrap();

        let stored = repo.get("a").await.unwrap().unwrap();
        assert_eq!(stored.price, 8.5);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (repo, _dir) = repo().await;
        assert_eq!(repo.upsert_products(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_images_round_trip() {
        let (repo, _dir) = repo().await;
        let mut item = product("imgs", 5.0);
        item.images = vec!["https://a.jpg".to_string(), "https://b.jpg".to_string()];

        repo.upsert_products(&[item]).await.unwrap();
        let stored = repo.get("imgs").await.unwrap().unwrap();
        assert_eq!(stored.images.len(), 2);
        assert_eq!(stored.source, AcquisitionSource::DirectApi);
    }
}
