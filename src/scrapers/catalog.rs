//! Synthetic catalog tier.
//!
//! Terminal tier in the chain: derives plausible product records from a
//! local template catalog so the pipeline never returns nothing. Ids are
//! stable hashes of the template name, and all derived figures are seeded
//! from the id, so repeated runs agree record-for-record. Output is
//! flagged `synthetic` for downstream consumers.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::info;

use super::{AcquireError, AcquisitionTier};
use crate::models::{AcquisitionJob, JobKind, RawPayload, TemplateProduct};

/// Template catalog: category, then (name, base price, discount fraction).
const CATALOG: &[(&str, &[(&str, f64, f64)])] = &[
    (
        "Beleza",
        &[
            ("Máscara de Cílios 4D", 29.90, 0.3),
            ("Sérum Vitamina C", 45.90, 0.25),
            ("Lip Gloss Hidratante", 19.90, 0.4),
            ("Máscara Facial LED", 89.90, 0.35),
            ("Escova Alisadora 3 em 1", 79.90, 0.2),
            ("Removedor de Cravos", 34.90, 0.3),
            ("Kit Skincare Coreano", 129.90, 0.25),
            ("Modelador de Sobrancelha", 24.90, 0.35),
        ],
    ),
    (
        "Eletrônicos",
        &[
            ("Fone Bluetooth TWS", 59.90, 0.4),
            ("Carregador Wireless 15W", 39.90, 0.3),
            ("Ring Light Profissional", 79.90, 0.25),
            ("Microfone USB Condensador", 89.90, 0.35),
            ("Tripé Flexível Gorila", 34.90, 0.3),
            ("Power Bank 20000mAh", 69.90, 0.25),
            ("Smartwatch Fitness", 99.90, 0.4),
            ("Mini Projetor LED", 149.90, 0.3),
        ],
    ),
    (
        "Casa",
        &[
            ("Organizador de Maquiagem", 49.90, 0.35),
            ("Luz LED Fita RGB", 29.90, 0.4),
            ("Umidificador Aroma", 59.90, 0.25),
            ("Aspirador Portátil", 89.90, 0.3),
            ("Espelho LED Aumento", 44.90, 0.35),
            ("Organizador Closet", 39.90, 0.3),
            ("Luminária Moon", 54.90, 0.25),
            ("Dispenser Automático", 34.90, 0.4),
        ],
    ),
    (
        "Moda",
        &[
            ("Bolsa Crossbody Mini", 49.90, 0.35),
            ("Óculos de Sol Vintage", 39.90, 0.4),
            ("Cinto de Corrente", 29.90, 0.3),
            ("Bucket Hat Unissex", 24.90, 0.35),
            ("Tênis Chunky", 119.90, 0.25),
            ("Jaqueta Corta Vento", 79.90, 0.3),
            ("Meia Colorida Pack", 19.90, 0.4),
            ("Pulseira Magnética", 14.90, 0.35),
        ],
    ),
    (
        "Fitness",
        &[
            ("Faixa Elástica Kit", 34.90, 0.35),
            ("Rolo Massageador", 29.90, 0.3),
            ("Garrafa Motivacional", 24.90, 0.4),
            ("Tapete Yoga Antiderrapante", 49.90, 0.25),
            ("Corda de Pular Pro", 19.90, 0.35),
            ("Luvas de Treino", 34.90, 0.3),
            ("Massageador Elétrico", 79.90, 0.4),
            ("Bola Pilates 65cm", 39.90, 0.25),
        ],
    ),
];

/// Stable id and numeric seed for a template name.
fn template_identity(name: &str) -> (String, u64) {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();

    let id = format!("prod_{}", &hex::encode(digest)[..12]);
    let seed = u64::from_le_bytes(digest[..8].try_into().unwrap_or_default());
    (id, seed)
}

/// Deterministic fallback catalog.
pub struct CatalogTier;

impl CatalogTier {
    pub fn new() -> Self {
        Self
    }

    /// Produce template records, optionally filtered by category.
    ///
    /// An unknown category falls back to the full catalog rather than an
    /// empty batch; this tier must always return something.
    pub fn produce(category: Option<&str>, limit: usize) -> Vec<TemplateProduct> {
        let matching: Vec<_> = match category {
            Some(wanted) => {
                let filtered: Vec<_> = CATALOG
                    .iter()
                    .filter(|(cat, _)| cat.eq_ignore_ascii_case(wanted))
                    .collect();
                if filtered.is_empty() {
                    CATALOG.iter().collect()
                } else {
                    filtered
                }
            }
            None => CATALOG.iter().collect(),
        };

        // Interleave categories so a short limit still spans the catalog
        let mut products = Vec::new();
        let max_len = matching.iter().map(|(_, t)| t.len()).max().unwrap_or(0);
        'outer: for row in 0..max_len {
            for (cat, templates) in &matching {
                if let Some(&(name, base_price, discount)) = templates.get(row) {
                    let (source_id, seed) = template_identity(name);
                    products.push(TemplateProduct {
                        source_id,
                        name: name.to_string(),
                        category: cat.to_string(),
                        base_price,
                        discount,
                        seed,
                    });
                    if products.len() >= limit {
                        break 'outer;
                    }
                }
            }
        }
        products
    }
}

impl Default for CatalogTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AcquisitionTier for CatalogTier {
    fn name(&self) -> &'static str {
        "catalog"
    }

    fn is_live(&self) -> bool {
        false
    }

    async fn acquire(&mut self, job: &AcquisitionJob) -> Result<Vec<RawPayload>, AcquireError> {
        let category = match job.kind {
            JobKind::Category => job.target_category.as_deref(),
            _ => None,
        };

        let products = Self::produce(category, job.limit);
        info!(
            "Catalog tier produced {} synthetic records for job {}",
            products.len(),
            job.id
        );
        Ok(products.into_iter().map(RawPayload::Template).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_stable_across_runs() {
        let first = CatalogTier::produce(None, 10);
        let second = CatalogTier::produce(None, 10);
        assert_eq!(first.len(), 10);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.source_id, b.source_id);
            assert_eq!(a.seed, b.seed);
        }
    }

    #[test]
    fn test_id_format() {
        let (id, _) = template_identity("Fone Bluetooth TWS");
        assert!(id.starts_with("prod_"));
        assert_eq!(id.len(), "prod_".len() + 12);
    }

    #[test]
    fn test_category_filter() {
        let products = CatalogTier::produce(Some("beleza"), 50);
        assert!(!products.is_empty());
        assert!(products.iter().all(|p| p.category == "Beleza"));
    }

    #[test]
    fn test_unknown_category_falls_back_to_all() {
        let products = CatalogTier::produce(Some("nonexistent"), 10);
        assert_eq!(products.len(), 10);
    }

    #[test]
    fn test_limit_respected() {
        assert_eq!(CatalogTier::produce(None, 7).len(), 7);
        // Catalog exhausted below a very large limit
        let all = CatalogTier::produce(None, 1000);
        assert_eq!(all.len(), 40);
    }

    #[tokio::test]
    async fn test_tier_never_fails() {
        let mut tier = CatalogTier::new();
        let job = AcquisitionJob::new(JobKind::Trending, None, 20);
        let payloads = tier.acquire(&job).await.unwrap();
        assert_eq!(payloads.len(), 20);
        assert!(payloads
            .iter()
            .all(|p| matches!(p, RawPayload::Template(_))));
    }
}
