//! Product normalization.
//!
//! One dispatch turns every tier's raw payload shape into the canonical
//! product record. Normalization of a single record never fails loudly:
//! malformed input yields `None` and the caller skips the record without
//! aborting the batch.

mod price;

pub use price::{extract_price_from_text, parse_price, parse_rating, parse_sales, ParsedPrice};

use chrono::Utc;
use serde_json::Value;

use crate::models::{AcquisitionSource, CanonicalProduct, DomFragment, RawPayload, TemplateProduct};

/// Normalize one raw payload into a canonical product.
pub fn normalize(payload: &RawPayload) -> Option<CanonicalProduct> {
    match payload {
        RawPayload::ApiJson(item) => normalize_api_item(item),
        RawPayload::EmbeddedState(item) => normalize_state_product(item),
        RawPayload::Dom(fragment) => normalize_dom_fragment(fragment),
        RawPayload::Template(template) => Some(normalize_template(template)),
    }
}

/// Derived discount percentage, only when the original price really is higher.
fn discount_percent(price: f64, original_price: Option<f64>) -> Option<i32> {
    let original = original_price?;
    if original > price && original > 0.0 {
        Some(((1.0 - price / original) * 100.0).round() as i32)
    } else {
        None
    }
}

fn string_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| value.get(k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn number_field(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| {
        let v = value.get(k)?;
        v.as_f64()
            .or_else(|| v.as_str().and_then(|s| parse_price(s).map(|p| p.amount)))
    })
}

fn count_field(value: &Value, keys: &[&str]) -> i64 {
    keys.iter()
        .find_map(|k| {
            let v = value.get(k)?;
            v.as_i64()
                .or_else(|| v.as_str().map(parse_sales))
        })
        .unwrap_or(0)
}

/// Infer a category from description keywords.
fn infer_category(text: &str) -> Option<String> {
    const CATEGORIES: &[(&str, &[&str])] = &[
        (
            "Moda Feminina",
            &["vestido", "saia", "blusa", "moda", "roupa", "fashion"],
        ),
        (
            "Beleza",
            &["maquiagem", "makeup", "skincare", "pele", "beleza", "cosmético"],
        ),
        (
            "Eletrônicos",
            &["fone", "carregador", "celular", "tech", "eletrônico", "gadget"],
        ),
        (
            "Casa",
            &["casa", "decoração", "cozinha", "organização", "limpeza"],
        ),
        (
            "Fitness",
            &["treino", "academia", "fitness", "gym", "exercício"],
        ),
        (
            "Acessórios",
            &["brinco", "colar", "anel", "bolsa", "acessório"],
        ),
    ];

    let lowered = text.to_lowercase();
    CATEGORIES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lowered.contains(kw)))
        .map(|(category, _)| category.to_string())
}

/// Normalize a platform API item (video-shaped commerce content).
fn normalize_api_item(item: &Value) -> Option<CanonicalProduct> {
    let source_id = item
        .get("id")
        .or_else(|| item.get("video_id"))
        .or_else(|| item.get("aweme_id"))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .filter(|s| !s.is_empty())?;

    let author = item.get("author").cloned().unwrap_or(Value::Null);
    let author_handle = string_field(&author, &["uniqueId", "unique_id"]).unwrap_or("");
    let seller_name =
        string_field(&author, &["nickname", "uniqueId", "unique_id"]).map(str::to_string);

    let description = string_field(item, &["desc", "description"]).unwrap_or("");
    let title = if description.is_empty() {
        format!("Item {}", source_id)
    } else {
        truncate(description, 100)
    };

    let stats = item.get("stats").or_else(|| item.get("statistics"));
    let play_count = stats.map(|s| count_field(s, &["playCount", "play_count"])).unwrap_or(0);
    let comment_count = stats
        .map(|s| count_field(s, &["commentCount", "comment_count"]))
        .unwrap_or(0);

    let video = item.get("video").cloned().unwrap_or(Value::Null);
    let image_url = string_field(&video, &["cover", "dynamicCover", "originCover"])
        .or_else(|| string_field(item, &["cover"]))
        .unwrap_or("")
        .to_string();
    let video_url = string_field(&video, &["playAddr", "downloadAddr"]).map(str::to_string);

    let price = extract_price_from_text(description);
    let product_url = string_field(item, &["url"])
        .map(str::to_string)
        .unwrap_or_else(|| {
            format!(
                "https://www.tiktok.com/@{}/video/{}",
                author_handle, source_id
            )
        });

    Some(CanonicalProduct {
        source_id,
        title,
        description: (!description.is_empty()).then(|| description.to_string()),
        price: price.as_ref().map(|p| p.amount).unwrap_or(0.0),
        original_price: None,
        currency: price
            .and_then(|p| p.currency)
            .unwrap_or_else(|| "BRL".to_string()),
        category: infer_category(description),
        seller_name,
        seller_rating: None,
        product_rating: None,
        reviews_count: comment_count,
        sales_count: play_count / 100,
        sales_7d: 0,
        sales_30d: 0,
        discount_percent: None,
        image_url,
        images: Vec::new(),
        video_url,
        product_url,
        affiliate_url: None,
        free_shipping: false,
        trending: item
            .get("isTrending")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        on_sale: false,
        in_stock: true,
        source: AcquisitionSource::DirectApi,
        collected_at: Utc::now(),
    })
}

/// Normalize a product object from embedded page state.
fn normalize_state_product(item: &Value) -> Option<CanonicalProduct> {
    let source_id = item
        .get("id")
        .or_else(|| item.get("productId"))
        .or_else(|| item.get("product_id"))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .filter(|s| !s.is_empty() && s != "null")?;

    let title = string_field(item, &["title", "name"])?.to_string();

    // Price can be a plain number, a formatted string, or an object
    let (mut p, mut original_price, mut currency) = (None, None, None);
    match item.get("price") {
        Some(Value::Object(price_obj)) => {
            let obj = Value::Object(price_obj.clone());
            p = number_field(&obj, &["value", "min"]);
            original_price = number_field(&obj, &["original", "max"]);
            currency = string_field(&obj, &["currency"]).map(str::to_string);
        }
        Some(other) => {
            p = other
                .as_f64()
                .or_else(|| other.as_str().and_then(|s| parse_price(s).map(|pr| pr.amount)));
            original_price = number_field(item, &["originalPrice", "original_price"]);
        }
        None => {}
    }
    let p = p.unwrap_or(0.0);
    let original_price = original_price.filter(|&o| o > p);

    let mut images: Vec<String> = Vec::new();
    match item.get("images").or_else(|| item.get("image")) {
        Some(Value::Array(list)) => {
            for entry in list {
                match entry {
                    Value::String(s) => images.push(s.clone()),
                    Value::Object(_) => {
                        if let Some(url) = string_field(entry, &["url"]) {
                            images.push(url.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
        Some(Value::String(s)) => images.push(s.clone()),
        _ => {}
    }
    let image_url = images
        .first()
        .cloned()
        .or_else(|| string_field(item, &["imageUrl", "cover"]).map(str::to_string))
        .unwrap_or_default();

    let (product_rating, reviews_count) = match item.get("rating") {
        Some(Value::Object(rating_obj)) => {
            let obj = Value::Object(rating_obj.clone());
            (
                number_field(&obj, &["average"]).filter(|r| *r > 0.0),
                count_field(&obj, &["count"]),
            )
        }
        Some(other) => (
            other.as_f64().filter(|r| *r > 0.0),
            count_field(item, &["reviewCount", "reviews_count"]),
        ),
        None => (None, count_field(item, &["reviewCount", "reviews_count"])),
    };

    let seller = item
        .get("seller")
        .or_else(|| item.get("shop"))
        .cloned()
        .unwrap_or(Value::Null);
    let seller_name = string_field(&seller, &["name", "shopName"]).map(str::to_string);
    let seller_rating = number_field(&seller, &["rating"]).filter(|r| *r > 0.0);

    let product_url = string_field(item, &["url", "productUrl"])
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://shop.tiktok.com/view/product/{}", source_id));

    let in_stock = item
        .get("inStock")
        .and_then(Value::as_bool)
        .unwrap_or_else(|| count_field(item, &["stock"]) > 0 || item.get("stock").is_none());

    Some(CanonicalProduct {
        source_id,
        title,
        description: string_field(item, &["description", "desc"]).map(str::to_string),
        price: p,
        original_price,
        currency: currency.unwrap_or_else(|| "BRL".to_string()),
        category: string_field(item, &["category", "categoryName"]).map(str::to_string),
        seller_name,
        seller_rating,
        product_rating,
        reviews_count,
        sales_count: count_field(item, &["salesCount", "sold"]),
        sales_7d: count_field(item, &["sales7d"]),
        sales_30d: count_field(item, &["sales30d"]),
        discount_percent: discount_percent(p, original_price),
        image_url,
        images,
        video_url: string_field(item, &["videoUrl"]).map(str::to_string),
        product_url,
        affiliate_url: string_field(item, &["affiliateUrl"]).map(str::to_string),
        free_shipping: item
            .get("freeShipping")
            .or_else(|| item.get("hasFreeShipping"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        trending: item
            .get("isTrending")
            .or_else(|| item.get("trending"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        on_sale: original_price.is_some(),
        in_stock,
        source: AcquisitionSource::Browser,
        collected_at: Utc::now(),
    })
}

/// Normalize fields scraped from a rendered product card.
fn normalize_dom_fragment(fragment: &DomFragment) -> Option<CanonicalProduct> {
    if fragment.title.trim().is_empty() {
        return None;
    }

    let price = parse_price(&fragment.price_text);

    // Prefer the platform's product id from the URL; fall back to a hash
    // of the title so the record still has a stable identity
    let source_id = fragment
        .product_url
        .as_deref()
        .and_then(extract_product_id)
        .unwrap_or_else(|| hashed_id(&fragment.title));

    Some(CanonicalProduct {
        source_id,
        title: fragment.title.trim().to_string(),
        description: None,
        price: price.as_ref().map(|p| p.amount).unwrap_or(0.0),
        original_price: None,
        currency: price
            .and_then(|p| p.currency)
            .unwrap_or_else(|| "BRL".to_string()),
        category: None,
        seller_name: None,
        seller_rating: None,
        product_rating: fragment.rating_text.as_deref().and_then(parse_rating),
        reviews_count: 0,
        sales_count: fragment.sales_text.as_deref().map(parse_sales).unwrap_or(0),
        sales_7d: 0,
        sales_30d: 0,
        discount_percent: None,
        image_url: fragment.image_url.clone().unwrap_or_default(),
        images: fragment.image_url.iter().cloned().collect(),
        video_url: None,
        product_url: fragment.product_url.clone().unwrap_or_default(),
        affiliate_url: None,
        free_shipping: false,
        trending: false,
        on_sale: false,
        in_stock: true,
        source: AcquisitionSource::Browser,
        collected_at: Utc::now(),
    })
}

/// Normalize a synthetic catalog template. Infallible and deterministic
/// apart from the collection timestamp.
fn normalize_template(template: &TemplateProduct) -> CanonicalProduct {
    let original_price = template.base_price;
    let price = round2(original_price * (1.0 - template.discount));
    let seed = template.seed;

    let sales_count = 100 + (seed % 4900) as i64;
    let sales_7d = sales_count * 2 / 5;
    let image_seed = seed % 1000;
    let image_url = format!("https://picsum.photos/seed/{}/400/400", image_seed);

    const SELLER_PREFIXES: &[&str] = &["Star", "Best", "Top", "Super", "Mega"];
    let seller = format!(
        "Loja_{}{}",
        SELLER_PREFIXES[(seed % SELLER_PREFIXES.len() as u64) as usize],
        1 + seed % 99
    );

    CanonicalProduct {
        source_id: template.source_id.clone(),
        title: template.name.clone(),
        description: Some(format!("{} - produto viral #achados", template.name)),
        price,
        original_price: Some(original_price),
        currency: "BRL".to_string(),
        category: Some(template.category.clone()),
        seller_name: Some(seller),
        seller_rating: Some(round1(4.5 + (seed % 5) as f64 / 10.0)),
        product_rating: Some(round1(4.0 + (seed % 10) as f64 / 10.0)),
        reviews_count: 50 + (seed % 1950) as i64,
        sales_count,
        sales_7d,
        sales_30d: sales_count,
        discount_percent: discount_percent(price, Some(original_price)),
        image_url: image_url.clone(),
        images: vec![image_url],
        video_url: None,
        product_url: format!("https://shop.tiktok.com/view/product/{}", template.source_id),
        affiliate_url: Some(format!("https://affiliate.tiktok.com/p/{}", template.source_id)),
        free_shipping: seed % 10 >= 3,
        trending: true,
        on_sale: true,
        in_stock: true,
        source: AcquisitionSource::Synthetic,
        collected_at: Utc::now(),
    }
}

fn extract_product_id(url: &str) -> Option<String> {
    use regex::Regex;
    use std::sync::OnceLock;
    static PRODUCT_ID: OnceLock<Regex> = OnceLock::new();
    let re = PRODUCT_ID.get_or_init(|| Regex::new(r"/product/(\d+)").expect("static regex"));
    re.captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn hashed_id(title: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    format!("card_{}", &hex::encode(hasher.finalize())[..12])
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_api_item() {
        let item = json!({
            "id": "7301",
            "desc": "Fone incrível por R$ 1.234,56 #fone #gadget",
            "author": {"nickname": "Loja Tech", "uniqueId": "lojatech"},
            "stats": {"playCount": 150000, "commentCount": 420},
            "video": {"cover": "https://cdn.example.com/cover.jpg"}
        });

        let product = normalize(&RawPayload::ApiJson(item)).unwrap();
        assert_eq!(product.source_id, "7301");
        assert_eq!(product.price, 1234.56);
        assert_eq!(product.currency, "BRL");
        assert_eq!(product.category.as_deref(), Some("Eletrônicos"));
        assert_eq!(product.seller_name.as_deref(), Some("Loja Tech"));
        assert_eq!(product.reviews_count, 420);
        assert_eq!(product.sales_count, 1500);
        assert_eq!(product.source, AcquisitionSource::DirectApi);
        assert!(product.product_url.contains("lojatech"));
    }

    #[test]
    fn test_normalize_api_item_without_id_is_skipped() {
        let item = json!({"desc": "no id here"});
        assert!(normalize(&RawPayload::ApiJson(item)).is_none());
    }

    #[test]
    fn test_normalize_state_product_with_price_object() {
        let item = json!({
            "productId": "889900",
            "title": "Luminária Moon",
            "price": {"value": 43.90, "original": 54.90, "currency": "BRL"},
            "images": ["https://cdn.example.com/a.jpg", {"url": "https://cdn.example.com/b.jpg"}],
            "rating": {"average": 4.7, "count": 320},
            "seller": {"name": "Casa Shop", "rating": 4.9},
            "salesCount": "2.3k",
            "freeShipping": true
        });

        let product = normalize(&RawPayload::EmbeddedState(item)).unwrap();
        assert_eq!(product.source_id, "889900");
        assert_eq!(product.price, 43.90);
        assert_eq!(product.original_price, Some(54.90));
        assert_eq!(product.discount_percent, Some(20));
        assert_eq!(product.images.len(), 2);
        assert_eq!(product.product_rating, Some(4.7));
        assert_eq!(product.reviews_count, 320);
        assert_eq!(product.sales_count, 2300);
        assert!(product.free_shipping);
        assert!(product.on_sale);
        assert_eq!(product.source, AcquisitionSource::Browser);
    }

    #[test]
    fn test_state_product_original_price_not_below_current() {
        let item = json!({
            "id": "5",
            "title": "Promo",
            "price": 50.0,
            "originalPrice": 40.0
        });
        let product = normalize(&RawPayload::EmbeddedState(item)).unwrap();
        assert_eq!(product.original_price, None);
        assert_eq!(product.discount_percent, None);
        assert!(!product.on_sale);
    }

    #[test]
    fn test_normalize_dom_fragment() {
        let fragment = DomFragment {
            title: "Tênis Chunky".to_string(),
            price_text: "R$ 119,90".to_string(),
            image_url: Some("https://cdn.example.com/tenis.jpg".to_string()),
            product_url: Some("https://shop.tiktok.com/product/12345".to_string()),
            sales_text: Some("1.2k".to_string()),
            rating_text: Some("4.6".to_string()),
        };

        let product = normalize(&RawPayload::Dom(fragment)).unwrap();
        assert_eq!(product.source_id, "12345");
        assert_eq!(product.price, 119.90);
        assert_eq!(product.sales_count, 1200);
        assert_eq!(product.product_rating, Some(4.6));
    }

    #[test]
    fn test_dom_fragment_without_title_is_skipped() {
        let fragment = DomFragment::default();
        assert!(normalize(&RawPayload::Dom(fragment)).is_none());
    }

    #[test]
    fn test_dom_fragment_without_url_gets_hashed_id() {
        let fragment = DomFragment {
            title: "Produto Sem Link".to_string(),
            price_text: "R$ 10,00".to_string(),
            ..Default::default()
        };
        let product = normalize(&RawPayload::Dom(fragment.clone())).unwrap();
        assert!(product.source_id.starts_with("card_"));

        // Same title, same identity
        let again = normalize(&RawPayload::Dom(fragment)).unwrap();
        assert_eq!(product.source_id, again.source_id);
    }

    #[test]
    fn test_normalize_template_is_deterministic() {
        let template = TemplateProduct {
            source_id: "prod_abc123def456".to_string(),
            name: "Fone Bluetooth TWS".to_string(),
            category: "Eletrônicos".to_string(),
            base_price: 59.90,
            discount: 0.4,
            seed: 123456789,
        };

        let a = normalize(&RawPayload::Template(template.clone())).unwrap();
        let b = normalize(&RawPayload::Template(template)).unwrap();

        assert_eq!(a.source_id, b.source_id);
        assert_eq!(a.price, b.price);
        assert_eq!(a.sales_count, b.sales_count);
        assert_eq!(a.seller_name, b.seller_name);
        assert_eq!(a.price, 35.94);
        assert_eq!(a.original_price, Some(59.90));
        assert_eq!(a.discount_percent, Some(40));
        assert_eq!(a.source, AcquisitionSource::Synthetic);
        assert!(a.trending && a.on_sale && a.in_stock);
    }

    #[test]
    fn test_discount_percent_edge_cases() {
        assert_eq!(discount_percent(50.0, Some(100.0)), Some(50));
        assert_eq!(discount_percent(100.0, Some(100.0)), None);
        assert_eq!(discount_percent(100.0, Some(50.0)), None);
        assert_eq!(discount_percent(10.0, None), None);
    }

    #[test]
    fn test_category_inference() {
        assert_eq!(
            infer_category("vestido floral viral").as_deref(),
            Some("Moda Feminina")
        );
        assert_eq!(infer_category("carregador turbo").as_deref(), Some("Eletrônicos"));
        assert_eq!(infer_category("coisa aleatória"), None);
    }
}
