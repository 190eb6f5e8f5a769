//! Extraction of product data from rendered HTML.
//!
//! The browser tier hands full page HTML here. Extraction prefers the
//! embedded page state blob (framework hydration data), then falls back to
//! scraping product cards out of the DOM.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::models::DomFragment;

/// Keywords whose presence marks a block/challenge page rather than content.
const BLOCK_SIGNATURES: &[&str] = &[
    "captcha",
    "unusual traffic",
    "access denied",
    "verify you are human",
    "security check",
];

/// State variable names probed for embedded product data, in order.
const STATE_MARKERS: &[&str] = &[
    "window.__INITIAL_STATE__",
    "window.__NEXT_DATA__",
    "window.__NUXT__",
];

/// Check page content for block-page signatures.
///
/// Returns the matched signature so the failure can name what tripped it.
pub fn detect_block_page(html: &str) -> Option<&'static str> {
    let lowered = html.to_lowercase();
    BLOCK_SIGNATURES
        .iter()
        .find(|sig| lowered.contains(*sig))
        .copied()
}

/// Pull product objects out of embedded page state.
pub fn extract_embedded_products(html: &str) -> Vec<serde_json::Value> {
    for marker in STATE_MARKERS {
        let Some(state) = extract_state_json(html, marker) else {
            continue;
        };
        let products = probe_product_list(&state);
        if !products.is_empty() {
            return products;
        }
    }
    Vec::new()
}

/// Parse the JSON object assigned to a state variable.
///
/// The assignment is followed by arbitrary script text, so the blob is
/// parsed as a prefix rather than a whole document.
fn extract_state_json(html: &str, marker: &str) -> Option<serde_json::Value> {
    let start = html.find(marker)? + marker.len();
    let rest = &html[start..];
    let eq = rest.find('=')?;
    let json_start = rest[eq + 1..].find('{')? + eq + 1;

    serde_json::Deserializer::from_str(&rest[json_start..])
        .into_iter::<serde_json::Value>()
        .next()?
        .ok()
}

/// Probe the known shapes product lists hide under.
fn probe_product_list(state: &serde_json::Value) -> Vec<serde_json::Value> {
    let candidates = [
        state.get("products"),
        state
            .get("productList")
            .and_then(|v| v.get("products")),
        state.get("search").and_then(|v| v.get("products")),
        state
            .get("props")
            .and_then(|v| v.get("pageProps"))
            .and_then(|v| v.get("products")),
    ];

    for candidate in candidates.into_iter().flatten() {
        if let Some(list) = candidate.as_array() {
            if !list.is_empty() {
                return list.clone();
            }
        }
    }
    Vec::new()
}

/// Scrape product cards out of the rendered DOM.
pub fn extract_dom_products(html: &str) -> Vec<DomFragment> {
    let document = Html::parse_document(html);

    let Ok(card_selector) =
        Selector::parse("[data-e2e='product-card'], .product-card, .product-item")
    else {
        return Vec::new();
    };

    document
        .select(&card_selector)
        .filter_map(|card| parse_card(&card))
        .collect()
}

fn parse_card(card: &ElementRef) -> Option<DomFragment> {
    let title = select_text(
        card,
        "[data-e2e='product-title'], .product-title, h3, h4",
    )?;
    if title.is_empty() {
        return None;
    }

    let price_text =
        select_text(card, "[data-e2e='product-price'], .product-price, .price").unwrap_or_default();

    let image_url = select_attr(card, "img", "src");
    let product_url = select_attr(card, "a", "href");
    let sales_text = select_text(card, "[data-e2e='product-sales'], .sales-count");
    let rating_text = select_text(card, "[data-e2e='product-rating'], .rating");

    Some(DomFragment {
        title,
        price_text,
        image_url,
        product_url,
        sales_text,
        rating_text,
    })
}

fn select_text(card: &ElementRef, selectors: &str) -> Option<String> {
    let selector = Selector::parse(selectors).ok()?;
    let element = card.select(&selector).next()?;
    let text = element.text().collect::<String>().trim().to_string();
    Some(text)
}

fn select_attr(card: &ElementRef, selectors: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selectors).ok()?;
    card.select(&selector)
        .next()
        .and_then(|e| e.value().attr(attr))
        .map(str::to_string)
}

/// Collect item video links from a search results page.
///
/// Last-resort extraction when neither state nor product cards exist:
/// trending pages list plain anchors to item pages.
pub fn extract_item_links(html: &str) -> Vec<(String, String)> {
    let Ok(re) = Regex::new(r#"href="([^"]*?/video/(\d+)[^"]*)""#) else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    re.captures_iter(html)
        .filter_map(|caps| {
            let url = caps.get(1)?.as_str().to_string();
            let id = caps.get(2)?.as_str().to_string();
            seen.insert(id.clone()).then_some((id, url))
        })
        .collect()
}
