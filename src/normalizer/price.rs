//! Locale-aware parsing of price, sales, and rating text.
//!
//! The source platform serves Brazilian storefronts, so the grouping
//! convention is usually `1.234,56`, but API payloads and mixed-locale
//! pages also produce `1,234.56` and bare decimals. The separator roles
//! are inferred from position rather than assumed.

use regex::Regex;
use std::sync::OnceLock;

/// A parsed price with the currency implied by its symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPrice {
    pub amount: f64,
    pub currency: Option<String>,
}

/// Parse a price string like `"R$ 1.234,56"` or `"$12.99"`.
pub fn parse_price(text: &str) -> Option<ParsedPrice> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let currency = if trimmed.contains("R$") {
        Some("BRL".to_string())
    } else if trimmed.contains("US$") || trimmed.contains('$') {
        Some("USD".to_string())
    } else if trimmed.contains('€') {
        Some("EUR".to_string())
    } else {
        None
    };

    // Keep only digits and separators
    let numeric: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if numeric.is_empty() || !numeric.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let amount = parse_decimal(&numeric)?;
    if amount < 0.0 {
        return None;
    }

    Some(ParsedPrice { amount, currency })
}

/// Resolve separator roles and parse the numeric part.
fn parse_decimal(numeric: &str) -> Option<f64> {
    let last_dot = numeric.rfind('.');
    let last_comma = numeric.rfind(',');

    let normalized = match (last_dot, last_comma) {
        // Both present: the rightmost one is the decimal separator
        (Some(dot), Some(comma)) => {
            if comma > dot {
                numeric.replace('.', "").replace(',', ".")
            } else {
                numeric.replace(',', "")
            }
        }
        // Comma only: decimal when followed by 1-2 digits, grouping otherwise
        (None, Some(comma)) => {
            let decimals = numeric.len() - comma - 1;
            if decimals > 0 && decimals <= 2 {
                numeric.replace(',', ".")
            } else {
                numeric.replace(',', "")
            }
        }
        // Dot only: grouping when the string is pure groups of three
        (Some(_), None) => {
            static GROUPED: OnceLock<Regex> = OnceLock::new();
            let grouped = GROUPED.get_or_init(|| {
                Regex::new(r"^\d{1,3}(\.\d{3})+$").expect("static regex")
            });
            if grouped.is_match(numeric) {
                numeric.replace('.', "")
            } else {
                numeric.to_string()
            }
        }
        (None, None) => numeric.to_string(),
    };

    normalized.parse().ok()
}

/// Extract a price mentioned in free text, Brazilian patterns first.
pub fn extract_price_from_text(text: &str) -> Option<ParsedPrice> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"R\$\s*\d{1,3}(?:\.\d{3})*(?:,\d{1,2})?",
            r"R\$\s*\d+(?:[.,]\d{1,2})?",
            r"(?i)\d+(?:[.,]\d{1,2})?\s*reais",
            r"(?i)por\s+(\d+(?:[.,]\d{1,2})?)",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    });

    for pattern in patterns {
        if let Some(m) = pattern.captures(text) {
            let candidate = m.get(1).or_else(|| m.get(0))?.as_str();
            if let Some(mut price) = parse_price(candidate) {
                if price.currency.is_none() {
                    price.currency = Some("BRL".to_string());
                }
                return Some(price);
            }
        }
    }
    None
}

/// Parse a sales count like `"1.2k"`, `"3,5M"`, or `"850 vendidos"`.
pub fn parse_sales(text: &str) -> i64 {
    let lowered = text.trim().to_lowercase();
    if lowered.is_empty() {
        return 0;
    }

    for (suffix, multiplier) in [("k", 1_000.0), ("m", 1_000_000.0)] {
        if let Some(idx) = lowered.find(suffix) {
            let number = lowered[..idx].replace(',', ".");
            if let Ok(value) = number.trim().parse::<f64>() {
                return (value * multiplier) as i64;
            }
        }
    }

    let digits: String = lowered.chars().filter(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

/// Parse a rating, accepted only within the 0-5 scale.
pub fn parse_rating(text: &str) -> Option<f64> {
    static RATING: OnceLock<Regex> = OnceLock::new();
    let re = RATING.get_or_init(|| Regex::new(r"(\d+[.,]?\d*)").expect("static regex"));

    let m = re.captures(text)?;
    let rating: f64 = m.get(1)?.as_str().replace(',', ".").parse().ok()?;
    (0.0..=5.0).contains(&rating).then_some(rating)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brazilian_grouped_price() {
        let price = parse_price("R$ 1.234,56").unwrap();
        assert_eq!(price.amount, 1234.56);
        assert_eq!(price.currency.as_deref(), Some("BRL"));
    }

    #[test]
    fn test_brazilian_small_price() {
        let price = parse_price("R$ 59,90").unwrap();
        assert_eq!(price.amount, 59.90);
    }

    #[test]
    fn test_english_grouped_price() {
        let price = parse_price("$1,234.56").unwrap();
        assert_eq!(price.amount, 1234.56);
        assert_eq!(price.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn test_bare_decimal() {
        assert_eq!(parse_price("42.50").unwrap().amount, 42.50);
        assert_eq!(parse_price("42.50").unwrap().currency, None);
    }

    #[test]
    fn test_dot_grouping_without_decimals() {
        // pt-BR grouping with no cents
        assert_eq!(parse_price("1.234").unwrap().amount, 1234.0);
        assert_eq!(parse_price("12.345.678").unwrap().amount, 12_345_678.0);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_price("").is_none());
        assert!(parse_price("grátis").is_none());
        assert!(parse_price("R$").is_none());
    }

    #[test]
    fn test_extract_from_description() {
        let price = extract_price_from_text("achadinho por apenas R$ 89,90 🔥").unwrap();
        assert_eq!(price.amount, 89.90);
        assert_eq!(price.currency.as_deref(), Some("BRL"));

        let price = extract_price_from_text("só 45 reais hoje").unwrap();
        assert_eq!(price.amount, 45.0);
    }

    #[test]
    fn test_extract_absent() {
        assert!(extract_price_from_text("nenhum preço aqui").is_none());
    }

    #[test]
    fn test_sales_suffixes() {
        assert_eq!(parse_sales("1.2k"), 1200);
        assert_eq!(parse_sales("3,5M"), 3_500_000);
        assert_eq!(parse_sales("850 vendidos"), 850);
        assert_eq!(parse_sales(""), 0);
        assert_eq!(parse_sales("n/a"), 0);
    }

    #[test]
    fn test_rating_bounds() {
        assert_eq!(parse_rating("4.8"), Some(4.8));
        assert_eq!(parse_rating("4,5 estrelas"), Some(4.5));
        assert_eq!(parse_rating("9.9"), None);
        assert_eq!(parse_rating("no rating"), None);
    }
}
