//! # Normalizer
//!
//! Turns raw tile text into typed, comparable values. Total over its input:
//! a field that cannot be interpreted becomes absent, never zero and never
//! an error.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::domain::product::{NormalizedRecord, RawRecord};
use crate::domain::value_objects::IdentityKey;
use std::collections::BTreeSet;

pub const IN_STOCK: &str = "in_stock";
pub const OUT_OF_STOCK: &str = "out_of_stock";

/// Dollar amount; group 1 marks a leading minus sign
static DOLLAR_AMOUNT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(-\s*)?\$\s*(\d[\d,]*(?:\.\d+)?|\.\d+)").ok());
/// Bare number; group 1 marks a leading minus sign
static NUMBER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(-)?(\d+(?:\.\d+)?)").ok());
/// Cannabinoid label followed by its value
static LABELED_PERCENT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\b(THC|CBD)\b\s*:?\s*(-)?(\d+(?:\.\d+)?)").ok());

/// Normalizes one observation. Pure; no I/O.
#[must_use]
pub fn normalize(raw: RawRecord) -> NormalizedRecord {
    let product_name = clean_text(&raw.product_name);
    let brand = clean_text(&raw.brand);
    let product_url = raw.detail_url.trim().to_string();
    let identity_key = identity_key(&product_url, &product_name, &brand);

    let price = parse_price(&raw.price);
    let price_raw = non_empty(clean_text(&raw.price));
    let cbd_percent = parse_labeled_percent(&raw.cbd_percent, "CBD");
    let promo_or_deal_type = non_empty(clean_text(&raw.promo));
    let completeness = completeness_score(price, cbd_percent, promo_or_deal_type.as_deref());

    let category = raw.origin.category.clone();
    NormalizedRecord {
        identity_key,
        product_name,
        category: category.name.clone(),
        brand,
        strain_type: clean_text(&raw.strain_type),
        thc_percent: parse_labeled_percent(&raw.thc_percent, "THC"),
        cbd_percent,
        size_weight: clean_text(&raw.size_weight),
        price,
        price_raw,
        promo_or_deal_type,
        stock_status: canonical_stock_status(&raw.stock_status).to_string(),
        product_url,
        completeness,
        listed_in: BTreeSet::from([category]),
        origin: raw.origin,
        date_captured_utc: raw.captured_at,
    }
}

/// First dollar amount in the text: `"$1,234.50"` → `1234.5`,
/// `"$20.00 $15.00"` → `20.0`. Text without a `$` must be a bare number
/// (`"USD 9"`, `"12.50"`). Empty, unparseable, negative or non-finite → `None`.
#[must_use]
pub fn parse_price(text: &str) -> Option<f64> {
    let text = text.trim();
    let amount = match DOLLAR_AMOUNT.as_ref().and_then(|pattern| pattern.captures(text)) {
        Some(captures) if captures.get(1).is_some() => return None,
        Some(captures) => captures.get(2).map_or("", |amount| amount.as_str()).replace(',', ""),
        None => text
            .trim_start_matches("USD")
            .chars()
            .filter(|c| *c != ',' && !c.is_whitespace())
            .collect(),
    };
    non_negative(amount.parse::<f64>().ok())
}

/// Display form of a price, the inverse of [`parse_price`] for well-formed input
#[must_use]
pub fn format_price(value: f64) -> String {
    format!("${value:.2}")
}

/// First number in the text: `"THC: 23.5%"`, `"23.5 %"`, `"THC 27%"` → the
/// percentage. Nothing numeric → `None`.
#[must_use]
pub fn parse_percent(text: &str) -> Option<f64> {
    let captures = NUMBER.as_ref()?.captures(text)?;
    if captures.get(1).is_some() {
        return None;
    }
    non_negative(captures.get(2)?.as_str().parse::<f64>().ok())
}

/// Value after `label` (`"THC"` or `"CBD"`) in text that names cannabinoids,
/// so `"THC: 23.5% CBD: 0.1%"` reads 23.5 for THC and 0.1 for CBD. Text naming
/// only the other cannabinoid → `None`; unlabeled text → [`parse_percent`].
#[must_use]
pub fn parse_labeled_percent(text: &str, label: &str) -> Option<f64> {
    let Some(pattern) = LABELED_PERCENT.as_ref() else {
        return parse_percent(text);
    };
    let mut labeled = false;
    for captures in pattern.captures_iter(text) {
        labeled = true;
        if captures.get(1).is_some_and(|found| found.as_str().eq_ignore_ascii_case(label)) {
            if captures.get(2).is_some() {
                return None;
            }
            return non_negative(captures.get(3)?.as_str().parse::<f64>().ok());
        }
    }
    if labeled { None } else { parse_percent(text) }
}

fn non_negative(value: Option<f64>) -> Option<f64> {
    value.filter(|value| value.is_finite() && *value >= 0.0)
}

/// Canonical identity: last non-empty path segment of the detail URL,
/// lowercased. Without a usable URL, name and brand stand in under the
/// `unkeyed:` prefix so such records can never collide with URL keys.
#[must_use]
pub fn identity_key(product_url: &str, product_name: &str, brand: &str) -> IdentityKey {
    let slug = match Url::parse(product_url) {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|segment| !segment.is_empty()).map(ToString::to_string)),
        Err(_) => product_url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.split('/').rfind(|segment| !segment.trim().is_empty()))
            .map(ToString::to_string),
    };

    match slug {
        Some(slug) => IdentityKey::new(slug.trim().to_lowercase()),
        None => IdentityKey::new(format!(
            "{}{}|{}",
            IdentityKey::UNKEYED_PREFIX,
            product_name.to_lowercase(),
            brand.to_lowercase()
        )),
    }
}

/// Count of populated optional fields (price, CBD, promo)
#[must_use]
pub fn completeness_score(price: Option<f64>, cbd_percent: Option<f64>, promo: Option<&str>) -> u8 {
    u8::from(price.is_some()) + u8::from(cbd_percent.is_some()) + u8::from(promo.is_some())
}

#[must_use]
pub fn canonical_stock_status(label: &str) -> &'static str {
    let label = label.trim().to_lowercase().replace(['_', '-'], " ");
    if label.contains("out of stock") || label.contains("sold out") || label.contains("unavailable") {
        OUT_OF_STOCK
    } else {
        IN_STOCK
    }
}

fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::product::ObservationOrigin;
    use crate::domain::value_objects::CategoryRef;
    use rstest::rstest;

    fn raw() -> RawRecord {
        RawRecord::empty(ObservationOrigin {
            category: CategoryRef::new(1, "pre-rolls"),
            page: Some(2),
        })
    }

    #[rstest]
    #[case("$15.00", Some(15.0))]
    #[case(" $1,234.50 ", Some(1234.5))]
    #[case("USD 9", Some(9.0))]
    #[case("", None)]
    #[case("Special Offer", None)]
    #[case("$-3", None)]
    #[case("-$5.00", None)]
    #[case("$20.00 $15.00", Some(20.0))]
    #[case("$20.00$15.00", Some(20.0))]
    #[case("Was $1,020.00 now $899.99", Some(1020.0))]
    #[case("12.50", Some(12.5))]
    #[case("inf", None)]
    #[case("NaN", None)]
    fn parses_prices(#[case] text: &str, #[case] expected: Option<f64>) {
        assert_eq!(parse_price(text), expected);
    }

    #[rstest]
    #[case("THC: 23.5%", Some(23.5))]
    #[case("23.5 %", Some(23.5))]
    #[case("THC 27%", Some(27.0))]
    #[case("CBD: 0.1%", Some(0.1))]
    #[case("", None)]
    #[case("THC: --", None)]
    #[case("-4%", None)]
    #[case("THC: 23.5% CBD: 0.1%", Some(23.5))]
    fn parses_percentages(#[case] text: &str, #[case] expected: Option<f64>) {
        assert_eq!(parse_percent(text), expected);
    }

    #[rstest]
    #[case("THC: 23.5% CBD: 0.1%", "THC", Some(23.5))]
    #[case("THC: 23.5% CBD: 0.1%", "CBD", Some(0.1))]
    #[case("cbd 1.2% | thc 18%", "THC", Some(18.0))]
    #[case("CBD: 0.1%", "THC", None)]
    #[case("27%", "THC", Some(27.0))]
    #[case("THCa 25%", "THC", Some(25.0))]
    fn reads_value_for_its_label(#[case] text: &str, #[case] label: &str, #[case] expected: Option<f64>) {
        assert_eq!(parse_labeled_percent(text, label), expected);
    }

    #[test]
    fn combined_cannabinoid_text_fills_both_fields() {
        let mut record = raw();
        record.thc_percent = "THC: 23.5% CBD: 0.1%".to_string();
        record.cbd_percent = "THC: 23.5% CBD: 0.1%".to_string();
        let normalized = normalize(record);
        assert_eq!(normalized.thc_percent, Some(23.5));
        assert_eq!(normalized.cbd_percent, Some(0.1));
    }

    #[test]
    fn sale_price_next_to_original_keeps_a_price() {
        let mut record = raw();
        record.price = "$20.00 $15.00".to_string();
        let normalized = normalize(record);
        assert_eq!(normalized.price, Some(20.0));
        assert_eq!(normalized.price_raw.as_deref(), Some("$20.00 $15.00"));
        assert_eq!(normalized.completeness, 1);
    }

    #[rstest]
    #[case("https://menu.test/dispensary/green-leaf/product/Runtz-Flower-3-5g", "runtz-flower-3-5g")]
    #[case("https://menu.test/product/runtz-flower-3-5g/?ref=menu", "runtz-flower-3-5g")]
    #[case("/product/blue-dream#reviews", "blue-dream")]
    fn derives_identity_from_url_slug(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(identity_key(url, "Runtz", "Cookies").as_str(), expected);
    }

    #[test]
    fn missing_url_uses_fallback_key() {
        let key = identity_key("", "Runtz", "Cookies");
        assert!(key.is_fallback());
        assert_eq!(key.as_str(), "unkeyed:runtz|cookies");
    }

    #[test]
    fn price_round_trips_to_display_form() {
        let mut record = raw();
        record.price = "$15.00".to_string();
        let normalized = normalize(record);
        assert_eq!(normalized.price, Some(15.0));
        assert_eq!(format_price(normalized.price.unwrap()), "$15.00");
        assert_eq!(normalized.price_raw.as_deref(), Some("$15.00"));
    }

    #[test]
    fn promo_without_price_stays_absent() {
        let mut record = raw();
        record.promo = "Special Offer".to_string();
        let normalized = normalize(record);
        assert_eq!(normalized.price, None);
        assert_eq!(normalized.price_raw, None);
        assert_eq!(normalized.promo_or_deal_type.as_deref(), Some("Special Offer"));
        assert_eq!(normalized.completeness, 1);
    }

    #[test]
    fn empty_record_normalizes_to_absent_fields() {
        let normalized = normalize(raw());
        assert_eq!(normalized.thc_percent, None);
        assert_eq!(normalized.cbd_percent, None);
        assert_eq!(normalized.price, None);
        assert_eq!(normalized.completeness, 0);
        assert_eq!(normalized.stock_status, IN_STOCK);
        assert_eq!(normalized.category, "pre-rolls");
        assert_eq!(normalized.listed_in.len(), 1);
        assert!(normalized.identity_key.is_fallback());
    }

    #[rstest]
    #[case("Sold Out", OUT_OF_STOCK)]
    #[case("out_of_stock", OUT_OF_STOCK)]
    #[case("Out of stock", OUT_OF_STOCK)]
    #[case("Low stock", IN_STOCK)]
    #[case("", IN_STOCK)]
    fn canonicalizes_stock(#[case] label: &str, #[case] expected: &str) {
        assert_eq!(canonical_stock_status(label), expected);
    }
}
