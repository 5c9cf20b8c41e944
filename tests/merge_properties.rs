//! Property tests: merge is order-independent, normalize is total
use proptest::prelude::*;

use menu_extractor_lib::crawling::normalizer::{format_price, normalize, parse_price};
use menu_extractor_lib::crawling::{merge, merge_all};
use menu_extractor_lib::domain::{CategoryRef, NormalizedRecord, ObservationOrigin, RawRecord};

const CATEGORIES: [&str; 4] = ["Flower", "Pre-Rolls", "Vaporizers", "Edibles"];

fn observation() -> impl Strategy<Value = NormalizedRecord> {
    (
        0..CATEGORIES.len(),
        proptest::option::of(1u32..6),
        proptest::option::of(prop_oneof![Just("$15.00"), Just("$12.50"), Just("$1,020"), Just("call")]),
        proptest::option::of(prop_oneof![Just("CBD: 0.1%"), Just("1.2%"), Just("")]),
        proptest::option::of(prop_oneof![Just("Special Offer"), Just("2 for $20")]),
        proptest::option::of(prop_oneof![Just("THC: 23.5%"), Just("18%")]),
    )
        .prop_map(|(rank, page, price, cbd, promo, thc)| {
            let mut raw = RawRecord::empty(ObservationOrigin {
                category: CategoryRef::new(rank, CATEGORIES[rank]),
                page,
            });
            raw.product_name = "Runtz".to_string();
            raw.brand = "House".to_string();
            raw.detail_url = "https://menu.test/product/runtz-flower-3-5g".to_string();
            raw.price = price.unwrap_or_default().to_string();
            raw.cbd_percent = cbd.unwrap_or_default().to_string();
            raw.promo = promo.unwrap_or_default().to_string();
            raw.thc_percent = thc.unwrap_or_default().to_string();
            normalize(raw)
        })
}

proptest! {
    #[test]
    fn merge_is_commutative(a in observation(), b in observation()) {
        prop_assert_eq!(merge(Some(a.clone()), b.clone()), merge(Some(b), a));
    }

    #[test]
    fn merge_is_associative(a in observation(), b in observation(), c in observation()) {
        let left = merge(Some(merge(Some(a.clone()), b.clone())), c.clone());
        let right = merge(Some(a), merge(Some(b), c));
        prop_assert_eq!(left, right);
    }

    #[test]
    fn merge_all_ignores_arrival_order(
        (observations, shuffled) in proptest::collection::vec(observation(), 1..8)
            .prop_flat_map(|observations| {
                let shuffled = Just(observations.clone()).prop_shuffle();
                (Just(observations), shuffled)
            })
    ) {
        prop_assert_eq!(merge_all(observations), merge_all(shuffled));
    }

    #[test]
    fn merged_record_is_at_least_as_complete(a in observation(), b in observation()) {
        let best = a.completeness.max(b.completeness);
        prop_assert_eq!(merge(Some(a), b).completeness, best);
    }

    #[test]
    fn normalize_is_total(
        name in ".{0,40}",
        price in ".{0,16}",
        thc in ".{0,16}",
        cbd in ".{0,16}",
        url in ".{0,60}",
        promo in ".{0,20}",
    ) {
        let mut raw = RawRecord::empty(ObservationOrigin {
            category: CategoryRef::new(0, "Flower"),
            page: Some(1),
        });
        raw.product_name = name;
        raw.price = price;
        raw.thc_percent = thc;
        raw.cbd_percent = cbd;
        raw.detail_url = url;
        raw.promo = promo;

        let record = normalize(raw);
        prop_assert!(record.price.is_none_or(|value| value.is_finite() && value >= 0.0));
        prop_assert!(record.completeness <= NormalizedRecord::MAX_COMPLETENESS);
        prop_assert!(!record.identity_key.as_str().is_empty());
    }

    #[test]
    fn displayed_price_parses_back(cents in 0u64..10_000_000) {
        #[allow(clippy::cast_precision_loss)]
        let value = cents as f64 / 100.0;
        let shown = format_price(value);
        prop_assert_eq!(parse_price(&shown).map(format_price), Some(shown));
    }
}

#[test]
fn fifteen_dollars_round_trips() {
    assert_eq!(parse_price("$15.00"), Some(15.0));
    assert_eq!(format_price(15.0), "$15.00");
}

#[test]
fn missing_price_with_promo_stays_absent() {
    let mut raw = RawRecord::empty(ObservationOrigin {
        category: CategoryRef::new(0, "Flower"),
        page: Some(1),
    });
    raw.product_name = "Runtz".to_string();
    raw.promo = "Special Offer".to_string();

    let record = normalize(raw);
    assert_eq!(record.price, None);
    assert_eq!(record.promo_or_deal_type.as_deref(), Some("Special Offer"));
}
