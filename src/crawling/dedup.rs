//! # Deduplicator
//!
//! Merges observations of one product into a single canonical record.
//!
//! The winner is the maximum under a total order on observation content:
//!
//! 1. higher completeness score
//! 2. field priority: price present, then CBD present, then promo present
//! 3. product detail page over listing tile
//! 4. listing tiles only: earlier configured category, then earlier page
//! 5. remaining fields, compared exhaustively
//!
//! A detail page is fetched once per product under whichever category
//! reported it first, so its category tag is never compared. A detail
//! winner takes the origin of the first category in `listed_in`.
//!
//! `listed_in` is the union of all observations and `category` is the first
//! of them. Maximum and union are both commutative and associative, so the
//! merged record does not depend on arrival order.

use std::cmp::{Ordering, Reverse};

use crate::domain::product::NormalizedRecord;

/// Merges `incoming` into the current best record for its identity key.
#[must_use]
pub fn merge(existing: Option<NormalizedRecord>, incoming: NormalizedRecord) -> NormalizedRecord {
    let Some(existing) = existing else {
        return incoming;
    };
    debug_assert_eq!(existing.identity_key, incoming.identity_key);

    let (mut winner, loser) = if preference(&incoming, &existing) == Ordering::Greater {
        (incoming, existing)
    } else {
        (existing, incoming)
    };
    winner.listed_in.extend(loser.listed_in);
    if let Some(first) = winner.listed_in.first() {
        winner.category.clone_from(&first.name);
        if is_detail(&winner) {
            winner.origin.category = first.clone();
        }
    }
    winner
}

/// Folds every observation of one product; `None` for no observations.
pub fn merge_all(observations: impl IntoIterator<Item = NormalizedRecord>) -> Option<NormalizedRecord> {
    observations
        .into_iter()
        .fold(None, |best, record| Some(merge(best, record)))
}

/// Total order on observation content; `Greater` means `a` is preferred.
///
/// Ignores `category` and `listed_in`, which merging derives.
#[must_use]
pub fn preference(a: &NormalizedRecord, b: &NormalizedRecord) -> Ordering {
    a.completeness
        .cmp(&b.completeness)
        .then_with(|| field_priority(a).cmp(&field_priority(b)))
        .then_with(|| is_detail(a).cmp(&is_detail(b)))
        .then_with(|| listing_position(a).cmp(&listing_position(b)))
        .then_with(|| content_order(a, b))
}

const fn is_detail(record: &NormalizedRecord) -> bool {
    record.origin.page.is_none()
}

/// Earlier category, then earlier page; `None` for detail observations
fn listing_position(record: &NormalizedRecord) -> Option<Reverse<(usize, u32, &str)>> {
    let origin = &record.origin;
    origin
        .page
        .map(|page| Reverse((origin.category.rank, page, origin.category.name.as_str())))
}

fn field_priority(record: &NormalizedRecord) -> (bool, bool, bool) {
    (
        record.price.is_some(),
        record.cbd_percent.is_some(),
        record.promo_or_deal_type.is_some(),
    )
}

fn cmp_number(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}

fn content_order(a: &NormalizedRecord, b: &NormalizedRecord) -> Ordering {
    cmp_number(a.price, b.price)
        .then_with(|| cmp_number(a.cbd_percent, b.cbd_percent))
        .then_with(|| cmp_number(a.thc_percent, b.thc_percent))
        .then_with(|| a.promo_or_deal_type.cmp(&b.promo_or_deal_type))
        .then_with(|| a.price_raw.cmp(&b.price_raw))
        .then_with(|| a.product_name.cmp(&b.product_name))
        .then_with(|| a.brand.cmp(&b.brand))
        .then_with(|| a.strain_type.cmp(&b.strain_type))
        .then_with(|| a.size_weight.cmp(&b.size_weight))
        .then_with(|| a.stock_status.cmp(&b.stock_status))
        .then_with(|| a.product_url.cmp(&b.product_url))
        .then_with(|| b.date_captured_utc.cmp(&a.date_captured_utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawling::normalizer::{normalize, parse_percent};
    use crate::domain::product::{ObservationOrigin, RawRecord};
    use crate::domain::value_objects::CategoryRef;

    fn observation(rank: usize, category: &str, price: &str, promo: &str) -> NormalizedRecord {
        let mut raw = RawRecord::empty(ObservationOrigin {
            category: CategoryRef::new(rank, category),
            page: Some(1),
        });
        raw.product_name = "Runtz".to_string();
        raw.detail_url = "https://menu.test/product/runtz-flower-3-5g".to_string();
        raw.price = price.to_string();
        raw.promo = promo.to_string();
        normalize(raw)
    }

    #[test]
    fn first_observation_is_kept() {
        let record = observation(0, "Flower", "$15.00", "");
        assert_eq!(merge(None, record.clone()), record);
    }

    #[test]
    fn priced_observation_beats_promo_on_tie() {
        let flower = observation(0, "Flower", "", "Special Offer");
        let pre_rolls = observation(1, "Pre-Rolls", "$15.00", "");

        let forward = merge(Some(flower.clone()), pre_rolls.clone());
        let backward = merge(Some(pre_rolls), flower);
        assert_eq!(forward, backward);
        assert_eq!(forward.price, Some(15.0));
        assert_eq!(forward.promo_or_deal_type, None);
        assert_eq!(forward.completeness, 1);
        assert_eq!(forward.category, "Flower");
        assert_eq!(forward.listed_in.len(), 2);
    }

    #[test]
    fn higher_completeness_wins() {
        let sparse = observation(0, "Flower", "$15.00", "");
        let rich = observation(2, "Edibles", "$12.00", "2 for $20");
        let merged = merge(Some(sparse), rich);
        assert_eq!(merged.completeness, 2);
        assert_eq!(merged.price, Some(12.0));
        assert_eq!(merged.category, "Flower");
    }

    #[test]
    fn equal_content_prefers_first_listed_category() {
        let flower = observation(0, "Flower", "$15.00", "");
        let pre_rolls = observation(1, "Pre-Rolls", "$15.00", "");
        let merged = merge(Some(pre_rolls), flower);
        assert_eq!(merged.origin.category.name, "Flower");
    }

    fn detail_observation(rank: usize, category: &str, thc: &str) -> NormalizedRecord {
        let mut raw = RawRecord::empty(ObservationOrigin {
            category: CategoryRef::new(rank, category),
            page: None,
        });
        raw.product_name = "Runtz".to_string();
        raw.detail_url = "https://menu.test/product/runtz-flower-3-5g".to_string();
        raw.price = "$15.00".to_string();
        raw.thc_percent = thc.to_string();
        normalize(raw)
    }

    fn listing_with_thc(rank: usize, category: &str, thc: &str) -> NormalizedRecord {
        let mut record = observation(rank, category, "$15.00", "");
        record.thc_percent = parse_percent(thc);
        record
    }

    #[test]
    fn detail_tag_does_not_change_merged_record() {
        let flower = listing_with_thc(0, "Flower", "20%");
        let pre_rolls = listing_with_thc(1, "Pre-Rolls", "20%");
        let mut merged = Vec::new();
        for (rank, category) in [(0, "Flower"), (1, "Pre-Rolls")] {
            let mut detail = detail_observation(rank, category, "22%");
            detail.date_captured_utc = flower.date_captured_utc;
            merged.push(merge_all([flower.clone(), pre_rolls.clone(), detail]).unwrap());
        }

        assert_eq!(merged[0], merged[1]);
        assert_eq!(merged[0].thc_percent, Some(22.0));
        assert_eq!(merged[0].origin.page, None);
        assert_eq!(merged[0].origin.category.name, "Flower");
        assert_eq!(merged[0].category, "Flower");
    }

    #[test]
    fn detail_beats_equally_complete_listing_from_any_category() {
        let listing = listing_with_thc(0, "Flower", "20%");
        let detail = detail_observation(3, "Edibles", "22%");
        assert_eq!(preference(&detail, &listing), Ordering::Greater);
        assert_eq!(preference(&listing, &detail), Ordering::Less);
    }

    #[test]
    fn merge_all_is_order_independent() {
        let a = observation(0, "Flower", "", "Special Offer");
        let b = observation(1, "Pre-Rolls", "$15.00", "");
        let c = observation(2, "Edibles", "$14.00", "");
        let forward = merge_all([a.clone(), b.clone(), c.clone()]).unwrap();
        let reversed = merge_all([c, b, a]).unwrap();
        assert_eq!(forward, reversed);
        assert!(merge_all(Vec::new()).is_none());
    }
}
