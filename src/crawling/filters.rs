//! Report filters over the finalized dataset.
//!
//! Filters produce a filtered copy for the run report. The aggregator's own
//! dataset is never touched.

use tracing::info;

use crate::domain::product::NormalizedRecord;
use crate::infrastructure::config::FilterConfig;

/// Whether `record` passes every configured filter. A missing THC or price
/// never satisfies a bound on it.
#[must_use]
pub fn passes(filters: &FilterConfig, record: &NormalizedRecord) -> bool {
    let thc_ok = filters
        .min_thc
        .is_none_or(|min| record.thc_percent.is_some_and(|thc| thc >= min));
    let price_ok = filters
        .max_price
        .is_none_or(|max| record.price.is_some_and(|price| price <= max));
    thc_ok && price_ok
}

/// Filtered copy of `dataset` and the number of records removed
#[must_use]
pub fn apply_filters(filters: &FilterConfig, dataset: &[NormalizedRecord]) -> (Vec<NormalizedRecord>, u64) {
    if !filters.is_active() {
        return (dataset.to_vec(), 0);
    }
    let kept: Vec<NormalizedRecord> = dataset.iter().filter(|record| passes(filters, record)).cloned().collect();
    let removed = (dataset.len() - kept.len()) as u64;
    info!(
        "🔍 Filters (min THC {:?}, max price {:?}) removed {} of {} records",
        filters.min_thc,
        filters.max_price,
        removed,
        dataset.len()
    );
    (kept, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawling::normalizer::normalize;
    use crate::domain::product::{ObservationOrigin, RawRecord};
    use crate::domain::value_objects::CategoryRef;
    use rstest::rstest;

    fn record(thc: &str, price: &str) -> NormalizedRecord {
        let mut raw = RawRecord::empty(ObservationOrigin {
            category: CategoryRef::new(0, "Flower"),
            page: Some(1),
        });
        raw.product_name = "Runtz".to_string();
        raw.thc_percent = thc.to_string();
        raw.price = price.to_string();
        normalize(raw)
    }

    #[rstest]
    #[case(Some(20.0), None, "25%", "", true)]
    #[case(Some(20.0), None, "18%", "", false)]
    #[case(Some(20.0), None, "", "$10", false)]
    #[case(None, Some(30.0), "", "$29.99", true)]
    #[case(None, Some(30.0), "", "$45", false)]
    #[case(None, Some(30.0), "25%", "", false)]
    #[case(Some(20.0), Some(30.0), "22%", "$25", true)]
    fn absent_values_never_pass(
        #[case] min_thc: Option<f64>,
        #[case] max_price: Option<f64>,
        #[case] thc: &str,
        #[case] price: &str,
        #[case] expected: bool,
    ) {
        let filters = FilterConfig { min_thc, max_price };
        assert_eq!(passes(&filters, &record(thc, price)), expected);
    }

    #[test]
    fn inactive_filters_keep_everything() {
        let dataset = vec![record("", ""), record("30%", "$5")];
        let (kept, removed) = apply_filters(&FilterConfig::default(), &dataset);
        assert_eq!(kept, dataset);
        assert_eq!(removed, 0);
    }

    #[test]
    fn reports_removed_count() {
        let dataset = vec![record("", "$10"), record("30%", "$5"), record("12%", "$5")];
        let filters = FilterConfig {
            min_thc: Some(20.0),
            max_price: None,
        };
        let (kept, removed) = apply_filters(&filters, &dataset);
        assert_eq!(kept.len(), 1);
        assert_eq!(removed, 2);
    }
}
