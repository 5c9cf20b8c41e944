//! Product records as they move through the pipeline.
//!
//! `RawRecord` is what a tile (or detail page) looked like when it was read,
//! `NormalizedRecord` is the typed, comparable form the dataset is built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;

use super::value_objects::{CategoryRef, IdentityKey};

/// Where a single observation came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObservationOrigin {
    pub category: CategoryRef,
    /// Listing page number, `None` for product detail pages
    pub page: Option<u32>,
}

/// Unprocessed extraction result for one product tile.
///
/// Every text field may be empty; nothing is interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub product_name: String,
    pub category: String,
    pub brand: String,
    pub strain_type: String,
    pub thc_percent: String,
    pub cbd_percent: String,
    pub size_weight: String,
    pub price: String,
    pub promo: String,
    pub stock_status: String,
    pub detail_url: String,
    pub origin: ObservationOrigin,
    pub captured_at: DateTime<Utc>,
}

impl RawRecord {
    /// Empty record for the given origin; fields are filled in by the extractor
    #[must_use]
    pub fn empty(origin: ObservationOrigin) -> Self {
        Self {
            product_name: String::new(),
            category: origin.category.name.clone(),
            brand: String::new(),
            strain_type: String::new(),
            thc_percent: String::new(),
            cbd_percent: String::new(),
            size_weight: String::new(),
            price: String::new(),
            promo: String::new(),
            stock_status: String::new(),
            detail_url: String::new(),
            origin,
            captured_at: Utc::now(),
        }
    }
}

/// Typed product record, the unit of the output dataset.
///
/// Optional numeric fields are `None` when the source was empty or
/// unparseable. They are never replaced by zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub identity_key: IdentityKey,
    pub product_name: String,
    /// First-listed category among every observation of this product
    pub category: String,
    pub brand: String,
    pub strain_type: String,
    pub thc_percent: Option<f64>,
    pub cbd_percent: Option<f64>,
    pub size_weight: String,
    pub price: Option<f64>,
    pub price_raw: Option<String>,
    pub promo_or_deal_type: Option<String>,
    pub stock_status: String,
    pub product_url: String,
    pub completeness: u8,
    #[serde(serialize_with = "serialize_category_names")]
    pub listed_in: BTreeSet<CategoryRef>,
    pub origin: ObservationOrigin,
    pub date_captured_utc: DateTime<Utc>,
}

impl NormalizedRecord {
    /// Highest possible completeness score (price, CBD, promo)
    pub const MAX_COMPLETENESS: u8 = 3;

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.completeness >= Self::MAX_COMPLETENESS
    }
}

fn serialize_category_names<S>(listed: &BTreeSet<CategoryRef>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(listed.iter().map(|category| category.name.as_str()))
}
