//! Property-based test generators using proptest.
//!
//! Identifiers are drawn from small pools so generated catalogs and
//! mappings overlap often enough to exercise routing and diffs.

use feedsync_types::{
    CountryCode, CountrySet, LocationId, MappingEntries, Revision, SourceVariant, VariantId,
};
use proptest::prelude::*;

const COUNTRIES: &[&str] = &["US", "CA", "GB", "DE", "FR", "JP"];

/// Strategy for generating country codes from a small pool.
pub fn country_code_strategy() -> impl Strategy<Value = CountryCode> {
    prop::sample::select(COUNTRIES)
        .prop_map(|code| CountryCode::new(code).expect("pool holds valid codes"))
}

/// Strategy for generating non-empty country sets.
pub fn country_set_strategy() -> impl Strategy<Value = CountrySet> {
    prop::collection::btree_set(country_code_strategy(), 1..4)
}

/// Strategy for generating location identifiers.
pub fn location_id_strategy() -> impl Strategy<Value = LocationId> {
    (0u8..12).prop_map(|n| LocationId::new(format!("loc{n}")).expect("non-empty"))
}

/// Strategy for generating location to country mappings.
pub fn mapping_entries_strategy() -> impl Strategy<Value = MappingEntries> {
    prop::collection::btree_map(location_id_strategy(), country_set_strategy(), 0..8)
}

/// Strategy for generating source variants.
pub fn source_variant_strategy() -> impl Strategy<Value = SourceVariant> {
    (
        0u16..60,
        1u64..1_000,
        prop::collection::btree_set(location_id_strategy(), 0..3),
    )
        .prop_map(|(id, revision, location_ids)| SourceVariant {
            variant_id: VariantId::new(format!("v{id}")).expect("non-empty"),
            revision: Revision(revision),
            location_ids,
            attributes: serde_json::json!({ "price": revision }),
        })
}

/// Strategy for generating catalogs with unique variant identifiers.
pub fn catalog_strategy() -> impl Strategy<Value = Vec<SourceVariant>> {
    prop::collection::vec(source_variant_strategy(), 0..40).prop_map(|mut variants| {
        variants.sort_by(|a, b| a.variant_id.cmp(&b.variant_id));
        variants.dedup_by(|a, b| a.variant_id == b.variant_id);
        variants
    })
}
