//! Product variant records.

use crate::ids::{LocationId, VariantId};
use crate::mapping::{CountrySet, MappingSnapshot};
use crate::Revision;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A variant as delivered by the storefront fetch collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceVariant {
    /// Variant identifier.
    pub variant_id: VariantId,
    /// Source revision token.
    pub revision: Revision,
    /// Locations holding stock for this variant.
    #[serde(default)]
    pub location_ids: BTreeSet<LocationId>,
    /// Opaque attributes rendered by the feed writer.
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl SourceVariant {
    /// Routes this variant through a mapping snapshot.
    #[must_use]
    pub fn route(self, mapping: &MappingSnapshot) -> FeedRecord {
        let countries = mapping.route(&self.location_ids);
        FeedRecord {
            variant: self,
            countries,
        }
    }
}

/// A variant together with the countries it is exported into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRecord {
    /// The source data.
    pub variant: SourceVariant,
    /// Destination countries.
    pub countries: CountrySet,
}

/// Durable per-variant sync state owned by the variant state tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantRecord {
    /// Variant identifier.
    pub variant_id: VariantId,
    /// Revision exported by the last completed run that included it.
    pub last_synced_revision: Revision,
    /// Countries it was last exported into.
    pub last_seen_countries: CountrySet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::CountryCode;
    use std::collections::BTreeMap;

    #[test]
    fn source_variant_routes_through_mapping() {
        let loc = LocationId::new("loc1").unwrap();
        let mut entries = BTreeMap::new();
        entries.insert(
            loc.clone(),
            [CountryCode::new("US").unwrap()].into_iter().collect(),
        );
        let mapping = MappingSnapshot::capture(1, entries);

        let variant = SourceVariant {
            variant_id: VariantId::new("v1").unwrap(),
            revision: Revision(7),
            location_ids: [loc].into_iter().collect(),
            attributes: serde_json::json!({"title": "Shirt"}),
        };
        let record = variant.route(&mapping);
        assert_eq!(record.countries.len(), 1);
        assert_eq!(record.variant.revision, Revision(7));
    }

    #[test]
    fn source_variant_defaults_optional_fields() {
        let json = r#"{"variant_id":"v1","revision":3}"#;
        let variant: SourceVariant = serde_json::from_str(json).unwrap();
        assert!(variant.location_ids.is_empty());
        assert!(variant.attributes.is_null());
    }
}
