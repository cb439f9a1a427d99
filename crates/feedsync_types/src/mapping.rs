//! Location to country mapping snapshots and their diffs.

use crate::ids::{CountryCode, LocationId};
use crate::now_millis;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Set of destination countries; sorted so serialized forms are stable.
pub type CountrySet = BTreeSet<CountryCode>;

/// Raw location to countries assignment as returned by the mapping source.
pub type MappingEntries = BTreeMap<LocationId, CountrySet>;

/// The location to country assignment captured at one point in time.
///
/// Snapshots are immutable: a detection always yields a new snapshot.
/// Locations mapped to no country are excluded and therefore dropped on
/// capture, so "mapped to nothing" and "absent" compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSnapshot {
    sequence: u64,
    captured_at: u64,
    entries: MappingEntries,
}

impl MappingSnapshot {
    /// Captures a snapshot with the given history sequence number.
    #[must_use]
    pub fn capture(sequence: u64, entries: MappingEntries) -> Self {
        let entries = entries
            .into_iter()
            .filter(|(_, countries)| !countries.is_empty())
            .collect();
        Self {
            sequence,
            captured_at: now_millis(),
            entries,
        }
    }

    /// Position in the snapshot history (1-based).
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Unix milliseconds at capture.
    #[must_use]
    pub fn captured_at(&self) -> u64 {
        self.captured_at
    }

    /// All location assignments.
    #[must_use]
    pub fn entries(&self) -> &MappingEntries {
        &self.entries
    }

    /// Countries a location serves, if it is mapped at all.
    #[must_use]
    pub fn countries_for(&self, location: &LocationId) -> Option<&CountrySet> {
        self.entries.get(location)
    }

    /// Every country that appears in the mapping.
    #[must_use]
    pub fn countries(&self) -> CountrySet {
        self.entries.values().flatten().cloned().collect()
    }

    /// Routes a set of stock locations to the union of their countries.
    #[must_use]
    pub fn route<'a, I>(&self, locations: I) -> CountrySet
    where
        I: IntoIterator<Item = &'a LocationId>,
    {
        locations
            .into_iter()
            .filter_map(|loc| self.entries.get(loc))
            .flatten()
            .cloned()
            .collect()
    }

    /// Stable SHA-256 fingerprint of the assignment (hex encoded).
    ///
    /// Independent of `sequence` and `captured_at`.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (location, countries) in &self.entries {
            hasher.update(location.as_str().as_bytes());
            hasher.update([0x1f]);
            for country in countries {
                hasher.update(country.as_str().as_bytes());
            }
            hasher.update([0x1e]);
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// Severity of a mapping change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// Identical assignments.
    Unchanged,
    /// Only additions: new locations or locations gaining countries.
    Minor,
    /// A location lost a country, was removed or was reassigned.
    Major,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Unchanged => f.write_str("UNCHANGED"),
            Classification::Minor => f.write_str("MINOR"),
            Classification::Major => f.write_str("MAJOR"),
        }
    }
}

/// Country assignment of one location before and after a detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationChange {
    /// Countries in the older snapshot.
    pub before: CountrySet,
    /// Countries in the newer snapshot.
    pub after: CountrySet,
}

impl LocationChange {
    /// Countries present only after the change.
    #[must_use]
    pub fn gained(&self) -> CountrySet {
        self.after.difference(&self.before).cloned().collect()
    }

    /// Countries present only before the change.
    #[must_use]
    pub fn lost(&self) -> CountrySet {
        self.before.difference(&self.after).cloned().collect()
    }
}

/// Result of comparing two mapping snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingDiff {
    /// Locations present only in the newer snapshot.
    pub added: MappingEntries,
    /// Locations present only in the older snapshot.
    pub removed: MappingEntries,
    /// Locations present in both with different countries.
    pub changed: BTreeMap<LocationId, LocationChange>,
    /// Overall severity.
    pub classification: Classification,
}

impl MappingDiff {
    /// Compares `old` against `new`.
    ///
    /// Any loss of a country (removal, shrink or reassignment) is MAJOR,
    /// even when the same location also gains countries.
    #[must_use]
    pub fn between(old: &MappingSnapshot, new: &MappingSnapshot) -> Self {
        Self::from_entries(old.entries(), new.entries())
    }

    /// Diff of a first capture against an empty history: everything added.
    #[must_use]
    pub fn initial(new: &MappingSnapshot) -> Self {
        Self::from_entries(&MappingEntries::new(), new.entries())
    }

    fn from_entries(old: &MappingEntries, new: &MappingEntries) -> Self {
        let mut added = MappingEntries::new();
        let mut removed = MappingEntries::new();
        let mut changed = BTreeMap::new();

        for (location, after) in new {
            match old.get(location) {
                None => {
                    added.insert(location.clone(), after.clone());
                }
                Some(before) if before != after => {
                    changed.insert(
                        location.clone(),
                        LocationChange {
                            before: before.clone(),
                            after: after.clone(),
                        },
                    );
                }
                Some(_) => {}
            }
        }
        for (location, before) in old {
            if !new.contains_key(location) {
                removed.insert(location.clone(), before.clone());
            }
        }

        let classification = if added.is_empty() && removed.is_empty() && changed.is_empty() {
            Classification::Unchanged
        } else if !removed.is_empty() || changed.values().any(|c| !c.lost().is_empty()) {
            Classification::Major
        } else {
            Classification::Minor
        };

        Self {
            added,
            removed,
            changed,
            classification,
        }
    }

    /// Countries newly reachable per location: the full set of added
    /// locations plus the gained part of changed ones.
    #[must_use]
    pub fn expansions(&self) -> MappingEntries {
        let mut out = self.added.clone();
        for (location, change) in &self.changed {
            let gained = change.gained();
            if !gained.is_empty() {
                out.entry(location.clone()).or_default().extend(gained);
            }
        }
        out
    }

    /// Number of locations touched by the diff.
    #[must_use]
    pub fn touched(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }
}
