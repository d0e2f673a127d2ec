//! Conflict resolution.
//!
//! [`resolve`] decides what to do with a mutation the remote refused
//! because the row was not at the expected version. It is a pure function
//! of the mutation, the row the remote holds now and the merge policy.

use crate::messages::RemoteRecord;
use outbox_codec::{content_hash, Document};
use outbox_core::{ConflictReason, MutationKind, PendingMutation};
use std::collections::BTreeSet;

/// Outcome of conflict resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The mutation may go ahead against the current row.
    Apply,
    /// The mutation must be dropped and the conflict surfaced.
    Reject(ConflictReason),
    /// Write these merged fields against the current row instead.
    Merge(Document),
}

/// Which collections allow field-level merging.
///
/// Row-level rejection is the default: any concurrent change to a row
/// rejects a stale update. A field-mergeable collection accepts a stale
/// update when none of the fields it touches changed on the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePolicy {
    field_merge: BTreeSet<String>,
}

impl MergePolicy {
    /// Row-level rejection everywhere.
    pub fn row_level() -> Self {
        Self::default()
    }

    /// Enables field-level merging for a collection.
    #[must_use]
    pub fn with_field_merge(mut self, collection: impl Into<String>) -> Self {
        self.field_merge.insert(collection.into());
        self
    }

    /// Returns true if the collection allows field-level merging.
    pub fn merges_fields(&self, collection: &str) -> bool {
        self.field_merge.contains(collection)
    }
}

/// Decides the fate of a mutation given the row the remote holds now.
///
/// - Create: applies unless the id is taken by a row with other content.
/// - Update: rejected if the row is gone; applies at the base version;
///   otherwise rejected, or merged when the collection allows it and no
///   touched field changed since the base.
/// - Delete: applies if the row is already gone or still at the base version.
pub fn resolve(
    mutation: &PendingMutation,
    current: Option<&RemoteRecord>,
    policy: &MergePolicy,
) -> Resolution {
    let mismatch = |current: &RemoteRecord| {
        Resolution::Reject(ConflictReason::VersionMismatch {
            expected: mutation.base_version,
            actual: Some(current.version),
        })
    };

    match mutation.kind {
        MutationKind::Create => match current {
            None => Resolution::Apply,
            Some(row) if content_hash(&row.payload) == content_hash(&mutation.data) => {
                Resolution::Apply
            }
            Some(_) => Resolution::Reject(ConflictReason::DuplicateId),
        },
        MutationKind::Update => match current {
            None => Resolution::Reject(ConflictReason::RemoteDeleted),
            Some(row) if Some(row.version) == mutation.base_version => Resolution::Apply,
            Some(row) => {
                if policy.merges_fields(&mutation.collection) && touched_fields_unchanged(mutation, row)
                {
                    let mut merged = row.payload.clone();
                    merged.extend(mutation.data.clone());
                    Resolution::Merge(merged)
                } else {
                    mismatch(row)
                }
            }
        },
        MutationKind::Delete => match current {
            None => Resolution::Apply,
            Some(row) if Some(row.version) == mutation.base_version => Resolution::Apply,
            Some(row) => mismatch(row),
        },
    }
}

fn touched_fields_unchanged(mutation: &PendingMutation, row: &RemoteRecord) -> bool {
    let Some(base) = &mutation.base_fields else {
        return false;
    };
    mutation
        .data
        .keys()
        .all(|field| row.payload.get(field) == base.get(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_codec::Value;
    use outbox_core::{EntityId, Version};
    use proptest::prelude::*;

    fn doc(pairs: &[(&str, i64)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    fn row(pairs: &[(&str, i64)], version: u64) -> RemoteRecord {
        RemoteRecord::new(doc(pairs), Version::new(version))
    }

    fn update(base: u64, data: &[(&str, i64)]) -> PendingMutation {
        PendingMutation::update("tasks", EntityId::new(), doc(data), Some(Version::new(base)))
    }

    #[test]
    fn create_against_absent_or_identical_row() {
        let create = PendingMutation::create("tasks", EntityId::new(), doc(&[("a", 1)]));
        let policy = MergePolicy::row_level();
        assert_eq!(resolve(&create, None, &policy), Resolution::Apply);
        assert_eq!(
            resolve(&create, Some(&row(&[("a", 1)], 1)), &policy),
            Resolution::Apply
        );
        assert_eq!(
            resolve(&create, Some(&row(&[("a", 2)], 1)), &policy),
            Resolution::Reject(ConflictReason::DuplicateId)
        );
    }

    #[test]
    fn update_of_deleted_row() {
        let m = update(1, &[("a", 1)]);
        assert_eq!(
            resolve(&m, None, &MergePolicy::row_level()),
            Resolution::Reject(ConflictReason::RemoteDeleted)
        );
    }

    #[test]
    fn stale_update_is_rejected_by_default() {
        let m = update(1, &[("a", 5)]).with_base_fields(doc(&[("a", 1)]));
        let current = row(&[("a", 1), ("b", 9)], 2);
        assert_eq!(
            resolve(&m, Some(&current), &MergePolicy::row_level()),
            Resolution::Reject(ConflictReason::VersionMismatch {
                expected: Some(Version::new(1)),
                actual: Some(Version::new(2)),
            })
        );
        assert_eq!(
            resolve(&m, Some(&row(&[("a", 1)], 1)), &MergePolicy::row_level()),
            Resolution::Apply
        );
    }

    #[test]
    fn field_merge_when_touched_fields_untouched_remotely() {
        let policy = MergePolicy::row_level().with_field_merge("tasks");
        let m = update(1, &[("a", 5)]).with_base_fields(doc(&[("a", 1)]));

        let other_field_changed = row(&[("a", 1), ("b", 9)], 2);
        assert_eq!(
            resolve(&m, Some(&other_field_changed), &policy),
            Resolution::Merge(doc(&[("a", 5), ("b", 9)]))
        );

        let same_field_changed = row(&[("a", 3)], 2);
        assert!(matches!(
            resolve(&m, Some(&same_field_changed), &policy),
            Resolution::Reject(ConflictReason::VersionMismatch { .. })
        ));
    }

    #[test]
    fn merge_needs_base_fields() {
        let policy = MergePolicy::row_level().with_field_merge("tasks");
        let m = update(1, &[("a", 5)]);
        assert!(matches!(
            resolve(&m, Some(&row(&[("b", 1)], 2)), &policy),
            Resolution::Reject(_)
        ));
    }

    #[test]
    fn field_added_remotely_counts_as_change() {
        let policy = MergePolicy::row_level().with_field_merge("tasks");
        let m = update(1, &[("c", 5)]).with_base_fields(Document::new());
        assert!(matches!(
            resolve(&m, Some(&row(&[("c", 1)], 2)), &policy),
            Resolution::Reject(_)
        ));
    }

    #[test]
    fn delete_is_idempotent() {
        let policy = MergePolicy::row_level();
        let m = PendingMutation::delete("tasks", EntityId::new(), Some(Version::new(3)));
        assert_eq!(resolve(&m, None, &policy), Resolution::Apply);
        assert_eq!(resolve(&m, Some(&row(&[], 3)), &policy), Resolution::Apply);
        assert_eq!(
            resolve(&m, Some(&row(&[], 4)), &policy),
            Resolution::Reject(ConflictReason::VersionMismatch {
                expected: Some(Version::new(3)),
                actual: Some(Version::new(4)),
            })
        );
    }

    proptest! {
        #[test]
        fn update_at_base_version_always_applies(
            base in 0u64..1000,
            a in any::<i64>(),
            b in any::<i64>(),
            merge in any::<bool>(),
        ) {
            let policy = if merge {
                MergePolicy::row_level().with_field_merge("tasks")
            } else {
                MergePolicy::row_level()
            };
            let m = update(base, &[("a", a)]);
            let current = row(&[("a", b)], base);
            prop_assert_eq!(resolve(&m, Some(&current), &policy), Resolution::Apply);
        }

        #[test]
        fn stale_row_level_update_never_applies(base in 0u64..1000, bump in 1u64..10) {
            let m = update(base, &[("a", 1)]).with_base_fields(doc(&[("a", 1)]));
            let current = row(&[("a", 1)], base + bump);
            let is_mismatch = matches!(
                resolve(&m, Some(&current), &MergePolicy::row_level()),
                Resolution::Reject(ConflictReason::VersionMismatch { .. })
            );
            prop_assert!(is_mismatch);
        }
    }
}
