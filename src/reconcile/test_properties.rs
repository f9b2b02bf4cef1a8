//! Property-based tests for reconciler invariants.
//!
//! Arbitrary snapshots are generated over a small key alphabet so that
//! overlaps, case collisions and size clashes occur frequently.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use super::engine::{DateMismatchPolicy, ReconcileOptions, Reconciler};
use super::output::flatten_keys;
use crate::inventory::snapshot::{AttributeRecord, AttributeSnapshot};

// ──────────────────── strategies ────────────────────

fn arb_key() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-cA-C]{1,3}", 1..=3).prop_map(|parts| parts.join("/"))
}

fn arb_timestamp() -> impl Strategy<Value = Option<DateTime<Utc>>> {
    prop::option::of((1_500_000_000i64..1_500_000_010).prop_map(|s| Utc.timestamp_opt(s, 0).unwrap()))
}

fn arb_record() -> impl Strategy<Value = AttributeRecord> {
    (0u64..4, arb_timestamp()).prop_map(|(size, ts)| AttributeRecord::new(size, ts))
}

fn arb_snapshot() -> impl Strategy<Value = AttributeSnapshot> {
    prop::collection::vec((arb_key(), arb_record()), 0..24)
        .prop_map(|entries| entries.into_iter().collect())
}

fn arb_policy() -> impl Strategy<Value = DateMismatchPolicy> {
    prop_oneof![
        Just(DateMismatchPolicy::StatsOnly),
        Just(DateMismatchPolicy::IncludeInDiff)
    ]
}

fn lowercase_only(snapshot: &AttributeSnapshot) -> AttributeSnapshot {
    snapshot.normalize_case().0
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn diff_entries_come_from_source(source in arb_snapshot(), compare in arb_snapshot(), policy in arb_policy()) {
        let reconciler = Reconciler::new(ReconcileOptions { date_policy: policy, ..ReconcileOptions::default() });
        let out = reconciler.reconcile(&source, &compare);
        let folded_source = lowercase_only(&source);
        let folded_compare = lowercase_only(&compare);

        for (key, record) in &out.diff {
            prop_assert_eq!(folded_source.get(key), Some(record));
            // Never emit an entry that is attribute-identical on both sides.
            prop_assert_ne!(folded_compare.get(key), Some(record));
        }
    }

    #[test]
    fn counters_are_consistent(source in arb_snapshot(), compare in arb_snapshot(), policy in arb_policy()) {
        let reconciler = Reconciler::new(ReconcileOptions { date_policy: policy, ..ReconcileOptions::default() });
        let out = reconciler.reconcile(&source, &compare);
        let s = out.summary;

        prop_assert_eq!(out.diff.len() as u64, s.missing_keys_count + s.different_files_count);
        prop_assert!(s.size_mismatch_count <= s.different_files_count);
        prop_assert_eq!(out.diff.total_bytes(), s.total_diff_bytes);
        prop_assert!(s.missing_keys_count + s.size_mismatch_count + s.modified_date_mismatch <= s.total_source_count);
        if policy == DateMismatchPolicy::StatsOnly {
            prop_assert_eq!(s.different_files_count, s.size_mismatch_count);
        }
    }

    #[test]
    fn disjoint_sides_diff_to_the_source(source in arb_snapshot()) {
        let out = Reconciler::default().reconcile(&source, &AttributeSnapshot::new());
        let folded = lowercase_only(&source);
        prop_assert_eq!(&out.diff, &folded);
        prop_assert_eq!(out.summary.missing_keys_count, folded.len() as u64);
    }

    #[test]
    fn identical_sides_have_no_diff(source in arb_snapshot(), policy in arb_policy()) {
        let reconciler = Reconciler::new(ReconcileOptions { date_policy: policy, ..ReconcileOptions::default() });
        let out = reconciler.reconcile(&source, &source);
        prop_assert!(out.diff.is_empty());
        prop_assert_eq!(out.summary.missing_keys_count, 0);
        prop_assert_eq!(out.summary.size_mismatch_count, 0);
        prop_assert_eq!(out.summary.modified_date_mismatch, 0);
    }

    #[test]
    fn key_case_does_not_matter(source in arb_snapshot()) {
        let upper: AttributeSnapshot = source
            .iter()
            .map(|(k, r)| (k.to_uppercase(), *r))
            .collect();
        let out = Reconciler::default().reconcile(&upper, &source);
        prop_assert!(out.diff.is_empty());
    }

    #[test]
    fn prefixed_compare_matches_only_with_prefix(source in arb_snapshot()) {
        let prefixed: AttributeSnapshot = source
            .iter()
            .map(|(k, r)| (format!("archive/{k}"), *r))
            .collect();
        let with_prefix = Reconciler::new(ReconcileOptions::default().with_prefix("archive"));
        prop_assert!(with_prefix.reconcile(&source, &prefixed).diff.is_empty());

        let without = Reconciler::default().reconcile(&source, &prefixed);
        prop_assert_eq!(without.summary.missing_keys_count, lowercase_only(&source).len() as u64);
    }

    #[test]
    fn serialized_outputs_are_deterministic(source in arb_snapshot(), compare in arb_snapshot()) {
        let a = Reconciler::default().reconcile(&source, &compare);
        let b = Reconciler::default().reconcile(&source.clone(), &compare.clone());
        prop_assert_eq!(a.diff.to_json_pretty().unwrap(), b.diff.to_json_pretty().unwrap());
        prop_assert_eq!(a.summary.to_json_pretty().unwrap(), b.summary.to_json_pretty().unwrap());
        prop_assert_eq!(flatten_keys(&a.diff), flatten_keys(&b.diff));
    }
}
