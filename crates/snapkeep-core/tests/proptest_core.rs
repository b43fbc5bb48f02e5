//! Property-based tests for snapkeep-core using proptest.
//!
//! These cover the tree-wide invariants: inheritance consistency under
//! arbitrary edits, retention counts, prune deferral, monotonic due-ness,
//! deterministic ordering and the raw-line round trip.

use std::sync::Arc;

use chrono::{Duration, FixedOffset, TimeZone};
use proptest::prelude::*;
use snapkeep_core::{
    is_hourly_snapshot_needed, ordering, raw_lines, snapshots_to_prune, Capacity, ObjectKind,
    ObjectTree, PeriodKind, PropertyName, PropertyValue, RawObjectCollector, StorageNode, Timestamp,
};

fn base() -> Timestamp {
    FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .unwrap()
}

fn any_period() -> impl Strategy<Value = PeriodKind> {
    prop_oneof![
        Just(PeriodKind::Frequent),
        Just(PeriodKind::Hourly),
        Just(PeriodKind::Daily),
        Just(PeriodKind::Weekly),
        Just(PeriodKind::Monthly),
        Just(PeriodKind::Yearly),
    ]
}

fn any_inheritable() -> impl Strategy<Value = PropertyName> {
    prop::sample::select(
        PropertyName::ALL
            .into_iter()
            .filter(|p| p.is_inheritable() && p.value_type() == snapkeep_core::ValueType::Int)
            .collect::<Vec<_>>(),
    )
}

#[derive(Clone, Debug)]
enum Edit {
    Set(usize, PropertyName, i64),
    Inherit(usize, PropertyName),
    AddChild(usize),
}

fn any_edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0usize..16, any_inheritable(), -5i64..200).prop_map(|(n, p, v)| Edit::Set(n, p, v)),
        (0usize..16, any_inheritable()).prop_map(|(n, p)| Edit::Inherit(n, p)),
        (0usize..16).prop_map(Edit::AddChild),
    ]
}

fn apply(tree: &ObjectTree, nodes: &mut Vec<Arc<StorageNode>>, edit: &Edit) {
    match edit {
        Edit::Set(i, prop, value) => {
            let node = &nodes[i % nodes.len()];
            node.set_property(PropertyValue::new(*prop, *value, true).unwrap())
                .unwrap();
        }
        Edit::Inherit(i, prop) => {
            let node = &nodes[i % nodes.len()];
            if !node.is_root() {
                node.inherit_property(*prop).unwrap();
            }
        }
        Edit::AddChild(i) => {
            let parent = nodes[i % nodes.len()].clone();
            let name = format!("{}/c{}", parent.name(), nodes.len());
            let child = parent
                .create_child(&name, ObjectKind::Dataset, nodes.len() % 3 != 0)
                .unwrap();
            let stored = tree.attach(child).unwrap();
            tree.attach(
                stored
                    .create_snapshot("s", PeriodKind::Daily, base())
                    .unwrap(),
            )
            .unwrap();
            nodes.push(stored);
        }
    }
}

proptest! {
    /// Non-local properties always equal what the parent chain resolves, after
    /// any sequence of sets, inherits and child creations, and in deep copies.
    #[test]
    fn test_inheritance_consistency(edits in proptest::collection::vec(any_edit(), 1..40)) {
        let tree = ObjectTree::new();
        let root = tree
            .insert_root(StorageNode::new_root("tank", ObjectKind::Dataset).unwrap())
            .unwrap();
        let mut nodes = vec![root];
        for edit in &edits {
            apply(&tree, &mut nodes, edit);
            prop_assert!(tree.inheritance_violations().is_empty(), "after {:?}", edit);
        }
        let copy = tree.deep_copy().unwrap();
        prop_assert!(copy.inheritance_violations().is_empty());
        prop_assert_eq!(copy.len(), tree.len());
    }

    /// Per period, exactly `max(0, eligible - retention)` snapshots are pruned.
    #[test]
    fn test_pruning_threshold(
        snaps in proptest::collection::vec((any_period(), any::<bool>(), 0i64..100_000), 0..40),
        retentions in proptest::collection::vec(0i64..6, 6),
    ) {
        let root = StorageNode::new_root("tank", ObjectKind::Dataset).unwrap();
        for name in [PropertyName::Enabled, PropertyName::PruneSnapshots] {
            root.set_property(PropertyValue::new(name, true, true).unwrap()).unwrap();
        }
        for (period, retention) in PeriodKind::SCHEDULED.iter().zip(&retentions) {
            let name = PropertyName::retention_for(*period).unwrap();
            root.set_property(PropertyValue::new(name, *retention, true).unwrap()).unwrap();
        }
        for (i, (period, prunable, offset)) in snaps.iter().enumerate() {
            let snap = root
                .create_snapshot(&format!("s{}", i), *period, base() + Duration::seconds(*offset))
                .unwrap();
            let snap = root.add_snapshot(snap).unwrap();
            if !prunable {
                snap.set_property(PropertyValue::new(PropertyName::PruneSnapshots, false, true).unwrap())
                    .unwrap();
            }
        }

        let pruned = snapshots_to_prune(&root);
        for (period, retention) in PeriodKind::SCHEDULED.iter().zip(&retentions) {
            let eligible = snaps.iter().filter(|(p, prunable, _)| p == period && *prunable).count() as i64;
            let selected = pruned.iter().filter(|s| s.period() == Some(*period)).count() as i64;
            prop_assert_eq!(selected, (eligible - retention).max(0));
        }
        prop_assert!(pruned.iter().all(|s| s.prune_snapshots()));
    }

    /// Below the deferral threshold nothing is pruned.
    #[test]
    fn test_pruning_deferral(
        available in 1u64..1_000_000,
        used in 0u64..1_000_000,
        deferral in 1i64..=100,
        count in 1usize..10,
    ) {
        let root = StorageNode::new_root("tank", ObjectKind::Dataset).unwrap();
        for name in [PropertyName::Enabled, PropertyName::PruneSnapshots] {
            root.set_property(PropertyValue::new(name, true, true).unwrap()).unwrap();
        }
        root.set_property(PropertyValue::new(PropertyName::RetentionDaily, 0i64, true).unwrap()).unwrap();
        root.set_property(PropertyValue::new(PropertyName::PruneDeferral, deferral, true).unwrap()).unwrap();
        root.set_capacity(Capacity::new(available, used));
        for i in 0..count {
            root.add_snapshot(root.create_snapshot(&format!("d{}", i), PeriodKind::Daily, base()).unwrap())
                .unwrap();
        }

        let percent = used * 100 / available;
        let pruned = snapshots_to_prune(&root);
        if percent < deferral as u64 {
            prop_assert!(pruned.is_empty());
        } else {
            prop_assert_eq!(pruned.len(), count);
        }
    }

    /// An hourly snapshot is never due for an instant before the last one.
    #[test]
    fn test_hourly_monotonic(last_offset in 0i64..10_000_000, back in 1i64..10_000_000) {
        let root = StorageNode::new_root("tank", ObjectKind::Dataset).unwrap();
        let last = base() + Duration::seconds(last_offset);
        root.set_property(PropertyValue::new(PropertyName::LastHourlySnapshot, last, true).unwrap())
            .unwrap();
        prop_assert!(!is_hourly_snapshot_needed(&root, last - Duration::seconds(back)));
    }

    /// Sorting snapshots with equal timestamps is deterministic: rank, then name.
    #[test]
    fn test_ordering_stability(
        entries in proptest::collection::btree_set(("[a-z]{1,6}", any_period()), 1..20),
        seed in any::<u64>(),
    ) {
        let root = StorageNode::new_root("tank", ObjectKind::Dataset).unwrap();
        let mut snaps: Vec<_> = entries
            .iter()
            .enumerate()
            .map(|(i, (name, period))| {
                root.create_snapshot(&format!("{}{}", name, i), *period, base()).unwrap()
            })
            .collect();
        let mut reversed: Vec<_> = snaps.iter().rev().cloned().collect();
        let len = reversed.len();
        reversed.rotate_left((seed as usize) % len);

        ordering::sort_oldest_first(&mut snaps);
        ordering::sort_oldest_first(&mut reversed);
        let names = |v: &[Arc<StorageNode>]| v.iter().map(|s| s.name().to_string()).collect::<Vec<_>>();
        prop_assert_eq!(names(&snaps), names(&reversed));
        for pair in snaps.windows(2) {
            let key = |s: &Arc<StorageNode>| (s.period(), s.name().to_string());
            prop_assert!(key(&pair[0]) <= key(&pair[1]));
        }
    }

    /// Rendering nodes as raw lines and ingesting them yields equal property values.
    #[test]
    fn test_raw_line_round_trip(
        enabled in any::<bool>(),
        daily in -10i64..1000,
        deferral in 0i64..100,
        template in "[a-z]{1,12}",
        last_offset in 0i64..1_000_000_000,
        snap_offset in 0i64..1_000_000_000,
        offset_hours in -12i32..=12,
        child_local in any::<bool>(),
    ) {
        let zone = FixedOffset::east_opt(offset_hours * 3600).unwrap();
        let tree = ObjectTree::new();
        let root = tree
            .insert_root(StorageNode::new_root("tank", ObjectKind::Dataset).unwrap())
            .unwrap();
        root.set_capacity(Capacity::new(5000, 1200));
        root.set_property(PropertyValue::new(PropertyName::Enabled, enabled, true).unwrap()).unwrap();
        root.set_property(PropertyValue::new(PropertyName::RetentionDaily, daily, true).unwrap()).unwrap();
        root.set_property(PropertyValue::new(PropertyName::PruneDeferral, deferral, true).unwrap()).unwrap();
        root.set_property(PropertyValue::new(PropertyName::Template, template, true).unwrap()).unwrap();
        let last = (base() + Duration::seconds(last_offset)).with_timezone(&zone);
        root.set_property(PropertyValue::new(PropertyName::LastDailySnapshot, last, true).unwrap()).unwrap();

        let child = tree
            .attach(root.create_child("tank/a", ObjectKind::Volume, !child_local).unwrap())
            .unwrap();
        let taken = (base() + Duration::seconds(snap_offset)).with_timezone(&zone);
        tree.attach(child.create_snapshot("snap", PeriodKind::Monthly, taken).unwrap()).unwrap();

        let collector = RawObjectCollector::new();
        for node in tree.datasets() {
            collector.extend(raw_lines(&node));
            for snap in node.all_snapshots() {
                collector.extend(raw_lines(&snap));
            }
        }
        let (copy, report) = collector.build_tree();
        prop_assert!(report.is_clean());
        for name in ["tank", "tank/a", "tank/a@snap"] {
            prop_assert_eq!(
                tree.get(name).unwrap().properties(),
                copy.get(name).unwrap().properties()
            );
        }
        prop_assert_eq!(copy.get("tank/a").unwrap().capacity(), Capacity::default());
        prop_assert_eq!(copy.get("tank").unwrap().capacity(), Capacity::new(5000, 1200));
    }
}
