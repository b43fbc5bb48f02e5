//! Oldest-first snapshot ordering.
//!
//! Timestamp ascending, then period rank, then name. A missing snapshot
//! sorts before any present one.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::node::StorageNode;

/// Compares two snapshots oldest-first.
pub fn compare(a: Option<&StorageNode>, b: Option<&StorageNode>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a
            .timestamp()
            .cmp(&b.timestamp())
            .then_with(|| a.period().cmp(&b.period()))
            .then_with(|| a.name().cmp(b.name())),
    }
}

/// Sorts snapshots in place, oldest first.
pub fn sort_oldest_first(snapshots: &mut [Arc<StorageNode>]) {
    snapshots.sort_by(|a, b| compare(Some(a.as_ref()), Some(b.as_ref())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Timestamp;
    use crate::types::{ObjectKind, PeriodKind};
    use chrono::{FixedOffset, TimeZone};

    fn at(hour: u32) -> Timestamp {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 1, hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_orders_by_timestamp_then_rank_then_name() {
        let root = StorageNode::new_root("tank", ObjectKind::Dataset).unwrap();
        let late = root.create_snapshot("a", PeriodKind::Frequent, at(5)).unwrap();
        let daily = root.create_snapshot("z", PeriodKind::Daily, at(1)).unwrap();
        let hourly_b = root.create_snapshot("b", PeriodKind::Hourly, at(1)).unwrap();
        let hourly_a = root.create_snapshot("a", PeriodKind::Hourly, at(1)).unwrap();

        let mut snaps = vec![late, daily, hourly_b, hourly_a];
        sort_oldest_first(&mut snaps);
        let names: Vec<_> = snaps.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["tank@a", "tank@b", "tank@z", "tank@a"]);
        assert_eq!(snaps[0].period(), Some(PeriodKind::Hourly));
        assert_eq!(snaps[3].period(), Some(PeriodKind::Frequent));
    }

    #[test]
    fn test_missing_sorts_first() {
        let root = StorageNode::new_root("tank", ObjectKind::Dataset).unwrap();
        let s = root.create_snapshot("s", PeriodKind::Daily, at(1)).unwrap();
        assert_eq!(compare(None, Some(s.as_ref())), Ordering::Less);
        assert_eq!(compare(Some(s.as_ref()), None), Ordering::Greater);
        assert_eq!(compare(None, None), Ordering::Equal);
        assert_eq!(compare(Some(s.as_ref()), Some(s.as_ref())), Ordering::Equal);
    }
}
