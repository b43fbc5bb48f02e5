//! Reconciliation of observed snapshots with persisted last-snapshot properties.
//!
//! [`StorageNode::add_snapshot`] tracks the newest snapshot seen per period,
//! separately from the `last<period>snapshottimestamp` property stored in
//! the pool. After each ingestion the agent runs this pass to bring the
//! property forward, both in memory and (through the returned requests) on
//! disk. The property never moves backwards.

use std::sync::Arc;

use tracing::debug;

use crate::error::CoreResult;
use crate::instructions::PropertySetRequest;
use crate::node::StorageNode;
use crate::property::{Property, PropertyName, PropertyValue};
use crate::tree::ObjectTree;
use crate::types::PeriodKind;

/// Advances stale last-snapshot properties of one dataset or volume.
///
/// Returns the request persisting the change; empty when nothing was stale.
pub fn reconcile_node(node: &StorageNode) -> CoreResult<PropertySetRequest> {
    let mut request = PropertySetRequest::new(node.name());
    if node.kind().is_snapshot() {
        return Ok(request);
    }
    for period in PeriodKind::SCHEDULED {
        let (Some(observed), Some(name)) = (
            node.last_observed(period),
            PropertyName::last_snapshot_for(period),
        ) else {
            continue;
        };
        let persisted = node.last_snapshot_timestamp(period);
        if observed > persisted {
            debug!(object = %node.name(), period = %period, persisted = %persisted, observed = %observed, "Last snapshot property is stale");
            let value = PropertyValue::Timestamp(Property::new(name, observed, true));
            node.set_property(value.clone())?;
            request.push(value);
        }
    }
    Ok(request)
}

/// Reconciles a root and all of its descendants. Only non-empty requests are returned.
pub fn reconcile_subtree(root: &Arc<StorageNode>) -> CoreResult<Vec<PropertySetRequest>> {
    let mut requests = Vec::new();
    for node in root.descendants() {
        let request = reconcile_node(&node)?;
        if !request.is_empty() {
            requests.push(request);
        }
    }
    Ok(requests)
}

/// Reconciles every pool in the tree.
pub fn reconcile_tree(tree: &ObjectTree) -> CoreResult<Vec<PropertySetRequest>> {
    let mut requests = Vec::new();
    for root in tree.roots() {
        requests.extend(reconcile_subtree(&root)?);
    }
    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Timestamp;
    use crate::types::ObjectKind;
    use chrono::{FixedOffset, TimeZone};

    fn at(hour: u32) -> Timestamp {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 7, 1, hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_advances_stale_property() {
        let root = StorageNode::new_root("tank", ObjectKind::Dataset).unwrap();
        root.add_snapshot(root.create_snapshot("h", PeriodKind::Hourly, at(3)).unwrap())
            .unwrap();
        root.add_snapshot(root.create_snapshot("m", PeriodKind::Manual, at(4)).unwrap())
            .unwrap();

        let request = reconcile_node(&root).unwrap();
        assert_eq!(request.properties().len(), 1);
        assert_eq!(root.last_snapshot_timestamp(PeriodKind::Hourly), at(3));

        let snap = root.find_snapshot("tank@h").unwrap();
        assert_eq!(snap.last_snapshot_timestamp(PeriodKind::Hourly), at(3));

        assert!(reconcile_node(&root).unwrap().is_empty());
    }

    #[test]
    fn test_never_moves_backwards() {
        let root = StorageNode::new_root("tank", ObjectKind::Dataset).unwrap();
        let value = PropertyValue::new(PropertyName::LastDailySnapshot, at(10), true).unwrap();
        root.set_property(value).unwrap();
        root.add_snapshot(root.create_snapshot("d", PeriodKind::Daily, at(2)).unwrap())
            .unwrap();
        assert!(reconcile_node(&root).unwrap().is_empty());
        assert_eq!(root.last_snapshot_timestamp(PeriodKind::Daily), at(10));
    }

    #[test]
    fn test_reconcile_tree_covers_descendants() {
        let tree = ObjectTree::new();
        let root = tree
            .insert_root(StorageNode::new_root("tank", ObjectKind::Dataset).unwrap())
            .unwrap();
        let a = tree
            .attach(root.create_child("tank/a", ObjectKind::Dataset, true).unwrap())
            .unwrap();
        tree.attach(a.create_snapshot("w", PeriodKind::Weekly, at(1)).unwrap())
            .unwrap();

        let requests = reconcile_tree(&tree).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].object(), "tank/a");
        assert_eq!(root.last_snapshot_timestamp(PeriodKind::Weekly), crate::property::epoch());
    }
}
