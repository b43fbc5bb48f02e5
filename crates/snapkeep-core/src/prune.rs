//! Retention pruning.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::node::StorageNode;
use crate::ordering::sort_oldest_first;
use crate::types::PeriodKind;

/// Snapshots of `node` that exceed its retention counts, oldest first per period.
///
/// Nothing is pruned unless the node is enabled with pruning switched on.
/// A positive prune deferral holds pruning back until the node's used
/// percentage reaches it. Per period, only snapshots whose own prune flag
/// is set are counted; the oldest `count - retention` of them are selected.
/// A negative retention count keeps nothing.
pub fn snapshots_to_prune(node: &StorageNode) -> Vec<Arc<StorageNode>> {
    if !node.enabled() || !node.prune_snapshots() {
        return Vec::new();
    }

    let deferral = node.prune_deferral();
    if deferral > 0 {
        match node.capacity().percent_used() {
            Some(percent) if percent < deferral.unsigned_abs() => {
                debug!(object = %node.name(), percent_used = percent, prune_deferral = deferral, "Pruning deferred");
                return Vec::new();
            }
            Some(_) => {}
            None => {
                warn!(object = %node.name(), "No available bytes reported, treating object as full");
            }
        }
    }

    let mut selected = Vec::new();
    for period in PeriodKind::SCHEDULED {
        let mut eligible: Vec<_> = node
            .snapshots(period)
            .into_iter()
            .filter(|snapshot| snapshot.prune_snapshots())
            .collect();
        let retention = usize::try_from(node.retention(period)).unwrap_or(0);
        if eligible.len() <= retention {
            continue;
        }
        sort_oldest_first(&mut eligible);
        let excess = eligible.len() - retention;
        debug!(object = %node.name(), period = %period, eligible = eligible.len(), retention, excess, "Selecting snapshots to prune");
        selected.extend(eligible.into_iter().take(excess));
    }
    selected
}
