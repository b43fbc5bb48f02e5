//! Snapshot and prune planning over a whole tree.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CoreResult;
use crate::instructions::{DestroyRequest, SnapshotRequest};
use crate::node::StorageNode;
use crate::property::Timestamp;
use crate::prune::snapshots_to_prune;
use crate::schedule::snapshots_due;
use crate::template::{Template, DEFAULT_TEMPLATE};
use crate::tree::ObjectTree;
use crate::types::RecursionMode;

/// Template named by the node, falling back to the default template.
pub fn template_for<'a>(
    node: &StorageNode,
    templates: &'a BTreeMap<String, Template>,
) -> Option<&'a Template> {
    let name = node.template();
    templates.get(&name).or_else(|| {
        warn!(object = %node.name(), template = %name, "Unknown template, using default");
        templates.get(DEFAULT_TEMPLATE)
    })
}

fn plan_node(
    node: &Arc<StorageNode>,
    timestamp: Timestamp,
    templates: &BTreeMap<String, Template>,
    covered: bool,
    out: &mut Vec<SnapshotRequest>,
) -> CoreResult<()> {
    let mode = node.recursion();
    let covered_here = covered && mode == RecursionMode::Native;
    let active = node.enabled() && node.take_snapshots();

    if covered_here {
        debug!(object = %node.name(), "Covered by an ancestor's recursive snapshot");
    } else if active {
        match template_for(node, templates) {
            Some(template) => {
                for period in snapshots_due(node, timestamp, &template.timing) {
                    out.push(SnapshotRequest {
                        object: node.name().to_string(),
                        short_name: template.snapshot_name(period, timestamp)?,
                        period,
                        timestamp,
                        recursive: mode == RecursionMode::Native,
                    });
                }
            }
            None => warn!(object = %node.name(), "No usable template, skipping"),
        }
    }

    let covers_children = covered_here || (active && mode == RecursionMode::Native);
    for child in node.children() {
        plan_node(&child, timestamp, templates, covers_children, out)?;
    }
    Ok(())
}

/// Snapshots due across the tree at `timestamp`.
///
/// Objects using native recursion get a single recursive request; their
/// descendants that also use native recursion are skipped.
pub fn plan_snapshots(
    tree: &ObjectTree,
    timestamp: Timestamp,
    templates: &BTreeMap<String, Template>,
) -> CoreResult<Vec<SnapshotRequest>> {
    let mut out = Vec::new();
    for root in tree.roots() {
        plan_node(&root, timestamp, templates, false, &mut out)?;
    }
    debug!(requests = out.len(), "Planned snapshots");
    Ok(out)
}

/// One destroy request per object with snapshots over retention.
pub fn plan_pruning(tree: &ObjectTree) -> Vec<DestroyRequest> {
    tree.datasets()
        .into_iter()
        .filter_map(|node| {
            let doomed = snapshots_to_prune(&node);
            if doomed.is_empty() {
                return None;
            }
            Some(DestroyRequest {
                object: node.name().to_string(),
                snapshots: doomed.iter().map(|s| s.name().to_string()).collect(),
            })
        })
        .collect()
}
