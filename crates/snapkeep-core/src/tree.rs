//! The object tree: pool roots plus a flat name index.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::node::StorageNode;
use crate::property::PropertyName;

/// All objects known to the agent, keyed by fully-qualified name.
///
/// Both maps are safe for concurrent insertion; inserting a name that is
/// already present keeps the existing node.
#[derive(Debug, Default)]
pub struct ObjectTree {
    roots: DashMap<String, Arc<StorageNode>>,
    index: DashMap<String, Arc<StorageNode>>,
}

impl ObjectTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pool root.
    pub fn insert_root(&self, root: Arc<StorageNode>) -> CoreResult<Arc<StorageNode>> {
        if !root.is_root() {
            return Err(CoreError::InvalidOperation {
                object: root.name().to_string(),
                reason: "only parentless nodes can be roots".into(),
            });
        }
        let stored = self
            .roots
            .entry(root.name().to_string())
            .or_insert(root)
            .value()
            .clone();
        self.index
            .entry(stored.name().to_string())
            .or_insert_with(|| stored.clone());
        Ok(stored)
    }

    /// Attaches a node to its parent and indexes it.
    ///
    /// Snapshots go to the parent's snapshot collection, everything else to
    /// its children. Returns the node actually stored.
    pub fn attach(&self, node: Arc<StorageNode>) -> CoreResult<Arc<StorageNode>> {
        let parent = node.parent().ok_or_else(|| CoreError::InvalidOperation {
            object: node.name().to_string(),
            reason: "roots are registered with insert_root".into(),
        })?;
        let stored = if node.kind().is_snapshot() {
            parent.add_snapshot(node)?
        } else {
            parent.add_child(node)?
        };
        self.index
            .entry(stored.name().to_string())
            .or_insert_with(|| stored.clone());
        Ok(stored)
    }

    /// Looks up any object by name.
    pub fn get(&self, name: &str) -> Option<Arc<StorageNode>> {
        self.index.get(name).map(|e| e.value().clone())
    }

    /// Returns true if an object with this name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of indexed objects, snapshots included.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the tree holds nothing.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Pool roots, sorted by name.
    pub fn roots(&self) -> Vec<Arc<StorageNode>> {
        let mut roots: Vec<_> = self.roots.iter().map(|e| e.value().clone()).collect();
        roots.sort_by(|a, b| a.name().cmp(b.name()));
        roots
    }

    /// Every dataset and volume, each root followed by its descendants.
    pub fn datasets(&self) -> Vec<Arc<StorageNode>> {
        self.roots()
            .iter()
            .flat_map(|root| root.descendants())
            .collect()
    }

    /// Every snapshot in the tree.
    pub fn snapshots(&self) -> Vec<Arc<StorageNode>> {
        self.datasets()
            .iter()
            .flat_map(|node| node.all_snapshots())
            .collect()
    }

    /// Detaches a snapshot by name from its parent and the index.
    pub fn remove_snapshot(&self, name: &str) -> Option<Arc<StorageNode>> {
        let snapshot = self.get(name)?;
        if !snapshot.kind().is_snapshot() {
            return None;
        }
        if let Some(parent) = snapshot.parent() {
            parent.remove_snapshot(&snapshot);
        }
        self.index.remove(name);
        debug!(snapshot = %name, "Removed snapshot from tree");
        Some(snapshot)
    }

    /// Independent copy of the whole tree.
    pub fn deep_copy(&self) -> CoreResult<ObjectTree> {
        let copy = ObjectTree::new();
        for root in self.roots() {
            let cloned = copy.insert_root(root.deep_copy_clone(None)?)?;
            for node in cloned.descendants() {
                copy.index
                    .entry(node.name().to_string())
                    .or_insert_with(|| node.clone());
                for snapshot in node.all_snapshots() {
                    copy.index
                        .entry(snapshot.name().to_string())
                        .or_insert(snapshot);
                }
            }
        }
        Ok(copy)
    }

    /// `(object, property)` pairs whose inherited value disagrees with the parent chain.
    pub fn inheritance_violations(&self) -> Vec<(String, PropertyName)> {
        let mut out = Vec::new();
        for node in self.datasets() {
            for prop in node.inheritance_violations() {
                out.push((node.name().to_string(), prop));
            }
            for snapshot in node.all_snapshots() {
                for prop in snapshot.inheritance_violations() {
                    out.push((snapshot.name().to_string(), prop));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{epoch, PropertyValue};
    use crate::types::{ObjectKind, PeriodKind};

    fn sample() -> ObjectTree {
        let tree = ObjectTree::new();
        let root = tree
            .insert_root(StorageNode::new_root("tank", ObjectKind::Dataset).unwrap())
            .unwrap();
        let a = tree
            .attach(root.create_child("tank/a", ObjectKind::Dataset, true).unwrap())
            .unwrap();
        tree.attach(a.create_snapshot("s1", PeriodKind::Daily, epoch()).unwrap())
            .unwrap();
        tree.attach(root.create_child("tank/vol", ObjectKind::Volume, true).unwrap())
            .unwrap();
        tree
    }

    #[test]
    fn test_attach_and_lookup() {
        let tree = sample();
        assert_eq!(tree.len(), 4);
        assert!(tree.contains("tank/a@s1"));
        assert_eq!(tree.get("tank/vol").unwrap().kind(), ObjectKind::Volume);
        assert_eq!(tree.datasets().len(), 3);
        assert_eq!(tree.snapshots().len(), 1);
    }

    #[test]
    fn test_insert_root_rejects_children() {
        let tree = sample();
        let a = tree.get("tank/a").unwrap();
        assert!(tree.insert_root(a).is_err());
    }

    #[test]
    fn test_attach_rejects_roots() {
        let tree = ObjectTree::new();
        let root = StorageNode::new_root("tank", ObjectKind::Dataset).unwrap();
        assert!(tree.attach(root).is_err());
    }

    #[test]
    fn test_remove_snapshot() {
        let tree = sample();
        assert!(tree.remove_snapshot("tank/a").is_none());
        let removed = tree.remove_snapshot("tank/a@s1").unwrap();
        assert_eq!(removed.name(), "tank/a@s1");
        assert!(!tree.contains("tank/a@s1"));
        assert_eq!(tree.get("tank/a").unwrap().snapshot_count(), 0);
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let tree = sample();
        let copy = tree.deep_copy().unwrap();
        assert_eq!(copy.len(), tree.len());

        let retention = PropertyValue::new(PropertyName::RetentionDaily, 1i64, true).unwrap();
        copy.get("tank").unwrap().set_property(retention).unwrap();
        assert_eq!(copy.get("tank/a").unwrap().retention(PeriodKind::Daily), 1);
        assert_eq!(tree.get("tank/a").unwrap().retention(PeriodKind::Daily), 90);
        assert!(copy.inheritance_violations().is_empty());
        assert!(tree.inheritance_violations().is_empty());
    }
}
