//! Storage object tree nodes.
//!
//! A [`StorageNode`] is a dataset, volume or snapshot. Non-snapshot nodes own
//! their children and their snapshots through concurrent maps, so several
//! ingestion streams can insert into the same tree at once. Children point
//! back at their parent through a [`Weak`] reference; a root has no parent.
//!
//! Properties live in per-node slots. A slot is only ever replaced with a
//! new immutable [`PropertyValue`], never edited in place.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::error::{CoreError, CoreResult};
use crate::instructions::PropertySetRequest;
use crate::names;
use crate::property::{
    epoch, Property, PropertyName, PropertySource, PropertyType, PropertyValue, Timestamp,
};
use crate::types::{Capacity, ObjectKind, PeriodKind, RecursionMode};

/// A dataset, volume or snapshot in the object tree.
pub struct StorageNode {
    name: String,
    kind: ObjectKind,
    parent: Option<Weak<StorageNode>>,
    properties: RwLock<BTreeMap<PropertyName, PropertyValue>>,
    capacity: RwLock<Capacity>,
    children: DashMap<String, Arc<StorageNode>>,
    snapshots: HashMap<PeriodKind, DashMap<String, Arc<StorageNode>>>,
    /// Newest snapshot seen per period, independent of the persisted property.
    last_observed: RwLock<BTreeMap<PeriodKind, Timestamp>>,
}

impl StorageNode {
    fn build(
        name: String,
        kind: ObjectKind,
        parent: Option<&Arc<StorageNode>>,
        properties: BTreeMap<PropertyName, PropertyValue>,
        capacity: Capacity,
    ) -> Self {
        let snapshots = if kind.is_snapshot() {
            HashMap::new()
        } else {
            PeriodKind::ALL
                .iter()
                .map(|period| (*period, DashMap::new()))
                .collect()
        };
        Self {
            name,
            kind,
            parent: parent.map(Arc::downgrade),
            properties: RwLock::new(properties),
            capacity: RwLock::new(capacity),
            children: DashMap::new(),
            snapshots,
            last_observed: RwLock::new(BTreeMap::new()),
        }
    }

    fn check_parentage(
        name: &str,
        kind: ObjectKind,
        parent: Option<&Arc<StorageNode>>,
    ) -> CoreResult<()> {
        names::validate_name(name, kind)?;
        match (names::parent_name(name, kind), parent) {
            (None, None) => Ok(()),
            (Some(expected), Some(parent)) if expected == parent.name => {
                if kind.is_snapshot() && parent.kind.is_snapshot() {
                    return Err(CoreError::InvalidOperation {
                        object: parent.name.clone(),
                        reason: "a snapshot cannot own snapshots".into(),
                    });
                }
                if !kind.is_snapshot() && !parent.kind.can_own_children() {
                    return Err(CoreError::InvalidOperation {
                        object: parent.name.clone(),
                        reason: format!("a {} cannot own child objects", parent.kind),
                    });
                }
                Ok(())
            }
            (_, Some(parent)) => Err(CoreError::ParentMismatch {
                child: name.to_string(),
                parent: parent.name.clone(),
            }),
            (Some(_), None) => Err(CoreError::InvalidOperation {
                object: name.to_string(),
                reason: "a non-root object needs a parent".into(),
            }),
        }
    }

    fn default_properties(kind: ObjectKind) -> BTreeMap<PropertyName, PropertyValue> {
        PropertyName::ALL
            .into_iter()
            .filter(|name| name.applies_to(kind))
            .map(|name| (name, name.default_value()))
            .collect()
    }

    /// Creates a pool root with every property set to its local default.
    pub fn new_root(name: &str, kind: ObjectKind) -> CoreResult<Arc<Self>> {
        if kind.is_snapshot() {
            return Err(CoreError::InvalidOperation {
                object: name.to_string(),
                reason: "a snapshot cannot be a root".into(),
            });
        }
        Self::check_parentage(name, kind, None)?;
        Ok(Arc::new(Self::build(
            name.to_string(),
            kind,
            None,
            Self::default_properties(kind),
            Capacity::default(),
        )))
    }

    /// Assembles a node from explicit property values.
    ///
    /// Properties not supplied take their local defaults. The node is not
    /// attached to `parent`; use [`StorageNode::add_child`] or
    /// [`StorageNode::add_snapshot`] for that.
    pub fn with_properties(
        name: &str,
        kind: ObjectKind,
        parent: Option<&Arc<StorageNode>>,
        properties: impl IntoIterator<Item = PropertyValue>,
        capacity: Capacity,
    ) -> CoreResult<Arc<Self>> {
        Self::check_parentage(name, kind, parent)?;
        let mut slots = Self::default_properties(kind);
        for value in properties {
            value.check_type()?;
            let prop = value.name();
            if !prop.applies_to(kind) {
                return Err(CoreError::UnknownProperty(format!("{} on a {}", prop, kind)));
            }
            if prop == PropertyName::SnapshotPeriod
                && value.as_text().and_then(|p| p.parse::<PeriodKind>().ok()).is_none()
            {
                return Err(CoreError::InvalidOperation {
                    object: name.to_string(),
                    reason: format!("unknown snapshot period '{}'", value.to_wire()),
                });
            }
            slots.insert(prop, value);
        }
        Ok(Arc::new(Self::build(
            name.to_string(),
            kind,
            parent,
            slots,
            capacity,
        )))
    }

    /// Builds a new dataset or volume under this node.
    ///
    /// With `inherit_properties` every inheritable property is copied from
    /// this node as a non-local value; otherwise each takes its local
    /// default. The last-snapshot timestamps always start at the epoch and
    /// are local to the child. The child is not attached.
    pub fn create_child(
        self: &Arc<Self>,
        name: &str,
        kind: ObjectKind,
        inherit_properties: bool,
    ) -> CoreResult<Arc<Self>> {
        if kind.is_snapshot() {
            return Err(CoreError::InvalidOperation {
                object: name.to_string(),
                reason: "use create_snapshot for snapshots".into(),
            });
        }
        Self::check_parentage(name, kind, Some(self))?;

        let mut slots = Self::default_properties(kind);
        if inherit_properties {
            let own = self.properties.read();
            for (prop, value) in own.iter() {
                if prop.is_inheritable() {
                    slots.insert(*prop, value.with_locality(false));
                }
            }
        }

        debug!(parent = %self.name, child = %name, kind = %kind, inherit_properties, "Created child");
        Ok(Arc::new(Self::build(
            name.to_string(),
            kind,
            Some(self),
            slots,
            Capacity::default(),
        )))
    }

    /// Builds a snapshot of this node named `<self>@<short_name>`.
    ///
    /// Inheritable properties and last-snapshot timestamps are copied as
    /// non-local values; period and timestamp are local. The snapshot is not
    /// attached.
    pub fn create_snapshot(
        self: &Arc<Self>,
        short_name: &str,
        period: PeriodKind,
        timestamp: Timestamp,
    ) -> CoreResult<Arc<Self>> {
        let name = format!("{}{}{}", self.name, names::SNAPSHOT_SEPARATOR, short_name);
        Self::check_parentage(&name, ObjectKind::Snapshot, Some(self))?;

        let mut slots = BTreeMap::new();
        {
            let own = self.properties.read();
            for (prop, value) in own.iter() {
                if prop.is_inheritable() || prop.is_last_snapshot() {
                    slots.insert(*prop, value.with_locality(false));
                }
            }
        }
        slots.insert(
            PropertyName::SnapshotPeriod,
            PropertyValue::Text(Property::new(
                PropertyName::SnapshotPeriod,
                period.as_str().to_string(),
                true,
            )),
        );
        slots.insert(
            PropertyName::SnapshotTimestamp,
            PropertyValue::Timestamp(Property::new(
                PropertyName::SnapshotTimestamp,
                timestamp,
                true,
            )),
        );

        Ok(Arc::new(Self::build(
            name,
            ObjectKind::Snapshot,
            Some(self),
            slots,
            Capacity::default(),
        )))
    }

    fn is_parent_of(&self, node: &StorageNode) -> bool {
        node.parent()
            .is_some_and(|parent| std::ptr::eq(Arc::as_ptr(&parent), self))
    }

    /// Attaches a child dataset or volume.
    ///
    /// The child must already reference this node as its parent. If a child
    /// with the same name is present it is kept and returned.
    pub fn add_child(&self, child: Arc<StorageNode>) -> CoreResult<Arc<StorageNode>> {
        if child.kind.is_snapshot() {
            return Err(CoreError::InvalidOperation {
                object: child.name.clone(),
                reason: "snapshots are attached with add_snapshot".into(),
            });
        }
        if !self.kind.can_own_children() {
            return Err(CoreError::InvalidOperation {
                object: self.name.clone(),
                reason: format!("a {} cannot own child objects", self.kind),
            });
        }
        if !self.is_parent_of(&child) {
            return Err(CoreError::ParentMismatch {
                child: child.name.clone(),
                parent: self.name.clone(),
            });
        }

        let stored = self
            .children
            .entry(child.name.clone())
            .or_insert(child)
            .value()
            .clone();
        Ok(stored)
    }

    /// Attaches a snapshot under its period and advances the observed
    /// last-snapshot cache when the snapshot is newer.
    pub fn add_snapshot(&self, snapshot: Arc<StorageNode>) -> CoreResult<Arc<StorageNode>> {
        if !snapshot.kind.is_snapshot() {
            return Err(CoreError::InvalidOperation {
                object: snapshot.name.clone(),
                reason: "only snapshots can be attached with add_snapshot".into(),
            });
        }
        if !self.is_parent_of(&snapshot) {
            return Err(CoreError::ParentMismatch {
                child: snapshot.name.clone(),
                parent: self.name.clone(),
            });
        }

        let period = snapshot.period().unwrap_or(PeriodKind::Manual);
        let bucket = self
            .snapshots
            .get(&period)
            .ok_or_else(|| CoreError::InvalidOperation {
                object: self.name.clone(),
                reason: "a snapshot cannot own snapshots".into(),
            })?;
        let stored = bucket
            .entry(snapshot.name.clone())
            .or_insert(snapshot)
            .value()
            .clone();

        if let Some(taken) = stored.timestamp() {
            let mut observed = self.last_observed.write();
            let newest = observed.entry(period).or_insert(taken);
            if taken > *newest {
                *newest = taken;
            }
            trace!(object = %self.name, period = %period, observed = %newest, "Observed snapshot");
        }
        Ok(stored)
    }

    /// Detaches a snapshot. Returns it if it was present.
    pub fn remove_snapshot(&self, snapshot: &StorageNode) -> Option<Arc<StorageNode>> {
        let period = snapshot.period().unwrap_or(PeriodKind::Manual);
        self.snapshots
            .get(&period)
            .and_then(|bucket| bucket.remove(&snapshot.name))
            .map(|(_, removed)| removed)
    }

    /// Looks up one of this node's snapshots by fully-qualified name.
    pub fn find_snapshot(&self, name: &str) -> Option<Arc<StorageNode>> {
        self.snapshots
            .values()
            .find_map(|bucket| bucket.get(name).map(|entry| entry.value().clone()))
    }

    /// Recursively copies this node, its descendants and their snapshots.
    ///
    /// The copy hangs off `new_parent`, which must carry the same name as the
    /// original parent. Every node in the copy is freshly allocated, so edits
    /// to it never reach the original subtree.
    pub fn deep_copy_clone(
        &self,
        new_parent: Option<&Arc<StorageNode>>,
    ) -> CoreResult<Arc<StorageNode>> {
        Self::check_parentage(&self.name, self.kind, new_parent)?;

        let copy = Arc::new(Self::build(
            self.name.clone(),
            self.kind,
            new_parent,
            self.properties.read().clone(),
            *self.capacity.read(),
        ));
        *copy.last_observed.write() = self.last_observed.read().clone();

        for child in self.children() {
            let cloned = child.deep_copy_clone(Some(&copy))?;
            copy.add_child(cloned)?;
        }
        for snapshot in self.all_snapshots() {
            let cloned = snapshot.deep_copy_clone(Some(&copy))?;
            copy.add_snapshot(cloned)?;
        }
        Ok(copy)
    }

    /// Fully-qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object kind.
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// The parent node, if this is not a root and the parent is still alive.
    pub fn parent(&self) -> Option<Arc<StorageNode>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Returns true for pool roots.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Child datasets and volumes, sorted by name.
    pub fn children(&self) -> Vec<Arc<StorageNode>> {
        let mut children: Vec<_> = self.children.iter().map(|e| e.value().clone()).collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        children
    }

    /// Looks up a direct child by fully-qualified name.
    pub fn child(&self, name: &str) -> Option<Arc<StorageNode>> {
        self.children.get(name).map(|e| e.value().clone())
    }

    /// Snapshots of one period, sorted by name.
    pub fn snapshots(&self, period: PeriodKind) -> Vec<Arc<StorageNode>> {
        let mut snaps: Vec<_> = self
            .snapshots
            .get(&period)
            .map(|bucket| bucket.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default();
        snaps.sort_by(|a, b| a.name.cmp(&b.name));
        snaps
    }

    /// Every snapshot of this node, grouped by period rank.
    pub fn all_snapshots(&self) -> Vec<Arc<StorageNode>> {
        PeriodKind::ALL
            .iter()
            .flat_map(|period| self.snapshots(*period))
            .collect()
    }

    /// Number of snapshots across all periods.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.values().map(DashMap::len).sum()
    }

    /// This node and every descendant dataset/volume, parents first.
    pub fn descendants(self: &Arc<Self>) -> Vec<Arc<StorageNode>> {
        let mut out = vec![Arc::clone(self)];
        for child in self.children() {
            out.extend(child.descendants());
        }
        out
    }

    /// Newest snapshot observed for `period` since this node was built.
    pub fn last_observed(&self, period: PeriodKind) -> Option<Timestamp> {
        self.last_observed.read().get(&period).copied()
    }

    /// Capacity figures. Snapshots mirror their parent.
    pub fn capacity(&self) -> Capacity {
        if self.kind.is_snapshot() {
            if let Some(parent) = self.parent() {
                return parent.capacity();
            }
        }
        *self.capacity.read()
    }

    /// Replaces the capacity figures.
    pub fn set_capacity(&self, capacity: Capacity) {
        *self.capacity.write() = capacity;
    }

    /// Current value of a property slot.
    pub fn property(&self, name: PropertyName) -> CoreResult<PropertyValue> {
        self.properties
            .read()
            .get(&name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownProperty(format!("{} on a {}", name, self.kind)))
    }

    /// Current value of a property slot as a typed property.
    pub fn typed_property<T: PropertyType>(&self, name: PropertyName) -> CoreResult<Property<T>> {
        let value = self.property(name)?;
        T::from_value(&value)
            .cloned()
            .ok_or(CoreError::PropertyTypeMismatch {
                name,
                expected: name.value_type().as_str(),
            })
    }

    /// Every property slot, ordered by name.
    pub fn properties(&self) -> Vec<PropertyValue> {
        self.properties.read().values().cloned().collect()
    }

    /// Returns true if the slot holds a local value.
    pub fn is_local(&self, name: PropertyName) -> bool {
        self.properties
            .read()
            .get(&name)
            .is_some_and(PropertyValue::is_local)
    }

    fn effective<T: PropertyType + Default>(&self, name: PropertyName) -> T {
        let stored = self
            .properties
            .read()
            .get(&name)
            .and_then(|v| T::from_value(v).map(|p| p.value().clone()));
        stored
            .or_else(|| T::from_value(&name.default_value()).map(|p| p.value().clone()))
            .unwrap_or_default()
    }

    /// `snapkeep:enabled`
    pub fn enabled(&self) -> bool {
        self.effective(PropertyName::Enabled)
    }

    /// `snapkeep:takesnapshots`
    pub fn take_snapshots(&self) -> bool {
        self.effective(PropertyName::TakeSnapshots)
    }

    /// `snapkeep:prunesnapshots`
    pub fn prune_snapshots(&self) -> bool {
        self.effective(PropertyName::PruneSnapshots)
    }

    /// `snapkeep:recursion`, falling back to application recursion if unparseable.
    pub fn recursion(&self) -> RecursionMode {
        let raw = self.effective::<String>(PropertyName::Recursion);
        raw.parse().unwrap_or_else(|_| {
            warn!(object = %self.name, value = %raw, "Unknown recursion mode, using application recursion");
            RecursionMode::default()
        })
    }

    /// `snapkeep:template`
    pub fn template(&self) -> String {
        self.effective(PropertyName::Template)
    }

    /// Retention count for a period. Unscheduled periods retain nothing.
    pub fn retention(&self, period: PeriodKind) -> i64 {
        PropertyName::retention_for(period)
            .map(|name| self.effective(name))
            .unwrap_or(0)
    }

    /// `snapkeep:retention:prunedeferral`
    pub fn prune_deferral(&self) -> i64 {
        self.effective(PropertyName::PruneDeferral)
    }

    /// Persisted last-snapshot timestamp for a period.
    pub fn last_snapshot_timestamp(&self, period: PeriodKind) -> Timestamp {
        PropertyName::last_snapshot_for(period)
            .map(|name| self.effective(name))
            .unwrap_or_else(epoch)
    }

    /// Period of a snapshot. `None` for datasets and volumes.
    pub fn period(&self) -> Option<PeriodKind> {
        self.properties
            .read()
            .get(&PropertyName::SnapshotPeriod)
            .and_then(|v| v.as_text().and_then(|p| p.parse().ok()))
    }

    /// Creation instant of a snapshot. `None` for datasets and volumes.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.properties
            .read()
            .get(&PropertyName::SnapshotTimestamp)
            .and_then(PropertyValue::as_timestamp)
    }

    /// Replaces a slot without touching descendants.
    pub(crate) fn replace_slot(&self, value: PropertyValue) {
        self.properties.write().insert(value.name(), value);
    }

    fn cascade(&self, value: &PropertyValue) {
        let name = value.name();
        let inherited = value.with_locality(false);

        if name.is_inheritable() {
            for child in self.children() {
                if !child.is_local(name) {
                    child.replace_slot(inherited.clone());
                    child.cascade(&inherited);
                }
            }
        }
        if name.is_inheritable() || name.is_last_snapshot() {
            for snapshot in self.all_snapshots() {
                if !snapshot.is_local(name) {
                    snapshot.replace_slot(inherited.clone());
                }
            }
        }
    }

    /// Stores a new local value and refreshes every descendant that inherits it.
    pub fn set_property(&self, value: PropertyValue) -> CoreResult<()> {
        value.check_type()?;
        let name = value.name();
        if !name.applies_to(self.kind) {
            return Err(CoreError::UnknownProperty(format!("{} on a {}", name, self.kind)));
        }
        if !value.is_local() {
            return Err(CoreError::InvalidOperation {
                object: self.name.clone(),
                reason: format!("{} must be set locally; use inherit_property", name),
            });
        }
        if self.kind.is_snapshot() && name.is_last_snapshot() {
            return Err(CoreError::InvalidOperation {
                object: self.name.clone(),
                reason: "snapshots mirror their parent's last-snapshot timestamps".into(),
            });
        }

        debug!(object = %self.name, property = %name, value = %value.to_wire(), "Set property");
        self.replace_slot(value.clone());
        self.cascade(&value);
        Ok(())
    }

    /// Drops the local definition so the value is inherited from the parent.
    pub fn inherit_property(&self, name: PropertyName) -> CoreResult<()> {
        if !name.is_inheritable() {
            return Err(CoreError::InvalidOperation {
                object: self.name.clone(),
                reason: format!("{} is never inherited", name),
            });
        }
        let parent = self.parent().ok_or_else(|| CoreError::InvalidOperation {
            object: self.name.clone(),
            reason: "a root has no parent to inherit from".into(),
        })?;
        let inherited = parent.property(name)?.with_locality(false);

        debug!(object = %self.name, property = %name, from = %parent.name, "Inherit property");
        self.replace_slot(inherited.clone());
        self.cascade(&inherited);
        Ok(())
    }

    /// Effective value found by walking up to the first local definition.
    ///
    /// `None` means no ancestor defines the property locally, which points
    /// at an uninitialised schema.
    pub fn resolve(&self, name: PropertyName) -> Option<PropertyValue> {
        let value = self.properties.read().get(&name).cloned()?;
        if value.is_local() {
            return Some(value);
        }
        self.parent()?.resolve(name)
    }

    /// The node where the property is defined locally.
    pub fn resolve_source(self: &Arc<Self>, name: PropertyName) -> Option<Arc<StorageNode>> {
        let mut current = Arc::clone(self);
        loop {
            if current.is_local(name) {
                return Some(current);
            }
            current = current.parent()?;
        }
    }

    /// Provenance of a property: local, inherited from an ancestor, or default.
    pub fn property_source(self: &Arc<Self>, name: PropertyName) -> CoreResult<PropertySource> {
        let value = self.property(name)?;
        if value.is_local() {
            return Ok(PropertySource::Local);
        }
        Ok(match self.resolve_source(name) {
            Some(source) => PropertySource::InheritedFrom(source.name.clone()),
            None => PropertySource::Default,
        })
    }

    /// Non-local properties whose value differs from what the parent chain resolves.
    pub fn inheritance_violations(&self) -> Vec<PropertyName> {
        let slots = self.properties.read().clone();
        let parent = self.parent();
        slots
            .into_iter()
            .filter(|(_, value)| !value.is_local())
            .filter(|(name, value)| {
                let expected = parent.as_ref().and_then(|p| p.resolve(*name));
                !expected.is_some_and(|e| e.same_value(value))
            })
            .map(|(name, _)| name)
            .collect()
    }

    /// Records a snapshot the executor has just created.
    ///
    /// Attaches a snapshot node and, if newer, advances the persisted
    /// last-snapshot property. The returned request persists that change and
    /// is empty when nothing moved.
    pub fn record_snapshot(
        self: &Arc<Self>,
        short_name: &str,
        period: PeriodKind,
        timestamp: Timestamp,
    ) -> CoreResult<PropertySetRequest> {
        let snapshot = self.create_snapshot(short_name, period, timestamp)?;
        self.add_snapshot(snapshot)?;

        let mut request = PropertySetRequest::new(&self.name);
        if let Some(name) = PropertyName::last_snapshot_for(period) {
            if timestamp > self.last_snapshot_timestamp(period) {
                let value = PropertyValue::Timestamp(Property::new(name, timestamp, true));
                self.set_property(value.clone())?;
                request.push(value);
            }
        }
        Ok(request)
    }
}

impl fmt::Debug for StorageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageNode")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("is_root", &self.is_root())
            .field("children", &self.children.len())
            .field("snapshots", &self.snapshot_count())
            .finish()
    }
}
