//! Instructions handed to the external executor.
//!
//! The core never mutates the storage system itself. Planning and recording
//! produce these requests; the agent turns them into `zfs` invocations.

use serde::{Deserialize, Serialize};

use crate::names::SNAPSHOT_SEPARATOR;
use crate::property::{PropertyValue, Timestamp};
use crate::types::PeriodKind;

/// A batched property mutation on one object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySetRequest {
    object: String,
    properties: Vec<PropertyValue>,
}

impl PropertySetRequest {
    /// Creates an empty request for `object`.
    pub fn new(object: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            properties: Vec::new(),
        }
    }

    /// Target object name.
    pub fn object(&self) -> &str {
        &self.object
    }

    /// Queued values.
    pub fn properties(&self) -> &[PropertyValue] {
        &self.properties
    }

    /// Queues a value. A later value for the same property replaces the earlier one.
    pub fn push(&mut self, value: PropertyValue) {
        self.properties.retain(|p| p.name() != value.name());
        self.properties.push(value);
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// `name=value` tokens in queue order.
    pub fn tokens(&self) -> Vec<String> {
        self.properties.iter().map(PropertyValue::set_token).collect()
    }

    /// Tokens joined with single spaces.
    pub fn to_arg_string(&self) -> String {
        self.tokens().join(" ")
    }
}

/// A snapshot the executor should create.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRequest {
    /// Dataset or volume to snapshot.
    pub object: String,
    /// Snapshot name after `@`.
    pub short_name: String,
    /// Period the snapshot is taken for.
    pub period: PeriodKind,
    /// Instant the decision was made for.
    pub timestamp: Timestamp,
    /// Whether a single native recursive snapshot covers all descendants.
    pub recursive: bool,
}

impl SnapshotRequest {
    /// `<object>@<short_name>`
    pub fn full_name(&self) -> String {
        format!("{}{}{}", self.object, SNAPSHOT_SEPARATOR, self.short_name)
    }
}

/// Snapshots of one object the executor should destroy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyRequest {
    /// Owning dataset or volume.
    pub object: String,
    /// Fully-qualified snapshot names, in pruning order.
    pub snapshots: Vec<String>,
}

impl DestroyRequest {
    /// Returns true if there is nothing to destroy.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
