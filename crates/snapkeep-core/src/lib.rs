#![warn(missing_docs)]

//! Snapkeep core: snapshot lifecycle decisions for ZFS-style dataset trees
//!
//! This crate holds the in-memory model of datasets, volumes and snapshots
//! with their inheritable `snapkeep:` properties. It decides when snapshots
//! are due, which ones retention allows to be destroyed, and how raw
//! property output from the storage system becomes a tree. It never runs
//! external commands; it produces requests for an executor instead.

pub mod error;
pub mod ingest;
pub mod instructions;
pub mod names;
pub mod node;
pub mod ordering;
pub mod plan;
pub mod property;
pub mod prune;
pub mod reconcile;
pub mod schedule;
pub mod schema;
pub mod template;
pub mod tree;
pub mod types;

pub use error::{CoreError, CoreResult, IngestError};
pub use ingest::{parse_line, raw_lines, IngestReport, RawObject, RawObjectCollector, RawProperty, RawPropertySource, SchemaDefect};
pub use instructions::{DestroyRequest, PropertySetRequest, SnapshotRequest};
pub use node::StorageNode;
pub use plan::{plan_pruning, plan_snapshots, template_for};
pub use property::{epoch, Property, PropertyName, PropertySource, PropertyType, PropertyValue, Timestamp, ValueType};
pub use prune::snapshots_to_prune;
pub use reconcile::{reconcile_node, reconcile_subtree, reconcile_tree};
pub use schema::{initialization_requests, query_property_names, root_initialization};
pub use schedule::{
    is_daily_snapshot_needed, is_frequent_snapshot_needed, is_hourly_snapshot_needed, is_monthly_snapshot_needed,
    is_snapshot_needed, is_weekly_snapshot_needed, is_yearly_snapshot_needed, snapshots_due,
};
pub use template::{FormattingConfig, Template, TimingConfig, DEFAULT_TEMPLATE};
pub use tree::ObjectTree;
pub use types::{Capacity, ObjectKind, PeriodKind, RecursionMode};
