#![warn(missing_docs)]

//! Snapkeep agent: runs snapshot-management cycles against ZFS
//!
//! The agent owns everything that touches the outside world: configuration
//! files, the `zfs`/`zpool` command runner, logging setup and the cycle that
//! strings ingestion, reconciliation, snapshotting and pruning together.

pub mod cli;
pub mod config;
pub mod cycle;
pub mod error;
pub mod runner;

pub use config::AgentConfig;
pub use cycle::{Cycle, CyclePlan, CycleSummary};
pub use error::{AgentError, AgentResult};
pub use runner::{CommandRunner, MockRunner, RecordedCall, Verb, ZfsRunner};
