//! Shared enums for object kinds, snapshot periods and recursion modes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of storage object.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    /// A filesystem dataset.
    Dataset,
    /// A block volume.
    Volume,
    /// A point-in-time snapshot of a dataset or volume.
    Snapshot,
}

impl ObjectKind {
    /// Value of the `type` pseudo-property for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Dataset => "filesystem",
            ObjectKind::Volume => "volume",
            ObjectKind::Snapshot => "snapshot",
        }
    }

    /// Returns true for snapshots.
    pub fn is_snapshot(&self) -> bool {
        matches!(self, ObjectKind::Snapshot)
    }

    /// Returns true if objects of this kind can own child objects.
    pub fn can_own_children(&self) -> bool {
        matches!(self, ObjectKind::Dataset)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filesystem" => Ok(ObjectKind::Dataset),
            "volume" => Ok(ObjectKind::Volume),
            "snapshot" => Ok(ObjectKind::Snapshot),
            _ => Err(()),
        }
    }
}

/// Snapshot period kind.
///
/// Declaration order is the canonical rank used to break timestamp ties
/// when ordering snapshots.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PeriodKind {
    /// Sub-hourly snapshots.
    Frequent,
    /// Hourly snapshots.
    Hourly,
    /// Daily snapshots.
    Daily,
    /// Weekly snapshots.
    Weekly,
    /// Monthly snapshots.
    Monthly,
    /// Yearly snapshots.
    Yearly,
    /// Taken by hand, never scheduled or pruned.
    Manual,
    /// Short-lived, never scheduled or pruned.
    Temporary,
}

impl PeriodKind {
    /// The six scheduled periods, in rank order.
    pub const SCHEDULED: [PeriodKind; 6] = [
        PeriodKind::Frequent,
        PeriodKind::Hourly,
        PeriodKind::Daily,
        PeriodKind::Weekly,
        PeriodKind::Monthly,
        PeriodKind::Yearly,
    ];

    /// Every period kind.
    pub const ALL: [PeriodKind; 8] = [
        PeriodKind::Frequent,
        PeriodKind::Hourly,
        PeriodKind::Daily,
        PeriodKind::Weekly,
        PeriodKind::Monthly,
        PeriodKind::Yearly,
        PeriodKind::Manual,
        PeriodKind::Temporary,
    ];

    /// Wire representation stored in the snapshot period property.
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Frequent => "frequent",
            PeriodKind::Hourly => "hourly",
            PeriodKind::Daily => "daily",
            PeriodKind::Weekly => "weekly",
            PeriodKind::Monthly => "monthly",
            PeriodKind::Yearly => "yearly",
            PeriodKind::Manual => "manual",
            PeriodKind::Temporary => "temporary",
        }
    }

    /// Returns true for the six scheduled periods.
    pub fn is_scheduled(&self) -> bool {
        !matches!(self, PeriodKind::Manual | PeriodKind::Temporary)
    }
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PeriodKind::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// Who drives multi-object snapshot operations.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecursionMode {
    /// Snapkeep walks the tree and snapshots each object itself.
    #[default]
    Application,
    /// A single recursive zfs snapshot covers the whole subtree.
    Native,
}

impl RecursionMode {
    /// Wire representation stored in the recursion property.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecursionMode::Application => "snapkeep",
            RecursionMode::Native => "zfs",
        }
    }
}

impl fmt::Display for RecursionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecursionMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snapkeep" => Ok(RecursionMode::Application),
            "zfs" => Ok(RecursionMode::Native),
            _ => Err(()),
        }
    }
}

/// Byte capacity figures reported for a dataset or volume.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    /// Bytes still available to the object.
    pub bytes_available: u64,
    /// Bytes consumed by the object and its descendants.
    pub bytes_used: u64,
}

impl Capacity {
    /// Creates a capacity record.
    pub fn new(bytes_available: u64, bytes_used: u64) -> Self {
        Self {
            bytes_available,
            bytes_used,
        }
    }

    /// `bytes_used * 100 / bytes_available`, integer division.
    ///
    /// Returns `None` when nothing is available, since the ratio is undefined.
    pub fn percent_used(&self) -> Option<u64> {
        let used = self.bytes_used as u128 * 100;
        used.checked_div(self.bytes_available as u128)
            .map(|pct| pct.min(u64::MAX as u128) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_kind_round_trip() {
        for kind in [ObjectKind::Dataset, ObjectKind::Volume, ObjectKind::Snapshot] {
            assert_eq!(kind.as_str().parse::<ObjectKind>(), Ok(kind));
        }
        assert!("bookmark".parse::<ObjectKind>().is_err());
    }

    #[test]
    fn test_only_datasets_own_children() {
        assert!(ObjectKind::Dataset.can_own_children());
        assert!(!ObjectKind::Volume.can_own_children());
        assert!(!ObjectKind::Snapshot.can_own_children());
    }

    #[test]
    fn test_period_rank_order() {
        assert!(PeriodKind::Frequent < PeriodKind::Hourly);
        assert!(PeriodKind::Monthly < PeriodKind::Yearly);
        let mut sorted = PeriodKind::SCHEDULED;
        sorted.sort();
        assert_eq!(sorted, PeriodKind::SCHEDULED);
    }

    #[test]
    fn test_period_parse() {
        assert_eq!("daily".parse::<PeriodKind>(), Ok(PeriodKind::Daily));
        assert_eq!("Weekly".parse::<PeriodKind>(), Ok(PeriodKind::Weekly));
        assert!("-".parse::<PeriodKind>().is_err());
        assert!(!PeriodKind::Manual.is_scheduled());
        assert!(PeriodKind::Yearly.is_scheduled());
    }

    #[test]
    fn test_recursion_mode_parse() {
        assert_eq!("zfs".parse::<RecursionMode>(), Ok(RecursionMode::Native));
        assert_eq!(
            "snapkeep".parse::<RecursionMode>(),
            Ok(RecursionMode::Application)
        );
        assert!("both".parse::<RecursionMode>().is_err());
    }

    #[test]
    fn test_percent_used() {
        assert_eq!(Capacity::new(100, 95).percent_used(), Some(95));
        assert_eq!(Capacity::new(3, 1).percent_used(), Some(33));
        assert_eq!(Capacity::new(0, 10).percent_used(), None);
        assert_eq!(Capacity::new(1, u64::MAX).percent_used(), Some(u64::MAX));
    }
}
