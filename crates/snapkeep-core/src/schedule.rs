//! Snapshot-due decisions.
//!
//! Each function answers "does `node` need a new snapshot of this period at
//! `timestamp`?" using the node's resolved retention and last-snapshot
//! properties. They share three steps:
//!
//! 1. a retention count of zero or less means the period is not wanted;
//! 2. a query that is not after the last snapshot is ignored (frequent and
//!    hourly accept an equal instant, the others require strictly later);
//! 3. a period-specific boundary test.
//!
//! Calendar fields of the last snapshot are read in the query's UTC offset,
//! so both instants are compared on the same wall clock.

use chrono::{Datelike, Duration, Timelike};
use tracing::trace;

use crate::node::StorageNode;
use crate::property::Timestamp;
use crate::template::TimingConfig;
use crate::types::PeriodKind;

fn last_if_eligible(
    node: &StorageNode,
    period: PeriodKind,
    timestamp: Timestamp,
    allow_equal: bool,
) -> Option<Timestamp> {
    if node.retention(period) <= 0 {
        trace!(object = %node.name(), period = %period, "Period not retained");
        return None;
    }
    let last = node.last_snapshot_timestamp(period);
    let ordered = if allow_equal {
        timestamp >= last
    } else {
        timestamp > last
    };
    if !ordered {
        trace!(object = %node.name(), period = %period, last = %last, query = %timestamp, "Query precedes last snapshot");
        return None;
    }
    Some(last.with_timezone(timestamp.offset()))
}

fn decide(node: &StorageNode, period: PeriodKind, due: bool) -> bool {
    trace!(object = %node.name(), period = %period, due, "Snapshot decision");
    due
}

/// Frequent: the configured number of minutes elapsed, or the period-of-hour bucket changed.
pub fn is_frequent_snapshot_needed(
    node: &StorageNode,
    timestamp: Timestamp,
    timing: &TimingConfig,
) -> bool {
    let Some(last) = last_if_eligible(node, PeriodKind::Frequent, timestamp, true) else {
        return false;
    };
    let elapsed = timestamp - last;
    let due = elapsed >= Duration::minutes(i64::from(timing.frequent_period))
        || timing.period_of_hour(timestamp.minute()) != timing.period_of_hour(last.minute());
    decide(node, PeriodKind::Frequent, due)
}

/// Hourly: an hour elapsed, or the wall-clock hour changed.
pub fn is_hourly_snapshot_needed(node: &StorageNode, timestamp: Timestamp) -> bool {
    let Some(last) = last_if_eligible(node, PeriodKind::Hourly, timestamp, true) else {
        return false;
    };
    let due = timestamp - last >= Duration::hours(1) || timestamp.hour() != last.hour();
    decide(node, PeriodKind::Hourly, due)
}

/// Daily: a day elapsed, or the day of the year changed.
pub fn is_daily_snapshot_needed(node: &StorageNode, timestamp: Timestamp) -> bool {
    let Some(last) = last_if_eligible(node, PeriodKind::Daily, timestamp, false) else {
        return false;
    };
    let due = timestamp - last >= Duration::days(1) || timestamp.ordinal() != last.ordinal();
    decide(node, PeriodKind::Daily, due)
}

/// Weekly: seven days elapsed, or the week (per `week_starts_on`) changed.
pub fn is_weekly_snapshot_needed(
    node: &StorageNode,
    timestamp: Timestamp,
    timing: &TimingConfig,
) -> bool {
    let Some(last) = last_if_eligible(node, PeriodKind::Weekly, timestamp, false) else {
        return false;
    };
    let week_of = |t: Timestamp| t.date_naive().week(timing.week_starts_on).first_day();
    let due = timestamp - last >= Duration::days(7) || week_of(timestamp) != week_of(last);
    decide(node, PeriodKind::Weekly, due)
}

/// Monthly: the (year, month) pair changed.
pub fn is_monthly_snapshot_needed(node: &StorageNode, timestamp: Timestamp) -> bool {
    let Some(last) = last_if_eligible(node, PeriodKind::Monthly, timestamp, false) else {
        return false;
    };
    let due = (timestamp.year(), timestamp.month()) != (last.year(), last.month());
    decide(node, PeriodKind::Monthly, due)
}

/// Yearly: the year is strictly later.
pub fn is_yearly_snapshot_needed(node: &StorageNode, timestamp: Timestamp) -> bool {
    let Some(last) = last_if_eligible(node, PeriodKind::Yearly, timestamp, false) else {
        return false;
    };
    let due = timestamp.year() > last.year();
    decide(node, PeriodKind::Yearly, due)
}

/// Dispatches to the decision function for `period`. Unscheduled periods are never due.
pub fn is_snapshot_needed(
    node: &StorageNode,
    period: PeriodKind,
    timestamp: Timestamp,
    timing: &TimingConfig,
) -> bool {
    match period {
        PeriodKind::Frequent => is_frequent_snapshot_needed(node, timestamp, timing),
        PeriodKind::Hourly => is_hourly_snapshot_needed(node, timestamp),
        PeriodKind::Daily => is_daily_snapshot_needed(node, timestamp),
        PeriodKind::Weekly => is_weekly_snapshot_needed(node, timestamp, timing),
        PeriodKind::Monthly => is_monthly_snapshot_needed(node, timestamp),
        PeriodKind::Yearly => is_yearly_snapshot_needed(node, timestamp),
        PeriodKind::Manual | PeriodKind::Temporary => false,
    }
}

/// Every scheduled period due for `node`, in rank order.
///
/// Empty unless the node is enabled and takes snapshots.
pub fn snapshots_due(
    node: &StorageNode,
    timestamp: Timestamp,
    timing: &TimingConfig,
) -> Vec<PeriodKind> {
    if !node.enabled() || !node.take_snapshots() {
        return Vec::new();
    }
    PeriodKind::SCHEDULED
        .into_iter()
        .filter(|period| is_snapshot_needed(node, *period, timestamp, timing))
        .collect()
}
