//! One snapshot-management pass and the daemon loop around it.
//!
//! A cycle fetches every pool's properties concurrently into a shared
//! collector, builds the tree, checks the pool schema, reconciles stale
//! last-snapshot properties, takes due snapshots and prunes expired ones.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use snapkeep_core::{
    initialization_requests, plan_pruning, plan_snapshots, query_property_names, reconcile_subtree,
    root_initialization, DestroyRequest, IngestReport, ObjectTree, PropertyName, PropertySetRequest,
    PropertyValue, RawObjectCollector, SnapshotRequest, Timestamp,
};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::runner::{CommandRunner, Verb};

/// Object types fetched from `zfs get`; bookmarks carry no snapkeep state.
const QUERY_TYPES: &str = "filesystem,volume,snapshot";

/// Counts from one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub objects: usize,
    pub skipped: usize,
    pub reconciled: usize,
    pub snapshots_taken: usize,
    pub snapshots_destroyed: usize,
}

/// Everything a cycle would do, without doing it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CyclePlan {
    pub reconcile: Vec<PropertySetRequest>,
    pub snapshots: Vec<SnapshotRequest>,
    pub destroy: Vec<DestroyRequest>,
}

/// Current time in the host's local offset.
pub fn now() -> Timestamp {
    Local::now().fixed_offset()
}

/// Drives cycles against a [`CommandRunner`].
pub struct Cycle {
    config: Arc<AgentConfig>,
    runner: Arc<dyn CommandRunner>,
}

impl Cycle {
    pub fn new(config: Arc<AgentConfig>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Configured pools, or every pool `zpool list` reports.
    pub async fn discover_pools(&self) -> AgentResult<Vec<String>> {
        if !self.config.pools.is_empty() {
            return Ok(self.config.pools.clone());
        }
        let args = vec!["-H".to_string(), "-o".to_string(), "name".to_string()];
        let mut rx = self.runner.run_query(Verb::ListPools, args).await?;
        let mut pools = Vec::new();
        while let Some(line) = rx.recv().await {
            let name = line.trim();
            if !name.is_empty() {
                pools.push(name.to_string());
            }
        }
        debug!(pools = ?pools, "Discovered pools");
        Ok(pools)
    }

    /// Fetches every pool concurrently and builds the object tree.
    pub async fn fetch_tree(&self) -> AgentResult<(ObjectTree, IngestReport)> {
        let pools = self.discover_pools().await?;
        let collector = Arc::new(RawObjectCollector::new());
        let properties = query_property_names().join(",");

        let mut tasks = JoinSet::new();
        for pool in pools {
            let runner = self.runner.clone();
            let collector = collector.clone();
            let args = vec![
                "-H".to_string(),
                "-p".to_string(),
                "-r".to_string(),
                "-t".to_string(),
                QUERY_TYPES.to_string(),
                "-o".to_string(),
                "name,property,value,source".to_string(),
                properties.clone(),
                pool.clone(),
            ];
            tasks.spawn(async move {
                let mut rx = runner.run_query(Verb::Get, args).await?;
                let mut lines = 0usize;
                while let Some(line) = rx.recv().await {
                    collector.push_line(&line);
                    lines += 1;
                }
                debug!(pool = %pool, lines, "Fetched pool properties");
                Ok::<_, AgentError>(())
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.map_err(|e| AgentError::Aborted(format!("fetch task failed: {}", e)))??;
        }

        let collector = Arc::try_unwrap(collector)
            .map_err(|_| AgentError::Aborted("property collector still shared".into()))?;
        let (tree, report) = collector.build_tree();
        for skipped in &report.skipped {
            warn!(error = %skipped, "Skipped object");
        }
        for defect in &report.schema_defects {
            error!(object = %defect.object, property = %defect.property, "Schema defect");
        }
        info!(
            objects = tree.len(),
            skipped = report.skipped.len(),
            defects = report.schema_defects.len(),
            "Built object tree"
        );
        Ok((tree, report))
    }

    /// Applies one batched property mutation. Empty requests are not sent.
    pub async fn apply_set(&self, request: &PropertySetRequest) -> bool {
        apply_set(self.runner.as_ref(), request).await
    }

    /// Reconciles each pool with bounded concurrency, returning the number
    /// of set requests applied.
    pub async fn reconcile(&self, tree: &ObjectTree) -> AgentResult<usize> {
        let semaphore = Arc::new(Semaphore::new(self.config.reconcile_workers.max(1)));
        let mut tasks = JoinSet::new();
        for root in tree.roots() {
            let requests = reconcile_subtree(&root)?;
            for request in requests {
                let runner = self.runner.clone();
                let semaphore = semaphore.clone();
                tasks.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| AgentError::Aborted(format!("semaphore closed: {}", e)))?;
                    Ok::<_, AgentError>(apply_set(runner.as_ref(), &request).await)
                });
            }
        }

        let mut applied = 0;
        while let Some(joined) = tasks.join_next().await {
            let ok = joined.map_err(|e| AgentError::Aborted(format!("reconcile task failed: {}", e)))??;
            if ok {
                applied += 1;
            }
        }
        debug!(applied, "Reconciled last-snapshot properties");
        Ok(applied)
    }

    /// Takes every due snapshot and records the ones that succeeded.
    pub async fn take_snapshots(
        &self,
        tree: &ObjectTree,
        timestamp: Timestamp,
    ) -> AgentResult<Vec<SnapshotRequest>> {
        let requests = plan_snapshots(tree, timestamp, &self.config.templates)?;
        let mut taken = Vec::new();
        for request in requests {
            let args = snapshot_args(&request)?;
            if !self.runner.run_mutation(Verb::Snapshot, args).await {
                continue;
            }
            let Some(node) = tree.get(&request.object) else {
                warn!(object = %request.object, "Snapshotted object vanished from tree");
                continue;
            };
            let update = node.record_snapshot(&request.short_name, request.period, request.timestamp)?;
            if let Some(snapshot) = node.find_snapshot(&request.full_name()) {
                tree.attach(snapshot)?;
            }
            if !self.apply_set(&update).await {
                warn!(
                    object = %request.object,
                    period = %request.period,
                    "Failed to persist last-snapshot timestamp, next reconcile will retry"
                );
            }
            info!(snapshot = %request.full_name(), period = %request.period, recursive = request.recursive, "Took snapshot");
            taken.push(request);
        }
        Ok(taken)
    }

    /// Destroys expired snapshots, returning how many were removed.
    pub async fn prune(&self, tree: &ObjectTree) -> usize {
        let mut destroyed = 0;
        for request in plan_pruning(tree) {
            for name in &request.snapshots {
                if self.runner.run_mutation(Verb::Destroy, vec![name.clone()]).await {
                    tree.remove_snapshot(name);
                    info!(snapshot = %name, "Destroyed snapshot");
                    destroyed += 1;
                }
            }
        }
        destroyed
    }

    /// Runs one full cycle.
    pub async fn run_once(&self, timestamp: Timestamp) -> AgentResult<CycleSummary> {
        let span = tracing::info_span!("cycle", id = %Uuid::new_v4());
        self.run_cycle(timestamp).instrument(span).await
    }

    async fn run_cycle(&self, timestamp: Timestamp) -> AgentResult<CycleSummary> {
        let (tree, report) = self.fetch_tree().await?;
        report.ensure_schema()?;

        let mut summary = CycleSummary {
            objects: tree.len(),
            skipped: report.skipped.len(),
            ..Default::default()
        };
        summary.reconciled = self.reconcile(&tree).await?;
        if self.config.take_snapshots {
            summary.snapshots_taken = self.take_snapshots(&tree, timestamp).await?.len();
        }
        if self.config.prune_snapshots {
            summary.snapshots_destroyed = self.prune(&tree).await;
        }
        info!(
            objects = summary.objects,
            reconciled = summary.reconciled,
            taken = summary.snapshots_taken,
            destroyed = summary.snapshots_destroyed,
            "Cycle complete"
        );
        Ok(summary)
    }

    /// Computes what a cycle would do on a copy of the tree.
    pub async fn plan(&self, timestamp: Timestamp) -> AgentResult<CyclePlan> {
        let (tree, report) = self.fetch_tree().await?;
        report.ensure_schema()?;
        let tree = tree.deep_copy()?;
        let mut plan = CyclePlan::default();
        for root in tree.roots() {
            plan.reconcile.extend(reconcile_subtree(&root)?);
        }
        if self.config.take_snapshots {
            plan.snapshots = plan_snapshots(&tree, timestamp, &self.config.templates)?;
        }
        if self.config.prune_snapshots {
            plan.destroy = plan_pruning(&tree);
        }
        Ok(plan)
    }

    /// Writes default schema properties onto pool roots.
    ///
    /// Without `reset` only the reported defects are fixed. With `reset`
    /// every discovered root gets the full default set, last-snapshot
    /// timestamps included.
    pub async fn init_schema(&self, reset: bool) -> AgentResult<usize> {
        let requests = if reset {
            self.discover_pools()
                .await?
                .iter()
                .map(|pool| root_initialization(pool))
                .collect()
        } else {
            let (_, report) = self.fetch_tree().await?;
            initialization_requests(&report.schema_defects)
        };

        let mut applied = 0;
        for request in &requests {
            if self.apply_set(request).await {
                applied += 1;
            }
        }
        info!(requested = requests.len(), applied, "Schema initialisation finished");
        Ok(applied)
    }

    /// Repeats [`Cycle::run_once`] every `interval` until `shutdown` flips to true.
    ///
    /// A failed cycle is logged and the loop carries on.
    pub async fn run_daemon(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "Daemon started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(now()).await {
                        error!(error = %e, "Cycle failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Daemon stopping");
                        break;
                    }
                }
            }
        }
    }
}

async fn apply_set(runner: &dyn CommandRunner, request: &PropertySetRequest) -> bool {
    if request.is_empty() {
        return true;
    }
    let mut args = request.tokens();
    args.push(request.object().to_string());
    runner.run_mutation(Verb::Set, args).await
}

/// `zfs snapshot` arguments, tagging the snapshot with its period and timestamp.
pub fn snapshot_args(request: &SnapshotRequest) -> AgentResult<Vec<String>> {
    let period = PropertyValue::new(
        PropertyName::SnapshotPeriod,
        request.period.as_str().to_string(),
        true,
    )?;
    let timestamp = PropertyValue::new(PropertyName::SnapshotTimestamp, request.timestamp, true)?;

    let mut args = Vec::new();
    if request.recursive {
        args.push("-r".to_string());
    }
    for value in [period, timestamp] {
        args.push("-o".to_string());
        args.push(value.set_token());
    }
    args.push(request.full_name());
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use snapkeep_core::PeriodKind;

    #[test]
    fn test_snapshot_args() {
        let timestamp = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 1, 10, 0, 0)
            .unwrap();
        let request = SnapshotRequest {
            object: "tank/home".into(),
            short_name: "autosnap_daily".into(),
            period: PeriodKind::Daily,
            timestamp,
            recursive: true,
        };
        let args = snapshot_args(&request).unwrap();
        assert_eq!(args[0], "-r");
        assert_eq!(args[1], "-o");
        assert_eq!(args[2], "snapkeep:snapshotperiod=daily");
        assert_eq!(args[3], "-o");
        assert!(args[4].starts_with("snapkeep:snapshottimestamp=2024-05-01T10:00:00"));
        assert_eq!(args[5], "tank/home@autosnap_daily");
    }

    #[test]
    fn test_now_has_local_offset() {
        let stamp = now();
        assert_eq!(stamp.offset(), Local::now().fixed_offset().offset());
    }
}
