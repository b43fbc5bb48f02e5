//! External command execution.
//!
//! [`CommandRunner`] is the only seam through which the agent touches the
//! storage system. Queries stream stdout lines; mutations report success.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};

const LINE_BUFFER: usize = 1024;

/// A subcommand of `zfs` or `zpool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// `zpool list`
    ListPools,
    /// `zfs get`
    Get,
    /// `zfs set`
    Set,
    /// `zfs snapshot`
    Snapshot,
    /// `zfs destroy`
    Destroy,
}

impl Verb {
    /// Subcommand passed as the first argument.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::ListPools => "list",
            Verb::Get => "get",
            Verb::Set => "set",
            Verb::Snapshot => "snapshot",
            Verb::Destroy => "destroy",
        }
    }

    /// True for verbs run through `zpool` rather than `zfs`.
    pub fn is_pool_command(&self) -> bool {
        matches!(self, Verb::ListPools)
    }

    /// True for verbs that change the storage system.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Verb::Set | Verb::Snapshot | Verb::Destroy)
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runs storage commands on behalf of a cycle.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Starts a read-only command and streams its stdout lines.
    ///
    /// The channel closes when the command exits. A failing command closes
    /// it early; callers tolerate partial output.
    async fn run_query(&self, verb: Verb, args: Vec<String>) -> AgentResult<mpsc::Receiver<String>>;

    /// Runs a mutating command. Returns false on failure and in dry-run mode.
    async fn run_mutation(&self, verb: Verb, args: Vec<String>) -> bool;
}

/// Runs the real `zfs` and `zpool` binaries.
pub struct ZfsRunner {
    zfs_path: PathBuf,
    zpool_path: PathBuf,
    dry_run: bool,
}

impl ZfsRunner {
    pub fn new(zfs_path: PathBuf, zpool_path: PathBuf, dry_run: bool) -> Self {
        Self {
            zfs_path,
            zpool_path,
            dry_run,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.zfs_path.clone(),
            config.zpool_path.clone(),
            config.dry_run,
        )
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn program(&self, verb: Verb) -> &PathBuf {
        if verb.is_pool_command() {
            &self.zpool_path
        } else {
            &self.zfs_path
        }
    }

    fn build_command(&self, verb: Verb, args: &[String]) -> Command {
        let mut command = Command::new(self.program(verb));
        command.arg(verb.as_str()).args(args).stdin(Stdio::null());
        command
    }
}

#[async_trait]
impl CommandRunner for ZfsRunner {
    async fn run_query(&self, verb: Verb, args: Vec<String>) -> AgentResult<mpsc::Receiver<String>> {
        let program = self.program(verb).display().to_string();
        debug!(command = %program, verb = %verb, args = ?args, "running query");

        let mut child = self
            .build_command(verb, &args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Runner {
                command: program.clone(),
                reason: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| AgentError::Runner {
            command: program.clone(),
            reason: "stdout was not captured".into(),
        })?;

        // Drained on its own task so a chatty stderr cannot block stdout.
        let stderr_task = child.stderr.take().map(|mut stderr| {
            let program = program.clone();
            tokio::spawn(async move {
                let mut diagnostics = String::new();
                if let Err(e) = stderr.read_to_string(&mut diagnostics).await {
                    debug!(command = %program, error = %e, "failed reading query stderr");
                }
                diagnostics
            })
        });

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut count = 0usize;
            let mut abandoned = false;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        count += 1;
                        if tx.send(line).await.is_err() {
                            debug!(command = %program, "query receiver dropped");
                            abandoned = true;
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(command = %program, error = %e, "failed reading query output");
                        break;
                    }
                }
            }
            if abandoned {
                if let Err(e) = child.start_kill() {
                    debug!(command = %program, error = %e, "failed to kill abandoned query");
                }
            }

            let diagnostics = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            match child.wait().await {
                Ok(status) if status.success() || abandoned => {
                    debug!(command = %program, verb = %verb, lines = count, "query complete");
                }
                Ok(status) => {
                    warn!(
                        command = %program,
                        verb = %verb,
                        exit_code = ?status.code(),
                        lines = count,
                        stderr = %diagnostics.trim(),
                        "query exited with failure, output may be partial"
                    );
                }
                Err(e) => warn!(command = %program, error = %e, "failed waiting for query"),
            }
        });
        Ok(rx)
    }

    async fn run_mutation(&self, verb: Verb, args: Vec<String>) -> bool {
        let program = self.program(verb).display().to_string();
        if self.dry_run {
            info!(command = %program, verb = %verb, args = ?args, "dry run, not executing");
            return false;
        }

        let output = match self
            .build_command(verb, &args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(command = %program, verb = %verb, error = %e, "failed to spawn");
                return false;
            }
        };

        if output.status.success() {
            info!(command = %program, verb = %verb, args = ?args, "mutation applied");
            true
        } else {
            warn!(
                command = %program,
                verb = %verb,
                args = ?args,
                exit_code = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "mutation failed"
            );
            false
        }
    }
}

/// A command the [`MockRunner`] received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub verb: Verb,
    pub args: Vec<String>,
}

/// In-memory runner answering queries from canned output.
///
/// `zfs get` queries are answered per pool, keyed by the last argument.
/// Every mutation is recorded and answered with the configured result,
/// optionally overridden per verb.
pub struct MockRunner {
    pools: Vec<String>,
    property_lines: HashMap<String, Vec<String>>,
    mutation_result: bool,
    verb_results: HashMap<Verb, bool>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    pub fn new() -> Self {
        Self {
            pools: Vec::new(),
            property_lines: HashMap::new(),
            mutation_result: true,
            verb_results: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Adds a pool and the `zfs get` lines reported for it.
    pub fn with_pool<I, S>(mut self, pool: &str, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pools.push(pool.to_string());
        self.property_lines
            .insert(pool.to_string(), lines.into_iter().map(Into::into).collect());
        self
    }

    /// Makes every mutation report `result`.
    pub fn with_mutation_result(mut self, result: bool) -> Self {
        self.mutation_result = result;
        self
    }

    /// Makes mutations of one verb report `result`, overriding the default.
    pub fn with_verb_result(mut self, verb: Verb, result: bool) -> Self {
        self.verb_results.insert(verb, result);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Recorded calls for one verb.
    pub fn calls_for(&self, verb: Verb) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.verb == verb)
            .cloned()
            .collect()
    }

    fn record(&self, verb: Verb, args: Vec<String>) {
        self.calls.lock().push(RecordedCall { verb, args });
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run_query(&self, verb: Verb, args: Vec<String>) -> AgentResult<mpsc::Receiver<String>> {
        let lines = match verb {
            Verb::ListPools => self.pools.clone(),
            Verb::Get => args
                .last()
                .and_then(|pool| self.property_lines.get(pool))
                .cloned()
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        self.record(verb, args);

        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            let _ = tx.send(line).await;
        }
        Ok(rx)
    }

    async fn run_mutation(&self, verb: Verb, args: Vec<String>) -> bool {
        self.record(verb, args);
        self.verb_results
            .get(&verb)
            .copied()
            .unwrap_or(self.mutation_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(line) = rx.recv().await {
            out.push(line);
        }
        out
    }

    #[test]
    fn test_verb_programs() {
        assert!(Verb::ListPools.is_pool_command());
        assert!(!Verb::Get.is_pool_command());
        assert!(Verb::Destroy.is_mutation());
        assert!(!Verb::Get.is_mutation());
        assert_eq!(Verb::Snapshot.to_string(), "snapshot");
    }

    #[tokio::test]
    async fn test_dry_run_mutation_reports_failure() {
        let runner = ZfsRunner::new(
            PathBuf::from("/nonexistent/zfs"),
            PathBuf::from("/nonexistent/zpool"),
            true,
        );
        assert!(runner.is_dry_run());
        assert!(
            !runner
                .run_mutation(Verb::Destroy, vec!["tank@snap".into()])
                .await
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_error() {
        let runner = ZfsRunner::new(
            PathBuf::from("/nonexistent/zfs"),
            PathBuf::from("/nonexistent/zpool"),
            false,
        );
        let result = runner.run_query(Verb::Get, vec!["all".into()]).await;
        assert!(matches!(result, Err(AgentError::Runner { .. })));
        assert!(!runner.run_mutation(Verb::Set, vec![]).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_query_streams_lines() {
        // `echo list a b` stands in for zpool.
        let runner = ZfsRunner::new(PathBuf::from("echo"), PathBuf::from("echo"), false);
        let rx = runner
            .run_query(Verb::ListPools, vec!["tank".into()])
            .await
            .unwrap();
        assert_eq!(collect(rx).await, vec!["list tank"]);
    }

    #[tokio::test]
    async fn test_mock_runner_answers_by_pool() {
        let runner = MockRunner::new()
            .with_pool("tank", ["tank\ttype\tfilesystem\t-"])
            .with_pool("backup", Vec::<String>::new())
            .with_mutation_result(false);

        let pools = collect(runner.run_query(Verb::ListPools, vec![]).await.unwrap()).await;
        assert_eq!(pools, vec!["tank", "backup"]);

        let lines = collect(
            runner
                .run_query(Verb::Get, vec!["all".into(), "tank".into()])
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(lines.len(), 1);

        assert!(!runner.run_mutation(Verb::Set, vec!["x=y".into()]).await);
        assert_eq!(runner.calls().len(), 3);
        assert_eq!(runner.calls_for(Verb::Set)[0].args, vec!["x=y"]);

        let runner = MockRunner::new().with_verb_result(Verb::Destroy, false);
        assert!(runner.run_mutation(Verb::Snapshot, vec![]).await);
        assert!(!runner.run_mutation(Verb::Destroy, vec![]).await);
    }
}
