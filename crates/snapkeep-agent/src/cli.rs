use crate::config::AgentConfig;
use crate::cycle::{now, Cycle};
use crate::runner::ZfsRunner;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "snapkeep")]
#[command(about = "ZFS snapshot lifecycle manager", long_about = None)]
pub struct Cli {
    #[arg(short, long, env = "SNAPKEEP_CONFIG", default_value = "/etc/snapkeep/snapkeep.toml")]
    pub config: PathBuf,

    /// Log mutations instead of running them
    #[arg(long)]
    pub dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run a single cycle
    Run,
    /// Run cycles until interrupted
    Daemon {
        /// Seconds between cycles; defaults to the configured interval
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Print what a cycle would do as JSON
    Plan,
    /// Write default snapkeep properties onto pool roots
    InitSchema {
        /// Overwrite every schema property on each pool, not just missing ones
        #[arg(long)]
        reset: bool,
    },
}

impl Cli {
    /// Loads the configuration and applies command-line overrides.
    pub fn load_config(&self) -> Result<AgentConfig> {
        let mut config = AgentConfig::load_or_default(&self.config)?;
        if self.dry_run {
            config.dry_run = true;
        }
        config.validate()?;
        Ok(config)
    }

    pub async fn run(self) -> Result<()> {
        let config = Arc::new(self.load_config()?);
        let runner = Arc::new(ZfsRunner::from_config(&config));
        let cycle = Cycle::new(config.clone(), runner);

        match self.command {
            Command::Run => {
                let summary = cycle.run_once(now()).await?;
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Command::Daemon { interval } => {
                let interval = Duration::from_secs(interval.unwrap_or(config.daemon_interval_secs).max(1));
                let (tx, rx) = watch::channel(false);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("Interrupt received");
                    }
                    let _ = tx.send(true);
                });
                cycle.run_daemon(interval, rx).await;
            }
            Command::Plan => {
                let plan = cycle.plan(now()).await?;
                println!("{}", serde_json::to_string_pretty(&plan)?);
            }
            Command::InitSchema { reset } => {
                let applied = cycle.init_schema(reset).await?;
                println!("Applied {} schema update(s)", applied);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::try_parse_from(["snapkeep", "run"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/snapkeep/snapkeep.toml"));
        assert!(!cli.dry_run);
        assert!(!cli.log_json);
        assert_eq!(cli.command, Command::Run);
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from([
            "snapkeep",
            "-c",
            "/tmp/s.json",
            "--dry-run",
            "daemon",
            "--interval",
            "30",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/s.json"));
        assert!(cli.dry_run);
        assert_eq!(cli.command, Command::Daemon { interval: Some(30) });

        let cli = Cli::try_parse_from(["snapkeep", "init-schema", "--reset"]).unwrap();
        assert_eq!(cli.command, Command::InitSchema { reset: true });
        assert!(Cli::try_parse_from(["snapkeep", "bogus"]).is_err());
    }

    #[test]
    fn test_dry_run_flag_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let cli = Cli::try_parse_from([
            "snapkeep",
            "--config",
            path.to_str().unwrap(),
            "--dry-run",
            "plan",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert!(config.dry_run);
    }
}
