use serde::{Deserialize, Serialize};
use snapkeep_core::{Template, DEFAULT_TEMPLATE};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{AgentError, AgentResult};

/// Agent configuration, loaded from TOML or JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub zfs_path: PathBuf,
    pub zpool_path: PathBuf,
    /// Log mutations instead of running them.
    pub dry_run: bool,
    pub take_snapshots: bool,
    pub prune_snapshots: bool,
    pub daemon_interval_secs: u64,
    /// Upper bound on concurrent reconciliation mutations.
    pub reconcile_workers: usize,
    /// Top-level objects to manage; empty means every imported pool.
    pub pools: Vec<String>,
    pub templates: BTreeMap<String, Template>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let mut templates = BTreeMap::new();
        templates.insert(DEFAULT_TEMPLATE.to_string(), Template::default());
        Self {
            zfs_path: PathBuf::from("/usr/sbin/zfs"),
            zpool_path: PathBuf::from("/usr/sbin/zpool"),
            dry_run: false,
            take_snapshots: true,
            prune_snapshots: true,
            daemon_interval_secs: 60,
            reconcile_workers: 4,
            pools: Vec::new(),
            templates,
        }
    }
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let mut config: AgentConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config
            .templates
            .entry(DEFAULT_TEMPLATE.to_string())
            .or_default();
        Ok(config)
    }

    /// Loads `path`, or the defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::warn!("Config file not found, using defaults: {}", path.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.reconcile_workers == 0 {
            return Err(AgentError::Config(
                "reconcile_workers must be at least 1".into(),
            ));
        }
        if self.daemon_interval_secs == 0 {
            return Err(AgentError::Config(
                "daemon_interval_secs must be at least 1".into(),
            ));
        }
        if !self.templates.contains_key(DEFAULT_TEMPLATE) {
            return Err(AgentError::Config(format!(
                "template '{}' is missing",
                DEFAULT_TEMPLATE
            )));
        }
        for (name, template) in &self.templates {
            template.validate(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = AgentConfig::default();
        assert_eq!(config.zfs_path, PathBuf::from("/usr/sbin/zfs"));
        assert_eq!(config.zpool_path, PathBuf::from("/usr/sbin/zpool"));
        assert!(!config.dry_run);
        assert!(config.take_snapshots);
        assert!(config.prune_snapshots);
        assert_eq!(config.daemon_interval_secs, 60);
        assert_eq!(config.reconcile_workers, 4);
        assert!(config.pools.is_empty());
        assert_eq!(config.templates.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialization_round_trip() {
        let mut config = AgentConfig {
            dry_run: true,
            reconcile_workers: 2,
            pools: vec!["tank".into(), "backup".into()],
            ..Default::default()
        };
        let mut nightly = Template::default();
        nightly.formatting.prefix = "nightly".into();
        config.templates.insert("nightly".into(), nightly);

        let json = serde_json::to_string(&config).unwrap();
        let decoded: AgentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, decoded);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{
                "zfs_path": "/sbin/zfs",
                "dry_run": true,
                "pools": ["tank"]
            }}"#
        )
        .unwrap();

        let config = AgentConfig::from_file(file.path()).unwrap();
        assert_eq!(config.zfs_path, PathBuf::from("/sbin/zfs"));
        assert_eq!(config.zpool_path, PathBuf::from("/usr/sbin/zpool"));
        assert!(config.dry_run);
        assert_eq!(config.pools, vec!["tank"]);
        assert!(config.templates.contains_key(DEFAULT_TEMPLATE));
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
daemon_interval_secs = 300
reconcile_workers = 8

[templates.offsite.timing]
frequent_period = 5
week_starts_on = "Sun"

[templates.offsite.formatting]
prefix = "offsite"
"#
        )
        .unwrap();

        let config = AgentConfig::from_file(file.path()).unwrap();
        assert_eq!(config.daemon_interval_secs, 300);
        assert_eq!(config.reconcile_workers, 8);
        let offsite = &config.templates["offsite"];
        assert_eq!(offsite.timing.frequent_period, 5);
        assert_eq!(offsite.timing.week_starts_on, Weekday::Sun);
        assert_eq!(offsite.formatting.prefix, "offsite");
        assert_eq!(offsite.formatting.daily_suffix, "daily");
        assert!(config.templates.contains_key(DEFAULT_TEMPLATE));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unsupported_extension() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        let err = AgentConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported config file extension"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AgentConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = AgentConfig {
            reconcile_workers: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AgentError::Config(_))));

        let mut config = AgentConfig::default();
        config
            .templates
            .get_mut(DEFAULT_TEMPLATE)
            .unwrap()
            .timing
            .frequent_period = 0;
        assert!(matches!(config.validate(), Err(AgentError::Core(_))));

        let mut config = AgentConfig::default();
        config.templates.clear();
        assert!(matches!(config.validate(), Err(AgentError::Config(_))));
    }
}
