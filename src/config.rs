use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::plan::{BackupType, Granularity};

/// Runtime configuration.
///
/// Loaded from an optional TOML file, then overridden by the environment
/// (`DEBUG`, `FAKESYSTEM`, `BACKUP_ROOT`, `KUBECTL`) and finally by
/// command line switches.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// Root of the backup tree.
    pub backup_root: PathBuf,

    /// Cluster CLI used to query pods and exec into containers.
    pub kubectl: String,

    /// Extra global arguments for every cluster CLI call (`--context`, `--kubeconfig`, ...).
    pub kubectl_args: Vec<String>,

    /// Label selector of pods which need a backup.
    pub selector: String,

    /// Label holding the deployment group of a pod.
    pub group_label: String,

    /// Timeout for a single container backup command in seconds. `0` disables it.
    pub command_timeout_secs: u64,

    /// What to do with the remaining containers of a pod once one failed.
    pub on_container_failure: FailurePolicy,

    /// Backups older than this many hours are reported as stale.
    pub status_threshold_hours: f64,

    /// Timestamp buckets older than this many days are purged.
    pub retention_days: u64,

    /// Timestamp bucket granularity per backup type.
    pub granularity: GranularityTable,

    /// Verbose logging.
    pub debug: bool,

    /// Do not contact workloads, mock every command as successful.
    pub dry_run: bool,

    /// Notify about failed pods.
    pub ntfy: Option<NtfyConfig>,

    /// Status page settings.
    pub serve: ServeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_root: PathBuf::from("/backup-data"),
            kubectl: "kubectl".to_string(),
            kubectl_args: Vec::new(),
            selector: "needs_backup=yes".to_string(),
            group_label: "deploymentconfig".to_string(),
            command_timeout_secs: 3600,
            on_container_failure: FailurePolicy::Continue,
            status_threshold_hours: 24.0,
            retention_days: 30,
            granularity: GranularityTable::default(),
            debug: false,
            dry_run: false,
            ntfy: None,
            serve: ServeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Back up the remaining containers anyway.
    #[default]
    Continue,
    /// Stop at the first failed container.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct GranularityTable {
    pub mysql: Granularity,
    pub rsync: Granularity,
    pub etcd: Granularity,
    pub mongodb: Granularity,
}

impl Default for GranularityTable {
    fn default() -> Self {
        Self {
            mysql: Granularity::Minute,
            rsync: Granularity::Minute,
            etcd: Granularity::Minute,
            mongodb: Granularity::Minute,
        }
    }
}

impl GranularityTable {
    pub fn get(&self, kind: BackupType) -> Granularity {
        match kind {
            BackupType::MySql => self.mysql,
            BackupType::Rsync => self.rsync,
            BackupType::Etcd => self.etcd,
            BackupType::MongoDb => self.mongodb,
            BackupType::Unknown => Granularity::Minute,
        }
    }
}

/// An `ntfy.sh` compatible notification target.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct NtfyConfig {
    pub host: String,
    pub topic: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct ServeConfig {
    /// Address the status page listens on.
    pub bind: String,

    /// How long a computed status report is served from cache, in seconds.
    pub cache_secs: u64,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            cache_secs: 3600,
        }
    }
}

impl Config {
    pub fn from_path(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let conf: Self = toml::from_str(&content).map_err(|source| Error::Config {
            path: path.to_string(),
            source,
        })?;
        conf.validate()?;
        Ok(conf)
    }

    /// Load the config file (if any) and apply the process environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut conf = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        conf.apply_env(|key| std::env::var(key).ok());
        conf.validate()?;
        Ok(conf)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("DEBUG") {
            self.debug = self.debug || is_truthy(&v);
        }
        if let Some(v) = lookup("FAKESYSTEM") {
            self.dry_run = self.dry_run || is_truthy(&v);
        }
        if let Some(root) = lookup("BACKUP_ROOT").filter(|x| !x.trim().is_empty()) {
            self.backup_root = PathBuf::from(root);
        }
        if let Some(bin) = lookup("KUBECTL").filter(|x| !x.trim().is_empty()) {
            self.kubectl = bin;
        }
    }

    pub fn command_timeout(&self) -> Option<std::time::Duration> {
        match self.command_timeout_secs {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }

    /// Reject values the rest of the program can not work with.
    pub fn validate(&self) -> Result<()> {
        self.retention()?;
        if !self.status_threshold_hours.is_finite() || self.status_threshold_hours < 0.0 {
            return Err(Error::Invalid(format!(
                "status_threshold_hours must be a positive number, got {}",
                self.status_threshold_hours
            )));
        }
        Ok(())
    }

    pub fn retention(&self) -> Result<chrono::Duration> {
        i64::try_from(self.retention_days)
            .ok()
            .and_then(chrono::Duration::try_days)
            .ok_or_else(|| {
                Error::Invalid(format!(
                    "retention_days {} is out of range",
                    self.retention_days
                ))
            })
    }
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
}
