use std::env;
use std::fmt;
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::KiraError;
use crate::store::Store;

pub const WORKERS_ENV: &str = "KIRA_PL_WORKERS";
pub const WORKER_ENV: &str = "KIRA_PL_WORKER";

pub const DEFAULT_LATENCY_SECS: u64 = 120;
pub const MAX_LATENCY_SECS: u64 = 86_400;
pub const DEFAULT_MAXJOBS: usize = 4;

/// `daemon.json` as written by the user. Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DaemonConfig {
    /// Seconds to sleep between scan cycles.
    #[serde(default)]
    pub latency: Option<u64>,
    #[serde(default)]
    pub maxjobs: Option<usize>,
    /// Shell template run for each job. `{project}`, `{dataset}` and
    /// `{stage}` are substituted.
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub worker: Option<usize>,
}

/// Which slice of the registry this daemon owns: dataset `i` belongs to
/// worker `i % workers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub worker: usize,
    pub workers: usize,
}

impl Shard {
    pub fn single() -> Self {
        Self {
            worker: 0,
            workers: 1,
        }
    }

    pub fn new(worker: usize, workers: usize) -> Result<Self, KiraError> {
        if workers == 0 || worker >= workers {
            return Err(KiraError::InvalidShard { worker, workers });
        }
        Ok(Self { worker, workers })
    }

    pub fn owns(&self, position: usize) -> bool {
        position % self.workers == self.worker
    }
}

impl Default for Shard {
    fn default() -> Self {
        Self::single()
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.worker, self.workers)
    }
}

/// Shard settings taken from the environment; they win over the file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShardOverrides {
    pub worker: Option<usize>,
    pub workers: Option<usize>,
}

impl ShardOverrides {
    pub fn from_env() -> Result<Self, KiraError> {
        Ok(Self {
            worker: read_env_usize(WORKER_ENV)?,
            workers: read_env_usize(WORKERS_ENV)?,
        })
    }
}

fn read_env_usize(key: &str) -> Result<Option<usize>, KiraError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| KiraError::ConfigParse(format!("{key} must be a non-negative integer, got {value:?}"))),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedDaemonConfig {
    pub latency: Duration,
    pub maxjobs: usize,
    pub cmd: Option<String>,
    pub shard: Shard,
    /// File the settings came from, if any.
    pub source: Option<Utf8PathBuf>,
}

impl Default for ResolvedDaemonConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_secs(DEFAULT_LATENCY_SECS),
            maxjobs: DEFAULT_MAXJOBS,
            cmd: None,
            shard: Shard::single(),
            source: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolution order: explicit path, `<project>/daemon/daemon.json`,
    /// `~/.kira-pl/daemon.json`, built-in defaults. Shard environment
    /// variables override whatever was found.
    pub fn resolve(path: Option<&Utf8Path>, store: &Store) -> Result<ResolvedDaemonConfig, KiraError> {
        let source = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::candidates(store)
                .into_iter()
                .find(|candidate| candidate.as_std_path().is_file()),
        };

        let config = match &source {
            Some(source) => Self::read(source)?,
            None => DaemonConfig::default(),
        };
        debug!(source = ?source, "resolved daemon config");

        let mut resolved = Self::resolve_config(config, ShardOverrides::from_env()?)?;
        resolved.source = source;
        Ok(resolved)
    }

    fn candidates(store: &Store) -> Vec<Utf8PathBuf> {
        let mut candidates = vec![store.daemon_config_path()];
        if let Some(dir) = Store::user_config_dir() {
            candidates.push(dir.join("daemon.json"));
        }
        candidates
    }

    pub fn read(path: &Utf8Path) -> Result<DaemonConfig, KiraError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| KiraError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(
        config: DaemonConfig,
        overrides: ShardOverrides,
    ) -> Result<ResolvedDaemonConfig, KiraError> {
        let maxjobs = config.maxjobs.unwrap_or(DEFAULT_MAXJOBS);
        if maxjobs == 0 {
            return Err(KiraError::ConfigParse("maxjobs must be at least 1".to_string()));
        }
        let latency = config.latency.unwrap_or(DEFAULT_LATENCY_SECS);
        if latency > MAX_LATENCY_SECS {
            return Err(KiraError::ConfigParse(format!(
                "latency must be at most {MAX_LATENCY_SECS} seconds, got {latency}"
            )));
        }
        let cmd = config.cmd.filter(|cmd| !cmd.trim().is_empty());
        let shard = Shard::new(
            overrides.worker.or(config.worker).unwrap_or(0),
            overrides.workers.or(config.workers).unwrap_or(1),
        )?;

        Ok(ResolvedDaemonConfig {
            latency: Duration::from_secs(latency),
            maxjobs,
            cmd,
            shard,
            source: None,
        })
    }
}
