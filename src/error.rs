use camino::Utf8PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid dataset name: {0} (only letters, digits and underscores are allowed)")]
    InvalidDatasetName(String),

    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("invalid dataset type: {0}")]
    InvalidDatasetType(String),

    #[error("invalid quality tier: {0} (expected excellent|high|intermediate|low|no)")]
    InvalidQuality(String),

    #[error("project not found at {0} (missing project.json)")]
    ProjectNotFound(Utf8PathBuf),

    #[error("project already exists at {0}")]
    ProjectExists(Utf8PathBuf),

    #[error("dataset not registered in project: {0}")]
    DatasetNotFound(String),

    #[error("dataset already registered in project: {0}")]
    DatasetExists(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid shard: worker {worker} of {workers}")]
    InvalidShard { worker: usize, workers: usize },

    #[error("failed to parse {path}: {message}")]
    Json { path: Utf8PathBuf, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("no dispatch command configured (set `cmd` in daemon.json)")]
    MissingDispatchCommand,

    #[error("failed to dispatch {stage} for {dataset}: {message}")]
    Dispatch {
        dataset: String,
        stage: String,
        message: String,
    },

    #[error("daemon is not running for {0}")]
    DaemonNotRunning(Utf8PathBuf),

    #[error("daemon did not stop within {0} seconds")]
    DaemonStopTimeout(u64),
}
