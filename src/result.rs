use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::Stage;
use crate::error::KiraError;
use crate::store::{Store, iso_timestamp};

/// A statistic, either a value with its unit (`[95.2, "%"]`) or a bare value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Measure(f64, String),
    Number(f64),
    Text(String),
}

impl StatValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StatValue::Measure(value, _) | StatValue::Number(value) => Some(*value),
            StatValue::Text(_) => None,
        }
    }
}

/// Materialized output of one stage for one dataset.
///
/// The JSON side-record is a cache of the detection outcome. It is rebuilt on
/// every detection and never edited by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub stage: Stage,
    pub dataset: String,
    pub created: String,
    pub updated: String,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<BTreeMap<String, StatValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub clean: bool,
}

impl ResultRecord {
    pub fn new(stage: Stage, dataset: &str, files: BTreeMap<String, String>) -> Self {
        let now = iso_timestamp();
        let versions = BTreeMap::from([(
            "kira-pl".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        )]);
        Self {
            stage,
            dataset: dataset.to_string(),
            created: now.clone(),
            updated: now,
            files,
            stats: None,
            versions: Some(versions),
            clean: false,
        }
    }

    /// Carries over what a re-detection must not reset.
    pub fn inherit(&mut self, previous: &ResultRecord) {
        self.created = previous.created.clone();
        self.clean = previous.clean;
    }

    pub fn file_path(&self, stage_dir: &Utf8Path, role: &str) -> Option<Utf8PathBuf> {
        self.files.get(role).map(|relative| stage_dir.join(relative))
    }

    pub fn stat(&self, name: &str) -> Option<f64> {
        self.stats
            .as_ref()
            .and_then(|stats| stats.get(name))
            .and_then(StatValue::as_f64)
    }

    /// Reads a cached record. A missing or unreadable cache is simply absent,
    /// the caller re-detects from the files on disk.
    pub fn load(path: &Utf8Path) -> Option<Self> {
        let content = fs::read_to_string(path.as_std_path()).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(path = %path, error = %err, "ignoring unreadable result cache");
                None
            }
        }
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), KiraError> {
        Store::write_json_atomic(path, self)
    }
}
