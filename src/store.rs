use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::catalog::TaskCatalog;
use crate::domain::Stage;
use crate::error::KiraError;

pub const PROJECT_FILE: &str = "project.json";

/// On-disk layout of one project directory.
#[derive(Debug, Clone)]
pub struct Store {
    project_root: Utf8PathBuf,
}

impl Store {
    pub fn new(project_root: Utf8PathBuf) -> Self {
        Self { project_root }
    }

    pub fn from_current_dir() -> Result<Self, KiraError> {
        let cwd = std::env::current_dir().map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let project_root = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|_| KiraError::Filesystem("invalid project path".to_string()))?;
        Ok(Self { project_root })
    }

    pub fn project_root(&self) -> &Utf8Path {
        &self.project_root
    }

    pub fn project_file(&self) -> Utf8PathBuf {
        self.project_root.join(PROJECT_FILE)
    }

    pub fn metadata_path(&self, dataset: &str) -> Utf8PathBuf {
        self.project_root
            .join("metadata")
            .join(format!("{dataset}.json"))
    }

    pub fn stage_dir(&self, catalog: &TaskCatalog, stage: Stage) -> Utf8PathBuf {
        self.project_root.join(catalog.dir(stage))
    }

    /// `<project_root>/<stage_subdir>/<dataset_name>`; stage files hang off it.
    pub fn result_base(&self, catalog: &TaskCatalog, stage: Stage, dataset: &str) -> Utf8PathBuf {
        self.stage_dir(catalog, stage).join(dataset)
    }

    pub fn result_path(&self, catalog: &TaskCatalog, stage: Stage, dataset: &str) -> Utf8PathBuf {
        self.stage_dir(catalog, stage)
            .join(format!("{dataset}.json"))
    }

    pub fn daemon_dir(&self) -> Utf8PathBuf {
        self.project_root.join("daemon")
    }

    pub fn daemon_config_path(&self) -> Utf8PathBuf {
        self.daemon_dir().join("daemon.json")
    }

    pub fn daemon_status_path(&self) -> Utf8PathBuf {
        self.daemon_dir().join("status.json")
    }

    pub fn daemon_stop_path(&self) -> Utf8PathBuf {
        self.daemon_dir().join("stop")
    }

    pub fn daemon_pid_path(&self) -> Utf8PathBuf {
        self.daemon_dir().join("daemon.pid")
    }

    pub fn daemon_log_path(&self) -> Utf8PathBuf {
        self.daemon_dir().join("daemon.log")
    }

    pub fn job_log_path(&self, dataset: &str, stage: Stage) -> Utf8PathBuf {
        self.daemon_dir()
            .join("jobs")
            .join(format!("{dataset}.{stage}.log"))
    }

    pub fn exists(&self) -> bool {
        self.project_file().as_std_path().exists()
    }

    /// `~/.kira-pl`, shared defaults for every project of the user.
    pub fn user_config_dir() -> Option<Utf8PathBuf> {
        BaseDirs::new()
            .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.home_dir().join(".kira-pl")).ok())
    }

    pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), KiraError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, KiraError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content).map_err(|err| KiraError::Json {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        let tmp_path = Utf8PathBuf::from(format!("{path}.tmp"));
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn remove_if_exists(path: &Utf8Path) -> Result<(), KiraError> {
        match fs::remove_file(path.as_std_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(KiraError::Filesystem(format!("remove {path}: {err}"))),
        }
    }
}

pub fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let catalog = TaskCatalog::standard();
        let store = Store::new(Utf8PathBuf::from("/data/proj"));

        assert_eq!(
            store.result_base(&catalog, Stage::Assembly, "s1"),
            Utf8PathBuf::from("/data/proj/data/05.assembly/s1")
        );
        assert_eq!(
            store.result_path(&catalog, Stage::Cds, "s1"),
            Utf8PathBuf::from("/data/proj/data/06.cds/s1.json")
        );
        assert!(store.metadata_path("s1").ends_with("metadata/s1.json"));
        assert!(store.daemon_status_path().ends_with("daemon/status.json"));
    }
}
