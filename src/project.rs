use std::collections::BTreeMap;
use std::fs;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::catalog::TaskCatalog;
use crate::dataset::Dataset;
use crate::domain::{DatasetName, MinQuality, Stage};
use crate::error::KiraError;
use crate::store::{Store, iso_timestamp};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectOptions {
    #[serde(default)]
    pub min_qual: MinQuality,
    /// Name of the reference project used for taxonomy, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_mytaxa: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ProjectOptions {
    /// Project-level switch for stages that need project resources.
    pub fn allows(&self, stage: Stage) -> bool {
        match stage {
            Stage::Taxonomy => self.ref_project.is_some(),
            Stage::Mytaxa | Stage::MytaxaScan => self.run_mytaxa != Some(false),
            _ => true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ProjectFile {
    name: String,
    created: String,
    updated: String,
    #[serde(default)]
    datasets: Vec<DatasetName>,
    #[serde(default)]
    options: ProjectOptions,
}

/// Dataset registry of one project directory. Registry order is the order
/// datasets are scanned and sharded in.
#[derive(Debug, Clone)]
pub struct Project {
    store: Store,
    name: String,
    created: String,
    options: ProjectOptions,
    datasets: Vec<Dataset>,
}

impl Project {
    pub fn create(store: Store, options: ProjectOptions) -> Result<Self, KiraError> {
        if store.exists() {
            return Err(KiraError::ProjectExists(store.project_root().to_path_buf()));
        }
        fs::create_dir_all(store.project_root().join("metadata").as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let name = store
            .project_root()
            .file_name()
            .unwrap_or("project")
            .to_string();
        let mut project = Self {
            store,
            name,
            created: iso_timestamp(),
            options,
            datasets: Vec::new(),
        };
        project.save()?;
        info!(project = %project.store.project_root(), "created project");
        Ok(project)
    }

    pub fn load(store: Store, catalog: &TaskCatalog) -> Result<Self, KiraError> {
        if !store.exists() {
            return Err(KiraError::ProjectNotFound(store.project_root().to_path_buf()));
        }
        let file: ProjectFile = Store::read_json(&store.project_file())?;
        let datasets = file
            .datasets
            .iter()
            .map(|name| Dataset::load(&store, catalog, name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            store,
            name: file.name,
            created: file.created,
            options: file.options,
            datasets,
        })
    }

    pub fn save(&mut self) -> Result<(), KiraError> {
        let file = ProjectFile {
            name: self.name.clone(),
            created: self.created.clone(),
            updated: iso_timestamp(),
            datasets: self.datasets.iter().map(|ds| ds.name().clone()).collect(),
            options: self.options.clone(),
        };
        Store::write_json_atomic(&self.store.project_file(), &file)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn root(&self) -> Utf8PathBuf {
        self.store.project_root().to_path_buf()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ProjectOptions {
        &self.options
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn datasets_mut(&mut self) -> &mut [Dataset] {
        &mut self.datasets
    }

    pub fn dataset(&self, name: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|ds| ds.name().as_str() == name)
    }

    pub fn dataset_mut(&mut self, name: &str) -> Option<&mut Dataset> {
        self.datasets
            .iter_mut()
            .find(|ds| ds.name().as_str() == name)
    }

    /// Registers a dataset and persists both its metadata and the registry.
    pub fn add_dataset(&mut self, mut dataset: Dataset) -> Result<&mut Dataset, KiraError> {
        if self.dataset(dataset.name().as_str()).is_some() {
            return Err(KiraError::DatasetExists(dataset.name().to_string()));
        }
        dataset.save(&self.store)?;
        self.datasets.push(dataset);
        self.save()?;
        let position = self.datasets.len() - 1;
        Ok(&mut self.datasets[position])
    }

    /// Deregisters a dataset. Metadata and stage artifacts stay on disk.
    pub fn remove_dataset(&mut self, name: &str) -> Result<Dataset, KiraError> {
        let position = self
            .datasets
            .iter()
            .position(|ds| ds.name().as_str() == name)
            .ok_or_else(|| KiraError::DatasetNotFound(name.to_string()))?;
        let dataset = self.datasets.remove(position);
        self.save()?;
        Ok(dataset)
    }
}
