use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::catalog::TaskCatalog;
use crate::config::{ConfigLoader, ResolvedDaemonConfig};
use crate::daemon::{ControlReport, CycleSummary, Daemon, DaemonControl, DatasetStatus};
use crate::dataset::{Dataset, DatasetMetadata, Eligibility};
use crate::detect::ResultDetector;
use crate::dispatch::{CommandDispatcher, Dispatcher, LogDispatcher};
use crate::domain::{DatasetName, DatasetType, Stage};
use crate::error::KiraError;
use crate::project::{Project, ProjectOptions};
use crate::result::ResultRecord;
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    pub project: Utf8PathBuf,
    pub name: String,
    pub options: ProjectOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct StagesResult {
    pub stages: Vec<StageEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageEntry {
    pub stage: Stage,
    pub dir: String,
    pub reference_only: bool,
    pub multi_only: bool,
    pub nonmulti_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetResult {
    pub action: String,
    pub dataset: DatasetMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectResult {
    pub dataset: String,
    pub results: Vec<ResultRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressResult {
    pub datasets: Vec<ProgressEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEntry {
    pub dataset: String,
    pub active: bool,
    pub inactive_reason: Option<String>,
    pub first: Option<Stage>,
    pub next: Option<Stage>,
    pub reason: Option<Eligibility>,
    pub runnable: Option<Stage>,
    pub complete: Vec<Stage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WhyResult {
    pub dataset: String,
    pub stage: Stage,
    pub eligibility: Eligibility,
    pub first: Option<Stage>,
    pub next: Option<Stage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonRunResult {
    pub summary: CycleSummary,
    pub datasets: Vec<DatasetStatus>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub once: bool,
    pub dry_run: bool,
}

pub struct App {
    store: Store,
    catalog: TaskCatalog,
}

impl App {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            catalog: TaskCatalog::standard(),
        }
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    fn load(&self) -> Result<Project, KiraError> {
        Project::load(self.store.clone(), &self.catalog)
    }

    fn detector(&self) -> ResultDetector<'_> {
        ResultDetector::new(&self.catalog, self.store.clone())
    }

    pub fn init(&self, options: ProjectOptions) -> Result<InitResult, KiraError> {
        let project = Project::create(self.store.clone(), options)?;
        Ok(InitResult {
            project: project.root(),
            name: project.name().to_string(),
            options: project.options().clone(),
        })
    }

    pub fn stages(&self) -> StagesResult {
        let stages = self
            .catalog
            .ordered_stages()
            .iter()
            .map(|stage| {
                let spec = self.catalog.spec(*stage);
                StageEntry {
                    stage: *stage,
                    dir: spec.dir.to_string(),
                    reference_only: spec.reference_only,
                    multi_only: spec.multi_only,
                    nonmulti_only: spec.nonmulti_only,
                }
            })
            .collect();
        StagesResult { stages }
    }

    pub fn add_dataset(
        &self,
        name: &str,
        dataset_type: DatasetType,
        reference: bool,
    ) -> Result<DatasetResult, KiraError> {
        let name: DatasetName = name.parse()?;
        let mut project = self.load()?;
        let dataset = project.add_dataset(Dataset::new(name, dataset_type, reference))?;
        info!(dataset = %dataset.name(), kind = %dataset_type, "registered dataset");
        Ok(DatasetResult {
            action: "added".to_string(),
            dataset: dataset.metadata().clone(),
        })
    }

    pub fn remove_dataset(&self, name: &str) -> Result<DatasetResult, KiraError> {
        let mut project = self.load()?;
        let dataset = project.remove_dataset(name)?;
        info!(dataset = %dataset.name(), "deregistered dataset");
        Ok(DatasetResult {
            action: "removed".to_string(),
            dataset: dataset.metadata().clone(),
        })
    }

    pub fn set_active(
        &self,
        name: &str,
        active: bool,
        reason: Option<&str>,
    ) -> Result<DatasetResult, KiraError> {
        let mut project = self.load()?;
        let dataset = project
            .dataset_mut(name)
            .ok_or_else(|| KiraError::DatasetNotFound(name.to_string()))?;
        if active {
            dataset.activate();
        } else {
            dataset.inactivate(reason.unwrap_or("Manually inactivated"));
        }
        dataset.save(&self.store)?;
        Ok(DatasetResult {
            action: if active { "activated" } else { "inactivated" }.to_string(),
            dataset: dataset.metadata().clone(),
        })
    }

    /// Re-detects every stage of a dataset, writing result caches.
    pub fn detect(&self, name: &str) -> Result<DetectResult, KiraError> {
        let mut project = self.load()?;
        let options = project.options().clone();
        let detector = self.detector();
        let dataset = project
            .dataset_mut(name)
            .ok_or_else(|| KiraError::DatasetNotFound(name.to_string()))?;
        let results = detector.refresh_all(dataset, &options)?;
        Ok(DetectResult {
            dataset: name.to_string(),
            results,
        })
    }

    pub fn progress(&self, name: Option<&str>) -> Result<ProgressResult, KiraError> {
        let mut project = self.load()?;
        if let Some(name) = name
            && project.dataset(name).is_none()
        {
            return Err(KiraError::DatasetNotFound(name.to_string()));
        }
        let options = project.options().clone();
        let detector = self.detector();
        let mut datasets = Vec::new();
        for dataset in project.datasets_mut() {
            if name.is_some_and(|name| dataset.name().as_str() != name) {
                continue;
            }
            detector.refresh(dataset, &options)?;
            let next = dataset.next_stage(&self.catalog);
            datasets.push(ProgressEntry {
                dataset: dataset.name().to_string(),
                active: dataset.is_active(),
                inactive_reason: dataset.metadata().inactive_reason.clone(),
                first: dataset.first_satisfied_stage(&self.catalog),
                next,
                reason: next.map(|stage| dataset.eligibility(&self.catalog, &options, stage)),
                runnable: dataset.next_runnable_stage(&self.catalog, &options),
                complete: dataset.results().map(|record| record.stage).collect(),
            });
        }
        Ok(ProgressResult { datasets })
    }

    pub fn why(&self, name: &str, stage: Stage) -> Result<WhyResult, KiraError> {
        let mut project = self.load()?;
        let options = project.options().clone();
        let detector = self.detector();
        let dataset = project
            .dataset_mut(name)
            .ok_or_else(|| KiraError::DatasetNotFound(name.to_string()))?;
        detector.refresh(dataset, &options)?;
        detector.materialize(dataset, &options, stage)?;
        Ok(WhyResult {
            dataset: name.to_string(),
            stage,
            eligibility: dataset.eligibility(&self.catalog, &options, stage),
            first: dataset.first_satisfied_stage(&self.catalog),
            next: dataset.next_stage(&self.catalog),
        })
    }

    pub fn daemon_config(&self, path: Option<&Utf8Path>) -> Result<ResolvedDaemonConfig, KiraError> {
        ConfigLoader::resolve(path, &self.store)
    }

    /// Runs the daemon in the foreground. With `once`, a single cycle is
    /// executed and reported.
    pub fn run_daemon(
        &self,
        config: ResolvedDaemonConfig,
        options: RunOptions,
    ) -> Result<Option<DaemonRunResult>, KiraError> {
        let project = self.load()?;
        if options.dry_run {
            return Self::drive(project, self.catalog.clone(), config, LogDispatcher, options);
        }
        let template = config.cmd.clone().ok_or(KiraError::MissingDispatchCommand)?;
        let dispatcher = CommandDispatcher::new(template, self.store.clone());
        Self::drive(project, self.catalog.clone(), config, dispatcher, options)
    }

    fn drive<D: Dispatcher>(
        project: Project,
        catalog: TaskCatalog,
        config: ResolvedDaemonConfig,
        dispatcher: D,
        options: RunOptions,
    ) -> Result<Option<DaemonRunResult>, KiraError> {
        let mut daemon = Daemon::new(project, catalog, config, dispatcher);
        if options.once {
            let summary = daemon.run_once();
            return Ok(Some(DaemonRunResult {
                summary,
                datasets: daemon.statuses().to_vec(),
            }));
        }
        daemon.run()?;
        Ok(None)
    }

    pub fn control(&self) -> DaemonControl {
        DaemonControl::new(self.store.clone())
    }

    pub fn daemon_start(&self, config: Option<&Utf8Path>) -> Result<ControlReport, KiraError> {
        self.load()?;
        self.control().start(config)
    }

    pub fn daemon_stop(&self, wait: Duration) -> Result<ControlReport, KiraError> {
        self.control().stop(wait)
    }

    pub fn daemon_restart(
        &self,
        config: Option<&Utf8Path>,
        wait: Duration,
    ) -> Result<ControlReport, KiraError> {
        self.load()?;
        self.control().restart(config, wait)
    }

    pub fn daemon_status(&self) -> ControlReport {
        self.control().report()
    }
}
