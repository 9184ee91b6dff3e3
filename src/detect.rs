use camino::Utf8PathBuf;
use tracing::{debug, info, warn};

use crate::catalog::TaskCatalog;
use crate::dataset::{Dataset, Eligibility};
use crate::domain::Stage;
use crate::error::KiraError;
use crate::fs_util;
use crate::project::ProjectOptions;
use crate::quality::{self, GenomeQuality};
use crate::result::ResultRecord;
use crate::rules::{Outcome, RuleContext};
use crate::store::Store;

pub const LOW_QUALITY_REASON: &str = "Low quality genome";

/// Side effect owed by a freshly detected result. Detection itself never
/// touches the filesystem beyond existence checks and report reads.
#[derive(Debug, Clone, PartialEq)]
pub enum PostProcess {
    CleanFasta { role: String, path: Utf8PathBuf },
    QualityGate(GenomeQuality),
}

#[derive(Debug, Clone)]
pub struct Detection {
    pub record: ResultRecord,
    pub pending: Vec<PostProcess>,
}

pub struct ResultDetector<'a> {
    catalog: &'a TaskCatalog,
    store: Store,
}

impl<'a> ResultDetector<'a> {
    pub fn new(catalog: &'a TaskCatalog, store: Store) -> Self {
        Self { catalog, store }
    }

    pub fn context(&self, dataset: &Dataset, stage: Stage) -> RuleContext {
        let anchor = self
            .catalog
            .ordered_stages()
            .iter()
            .take_while(|earlier| **earlier != stage)
            .copied()
            .find(|earlier| dataset.result(*earlier).is_some());
        RuleContext {
            multi: dataset.is_multi(),
            reference: dataset.is_reference(),
            anchor,
        }
    }

    /// Probes the stage directory for `stage`. Returns `None` when the
    /// selected rule is not satisfied.
    pub fn detect(&self, dataset: &Dataset, stage: Stage) -> Option<Detection> {
        let spec = self.catalog.spec(stage);
        let ctx = self.context(dataset, stage);
        let name = dataset.name().as_str();
        let dir = self.store.stage_dir(self.catalog, stage);

        let (files, clean_roles) = match spec.rule.select(&ctx)? {
            // A stage that does not apply is complete only once the dataset
            // has entered the pipeline.
            Outcome::Vacuous => {
                ctx.anchor?;
                (Default::default(), &[][..])
            }
            Outcome::Files(rule) => (rule.resolve(&dir, name)?, rule.clean),
        };

        let mut record = ResultRecord::new(stage, name, files);
        let previous = dataset
            .result(stage)
            .cloned()
            .or_else(|| ResultRecord::load(&self.store.result_path(self.catalog, stage, name)));
        if let Some(previous) = &previous {
            record.inherit(previous);
        }

        let mut pending = Vec::new();
        if !record.clean {
            for role in clean_roles {
                if let Some(path) = record.file_path(&dir, role) {
                    pending.push(PostProcess::CleanFasta {
                        role: role.to_string(),
                        path,
                    });
                }
            }
        }

        if let Some(path) = spec
            .quality_report
            .and_then(|role| record.file_path(&dir, role))
        {
            match GenomeQuality::from_report(&path) {
                Some(quality) => {
                    record.stats = Some(quality.stats());
                    let gated_before = previous.as_ref().is_some_and(|prev| prev.stats.is_some());
                    if !gated_before {
                        pending.push(PostProcess::QualityGate(quality));
                    }
                }
                None => warn!(path = %path, "essential genes report lacks quality values"),
            }
        }

        Some(Detection { record, pending })
    }

    /// Runs pending actions, persists the record and caches it on the
    /// dataset.
    pub fn apply(
        &self,
        dataset: &mut Dataset,
        options: &ProjectOptions,
        detection: Detection,
    ) -> Result<ResultRecord, KiraError> {
        let Detection {
            mut record,
            pending,
        } = detection;

        let mut cleaned = false;
        let mut clean_failed = false;
        for action in pending {
            match action {
                PostProcess::CleanFasta { role, path } => match fs_util::clean_fasta_file(&path) {
                    Ok(()) => {
                        debug!(dataset = %dataset.name(), role = %role, "cleaned FASTA");
                        cleaned = true;
                    }
                    Err(err) => {
                        warn!(dataset = %dataset.name(), role = %role, error = %err, "FASTA cleanup failed");
                        clean_failed = true;
                    }
                },
                PostProcess::QualityGate(quality) => {
                    self.apply_gate(dataset, options, &quality)?;
                }
            }
        }
        if cleaned && !clean_failed {
            record.clean = true;
        }

        let path = self
            .store
            .result_path(self.catalog, record.stage, dataset.name().as_str());
        record.save(&path)?;
        dataset.set_result(record.clone());
        Ok(record)
    }

    fn apply_gate(
        &self,
        dataset: &mut Dataset,
        options: &ProjectOptions,
        quality: &GenomeQuality,
    ) -> Result<(), KiraError> {
        let decision = quality::gate(quality, options.min_qual);
        dataset.metadata_mut().quality = Some(decision.tier);
        if decision.deactivate && dataset.is_active() {
            info!(
                dataset = %dataset.name(),
                tier = %decision.tier,
                min_qual = %options.min_qual,
                "deactivating low quality genome"
            );
            dataset.inactivate(LOW_QUALITY_REASON);
        }
        dataset.save(&self.store)
    }

    /// Detects `stage` and brings the cache in line with the filesystem.
    pub fn materialize(
        &self,
        dataset: &mut Dataset,
        options: &ProjectOptions,
        stage: Stage,
    ) -> Result<Option<ResultRecord>, KiraError> {
        match self.detect(dataset, stage) {
            Some(detection) => self.apply(dataset, options, detection).map(Some),
            None => {
                if dataset.take_result(stage).is_some() {
                    debug!(dataset = %dataset.name(), stage = %stage, "dropping stale result");
                }
                Store::remove_if_exists(&self.store.result_path(
                    self.catalog,
                    stage,
                    dataset.name().as_str(),
                ))?;
                Ok(None)
            }
        }
    }

    /// Re-detects stages in catalog order until the first missing stage that
    /// could be dispatched, or until the dataset cannot progress. Missing
    /// stages that never run for the dataset are passed over.
    pub fn refresh(&self, dataset: &mut Dataset, options: &ProjectOptions) -> Result<(), KiraError> {
        self.refresh_settled(dataset, options, &[])
    }

    /// Like [`refresh`](Self::refresh), but stops at the first stage in
    /// `in_flight`. A job is still writing that stage's outputs, so they are
    /// neither detected nor post-processed.
    pub fn refresh_settled(
        &self,
        dataset: &mut Dataset,
        options: &ProjectOptions,
        in_flight: &[Stage],
    ) -> Result<(), KiraError> {
        for stage in self.catalog.ordered_stages() {
            if in_flight.contains(stage) {
                debug!(dataset = %dataset.name(), stage = %stage, "job in flight, detection deferred");
                break;
            }
            if self.materialize(dataset, options, *stage)?.is_some() {
                continue;
            }
            if dataset.first_satisfied_stage(self.catalog).is_none() {
                continue;
            }
            let eligibility = dataset.eligibility(self.catalog, options, *stage);
            if eligibility == Eligibility::Execute || !eligibility.passes_over() {
                break;
            }
        }
        Ok(())
    }

    /// Re-detects every stage.
    pub fn refresh_all(
        &self,
        dataset: &mut Dataset,
        options: &ProjectOptions,
    ) -> Result<Vec<ResultRecord>, KiraError> {
        let mut records = Vec::new();
        for stage in self.catalog.ordered_stages() {
            if let Some(record) = self.materialize(dataset, options, *stage)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}
