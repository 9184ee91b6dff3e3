use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::TaskCatalog;
use crate::domain::{DatasetName, DatasetType, QualityTier, Stage};
use crate::error::KiraError;
use crate::project::ProjectOptions;
use crate::result::ResultRecord;
use crate::store::{Store, iso_timestamp};

/// Why a stage should (not) run for a dataset right now. Variants are listed
/// in evaluation priority; the first matching reason wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eligibility {
    Complete,
    Inactive,
    Empty,
    Upstream,
    Force,
    Project,
    #[serde(rename = "noref")]
    NoRef,
    Multi,
    #[serde(rename = "nonmulti")]
    NonMulti,
    Execute,
}

impl Eligibility {
    pub fn is_execute(&self) -> bool {
        matches!(self, Eligibility::Execute)
    }

    /// The stage will not run for this dataset under the current settings,
    /// so progression moves on to the next missing stage.
    pub fn passes_over(&self) -> bool {
        matches!(
            self,
            Eligibility::Upstream
                | Eligibility::Force
                | Eligibility::Project
                | Eligibility::NoRef
                | Eligibility::Multi
                | Eligibility::NonMulti
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Eligibility::Complete => "complete",
            Eligibility::Inactive => "inactive",
            Eligibility::Empty => "empty",
            Eligibility::Upstream => "upstream",
            Eligibility::Force => "force",
            Eligibility::Project => "project",
            Eligibility::NoRef => "noref",
            Eligibility::Multi => "multi",
            Eligibility::NonMulti => "nonmulti",
            Eligibility::Execute => "execute",
        }
    }
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub name: DatasetName,
    pub created: String,
    pub updated: String,
    #[serde(rename = "type", default)]
    pub dataset_type: DatasetType,
    #[serde(rename = "ref", default = "default_reference")]
    pub reference: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub inactive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inactive_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax: Option<String>,
    /// User fields, including `run_<stage>` overrides.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_reference() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone)]
pub struct Dataset {
    metadata: DatasetMetadata,
    results: BTreeMap<Stage, ResultRecord>,
}

impl Dataset {
    pub fn new(name: DatasetName, dataset_type: DatasetType, reference: bool) -> Self {
        let now = iso_timestamp();
        Self {
            metadata: DatasetMetadata {
                name,
                created: now.clone(),
                updated: now,
                dataset_type,
                reference,
                inactive: false,
                inactive_reason: None,
                quality: None,
                tax: None,
                extra: BTreeMap::new(),
            },
            results: BTreeMap::new(),
        }
    }

    /// Loads metadata and every cached result record. Result caches are
    /// re-validated by the detector, not here.
    pub fn load(store: &Store, catalog: &TaskCatalog, name: &DatasetName) -> Result<Self, KiraError> {
        let metadata: DatasetMetadata = Store::read_json(&store.metadata_path(name.as_str()))?;
        let results = catalog
            .ordered_stages()
            .iter()
            .filter_map(|stage| {
                ResultRecord::load(&store.result_path(catalog, *stage, name.as_str()))
                    .map(|record| (*stage, record))
            })
            .collect();
        Ok(Self { metadata, results })
    }

    pub fn save(&mut self, store: &Store) -> Result<(), KiraError> {
        self.metadata.updated = iso_timestamp();
        Store::write_json_atomic(&store.metadata_path(self.name().as_str()), &self.metadata)
    }

    pub fn name(&self) -> &DatasetName {
        &self.metadata.name
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut DatasetMetadata {
        &mut self.metadata
    }

    pub fn is_active(&self) -> bool {
        !self.metadata.inactive
    }

    pub fn is_multi(&self) -> bool {
        self.metadata.dataset_type.is_multi()
    }

    pub fn is_reference(&self) -> bool {
        self.metadata.reference
    }

    pub fn activate(&mut self) {
        self.metadata.inactive = false;
        self.metadata.inactive_reason = None;
    }

    pub fn inactivate(&mut self, reason: &str) {
        self.metadata.inactive = true;
        self.metadata.inactive_reason = Some(reason.to_string());
    }

    /// Explicit `run_<stage>` override. Booleans and `"true"`/`"false"`
    /// strings are honored, anything else is ignored.
    pub fn run_override(&self, stage: Stage) -> Option<bool> {
        match self.metadata.extra.get(&stage.run_key())? {
            Value::Bool(value) => Some(*value),
            Value::String(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn set_run_override(&mut self, stage: Stage, value: Option<bool>) {
        match value {
            Some(value) => {
                self.metadata.extra.insert(stage.run_key(), Value::Bool(value));
            }
            None => {
                self.metadata.extra.remove(&stage.run_key());
            }
        }
    }

    pub fn result(&self, stage: Stage) -> Option<&ResultRecord> {
        self.results.get(&stage)
    }

    pub fn results(&self) -> impl Iterator<Item = &ResultRecord> {
        self.results.values()
    }

    pub(crate) fn set_result(&mut self, record: ResultRecord) {
        self.results.insert(record.stage, record);
    }

    pub(crate) fn take_result(&mut self, stage: Stage) -> Option<ResultRecord> {
        self.results.remove(&stage)
    }

    /// Earliest catalog stage with a materialized result; `None` for an
    /// empty dataset.
    pub fn first_satisfied_stage(&self, catalog: &TaskCatalog) -> Option<Stage> {
        catalog
            .ordered_stages()
            .iter()
            .copied()
            .find(|stage| self.results.contains_key(stage))
    }

    /// First stage after the entry point that lacks a result. Gaps before the
    /// entry point are never filled.
    pub fn next_stage(&self, catalog: &TaskCatalog) -> Option<Stage> {
        let first = self.first_satisfied_stage(catalog)?;
        catalog
            .stages_after(first)
            .iter()
            .copied()
            .find(|stage| !self.results.contains_key(stage))
    }

    /// Like [`Dataset::next_stage`], but passes over stages that will never
    /// run for this dataset (forced off, not applicable). Stops at the first
    /// missing stage that can execute, or when the dataset cannot progress.
    pub fn next_runnable_stage(
        &self,
        catalog: &TaskCatalog,
        options: &ProjectOptions,
    ) -> Option<Stage> {
        let first = self.first_satisfied_stage(catalog)?;
        for stage in catalog.stages_after(first) {
            if self.results.contains_key(stage) {
                continue;
            }
            let eligibility = self.eligibility(catalog, options, *stage);
            if eligibility.is_execute() {
                return Some(*stage);
            }
            if !eligibility.passes_over() {
                return None;
            }
        }
        None
    }

    /// Evaluates whether `stage` should run. Pure: reads cached state only.
    ///
    /// This is a general predicate usable for any stage, not only for the
    /// value of [`Dataset::next_stage`]. It does not require earlier stages
    /// to be complete.
    pub fn eligibility(
        &self,
        catalog: &TaskCatalog,
        options: &ProjectOptions,
        stage: Stage,
    ) -> Eligibility {
        if self.results.contains_key(&stage) {
            return Eligibility::Complete;
        }
        if !self.is_active() {
            return Eligibility::Inactive;
        }
        let Some(first) = self.first_satisfied_stage(catalog) else {
            return Eligibility::Empty;
        };
        if catalog.index_of(stage) < catalog.index_of(first) {
            return Eligibility::Upstream;
        }
        match self.run_override(stage) {
            Some(false) => return Eligibility::Force,
            Some(true) => return Eligibility::Execute,
            None => {}
        }
        if !options.allows(stage) {
            return Eligibility::Project;
        }
        if catalog.is_reference_only(stage) && !self.is_reference() {
            return Eligibility::NoRef;
        }
        if catalog.is_multi_only(stage) && !self.is_multi() {
            return Eligibility::Multi;
        }
        if catalog.is_nonmulti_only(stage) && self.is_multi() {
            return Eligibility::NonMulti;
        }
        Eligibility::Execute
    }
}
