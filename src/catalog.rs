use std::collections::HashMap;

use crate::domain::Stage;
use crate::rules::{self, StageRule};

#[derive(Debug, Clone, Copy)]
pub struct StageSpec {
    pub stage: Stage,
    /// Storage directory relative to the project root. Part of the on-disk
    /// layout, never renumber.
    pub dir: &'static str,
    pub rule: StageRule,
    pub reference_only: bool,
    pub multi_only: bool,
    pub nonmulti_only: bool,
    /// Role holding an essential-genes report; its completeness and
    /// contamination become result stats and feed quality gating.
    pub quality_report: Option<&'static str>,
}

/// Immutable stage catalog, built once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct TaskCatalog {
    stages: Vec<Stage>,
    specs: Vec<StageSpec>,
    index: HashMap<Stage, usize>,
}

impl TaskCatalog {
    pub fn standard() -> Self {
        let specs = Stage::ALL
            .into_iter()
            .map(|stage| StageSpec {
                stage,
                dir: stage_dir(stage),
                rule: rules::standard_rule(stage),
                reference_only: matches!(stage, Stage::MytaxaScan | Stage::Taxonomy),
                multi_only: matches!(stage, Stage::Mytaxa),
                nonmulti_only: matches!(
                    stage,
                    Stage::MytaxaScan | Stage::Taxonomy | Stage::Distances
                ),
                quality_report: (stage == Stage::EssentialGenes).then_some("report"),
            })
            .collect::<Vec<_>>();
        let stages = specs.iter().map(|spec| spec.stage).collect::<Vec<_>>();
        let index = stages
            .iter()
            .enumerate()
            .map(|(position, stage)| (*stage, position))
            .collect();
        Self {
            stages,
            specs,
            index,
        }
    }

    pub fn ordered_stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn index_of(&self, stage: Stage) -> usize {
        self.index[&stage]
    }

    pub fn spec(&self, stage: Stage) -> &StageSpec {
        &self.specs[self.index_of(stage)]
    }

    pub fn dir(&self, stage: Stage) -> &'static str {
        self.spec(stage).dir
    }

    pub fn is_reference_only(&self, stage: Stage) -> bool {
        self.spec(stage).reference_only
    }

    pub fn is_multi_only(&self, stage: Stage) -> bool {
        self.spec(stage).multi_only
    }

    pub fn is_nonmulti_only(&self, stage: Stage) -> bool {
        self.spec(stage).nonmulti_only
    }

    pub fn quality_report(&self, stage: Stage) -> Option<&'static str> {
        self.spec(stage).quality_report
    }

    /// Stages strictly after `stage`, in catalog order.
    pub fn stages_after(&self, stage: Stage) -> &[Stage] {
        &self.stages[self.index_of(stage) + 1..]
    }
}

impl Default for TaskCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

fn stage_dir(stage: Stage) -> &'static str {
    match stage {
        Stage::RawReads => "data/01.raw_reads",
        Stage::TrimmedReads => "data/02.trimmed_reads",
        Stage::ReadQuality => "data/03.read_quality",
        Stage::TrimmedFasta => "data/04.trimmed_fasta",
        Stage::Assembly => "data/05.assembly",
        Stage::Cds => "data/06.cds",
        Stage::EssentialGenes => "data/07.annotation/01.function/01.essential",
        Stage::Ssu => "data/07.annotation/01.function/02.ssu",
        Stage::Mytaxa => "data/07.annotation/02.taxonomy/01.mytaxa",
        Stage::MytaxaScan => "data/07.annotation/03.qa/02.mytaxa_scan",
        Stage::Distances => "data/09.distances",
        Stage::Taxonomy => "data/09.distances/05.taxonomy",
        Stage::Stats => "data/90.stats",
    }
}
