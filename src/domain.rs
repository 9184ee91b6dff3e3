use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

static DATASET_NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

/// One step of the preprocessing pipeline. Variant order is catalog order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RawReads,
    TrimmedReads,
    ReadQuality,
    TrimmedFasta,
    Assembly,
    Cds,
    EssentialGenes,
    Mytaxa,
    MytaxaScan,
    Taxonomy,
    Distances,
    Ssu,
    Stats,
}

impl Stage {
    pub const ALL: [Stage; 13] = [
        Stage::RawReads,
        Stage::TrimmedReads,
        Stage::ReadQuality,
        Stage::TrimmedFasta,
        Stage::Assembly,
        Stage::Cds,
        Stage::EssentialGenes,
        Stage::Mytaxa,
        Stage::MytaxaScan,
        Stage::Taxonomy,
        Stage::Distances,
        Stage::Ssu,
        Stage::Stats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::RawReads => "raw_reads",
            Stage::TrimmedReads => "trimmed_reads",
            Stage::ReadQuality => "read_quality",
            Stage::TrimmedFasta => "trimmed_fasta",
            Stage::Assembly => "assembly",
            Stage::Cds => "cds",
            Stage::EssentialGenes => "essential_genes",
            Stage::Mytaxa => "mytaxa",
            Stage::MytaxaScan => "mytaxa_scan",
            Stage::Taxonomy => "taxonomy",
            Stage::Distances => "distances",
            Stage::Ssu => "ssu",
            Stage::Stats => "stats",
        }
    }

    /// Metadata key holding the per-dataset override for this stage.
    pub fn run_key(&self) -> String {
        format!("run_{}", self.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value
            .trim()
            .trim_start_matches(':')
            .to_lowercase()
            .replace('-', "_");
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| KiraError::UnknownStage(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetName(String);

impl DatasetName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetName {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if !DATASET_NAME_RE.is_match(value) {
            return Err(KiraError::InvalidDatasetName(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

impl TryFrom<String> for DatasetName {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DatasetName> for String {
    fn from(value: DatasetName) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatasetType {
    #[default]
    Genome,
    Scgenome,
    Popgenome,
    Metagenome,
    Virome,
    Plasmid,
}

impl DatasetType {
    /// Mixed-community samples; everything else is treated as a single genome.
    pub fn is_multi(&self) -> bool {
        matches!(self, DatasetType::Metagenome | DatasetType::Virome)
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetType::Genome => write!(f, "genome"),
            DatasetType::Scgenome => write!(f, "scgenome"),
            DatasetType::Popgenome => write!(f, "popgenome"),
            DatasetType::Metagenome => write!(f, "metagenome"),
            DatasetType::Virome => write!(f, "virome"),
            DatasetType::Plasmid => write!(f, "plasmid"),
        }
    }
}

impl FromStr for DatasetType {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "genome" => Ok(DatasetType::Genome),
            "scgenome" => Ok(DatasetType::Scgenome),
            "popgenome" => Ok(DatasetType::Popgenome),
            "metagenome" => Ok(DatasetType::Metagenome),
            "virome" => Ok(DatasetType::Virome),
            "plasmid" => Ok(DatasetType::Plasmid),
            _ => Err(KiraError::InvalidDatasetType(value.to_string())),
        }
    }
}

/// Ordered worst to best, so `Low < Intermediate < High < Excellent`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Intermediate,
    High,
    Excellent,
}

impl QualityTier {
    pub fn classify(completeness: f64, contamination: f64) -> Self {
        if completeness >= 90.0 && contamination <= 5.0 {
            QualityTier::Excellent
        } else if completeness >= 50.0 && contamination <= 10.0 {
            QualityTier::High
        } else if completeness - 5.0 * contamination >= 25.0 {
            QualityTier::Intermediate
        } else {
            QualityTier::Low
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityTier::Low => write!(f, "low"),
            QualityTier::Intermediate => write!(f, "intermediate"),
            QualityTier::High => write!(f, "high"),
            QualityTier::Excellent => write!(f, "excellent"),
        }
    }
}

impl FromStr for QualityTier {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "low" => Ok(QualityTier::Low),
            "intermediate" => Ok(QualityTier::Intermediate),
            "high" => Ok(QualityTier::High),
            "excellent" => Ok(QualityTier::Excellent),
            _ => Err(KiraError::InvalidQuality(value.to_string())),
        }
    }
}

/// Project-level quality floor. Persisted as a tier name or `"no"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MinQuality {
    #[default]
    Disabled,
    Tier(QualityTier),
}

impl MinQuality {
    pub fn rejects(&self, tier: QualityTier) -> bool {
        match self {
            MinQuality::Disabled => false,
            MinQuality::Tier(min) => tier < *min,
        }
    }
}

impl fmt::Display for MinQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MinQuality::Disabled => write!(f, "no"),
            MinQuality::Tier(tier) => write!(f, "{tier}"),
        }
    }
}

impl FromStr for MinQuality {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "no" | "none" | "false" => Ok(MinQuality::Disabled),
            other => Ok(MinQuality::Tier(other.parse()?)),
        }
    }
}

impl TryFrom<String> for MinQuality {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MinQuality> for String {
    fn from(value: MinQuality) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn stage_names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert_eq!(":cds".parse::<Stage>().unwrap(), Stage::Cds);
    }

    #[test]
    fn stage_unknown() {
        let err = "blast".parse::<Stage>().unwrap_err();
        assert_matches!(err, KiraError::UnknownStage(_));
    }

    #[test]
    fn dataset_name_charset() {
        assert!("sample_1".parse::<DatasetName>().is_ok());
        let err = "sample-1".parse::<DatasetName>().unwrap_err();
        assert_matches!(err, KiraError::InvalidDatasetName(_));
        assert!("".parse::<DatasetName>().is_err());
    }

    #[test]
    fn min_quality_parsing() {
        assert_eq!("no".parse::<MinQuality>().unwrap(), MinQuality::Disabled);
        assert_eq!(
            "high".parse::<MinQuality>().unwrap(),
            MinQuality::Tier(QualityTier::High)
        );
        assert!(MinQuality::Tier(QualityTier::High).rejects(QualityTier::Intermediate));
        assert!(!MinQuality::Tier(QualityTier::High).rejects(QualityTier::Excellent));
        assert!(!MinQuality::Disabled.rejects(QualityTier::Low));
    }
}
