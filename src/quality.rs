use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::sync::LazyLock;

use camino::Utf8Path;
use flate2::read::MultiGzDecoder;
use regex::Regex;

use crate::domain::{MinQuality, QualityTier};
use crate::result::StatValue;

static REPORT_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^! (Essential genes found|Completeness|Contamination): ([0-9.]+)(?:/([0-9]+))?%?")
        .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenomeQuality {
    pub completeness: f64,
    pub contamination: f64,
    pub found: Option<(u32, u32)>,
}

impl GenomeQuality {
    /// `completeness - 5 * contamination`.
    pub fn score(&self) -> f64 {
        self.completeness - 5.0 * self.contamination
    }

    pub fn tier(&self) -> QualityTier {
        QualityTier::classify(self.completeness, self.contamination)
    }

    pub fn stats(&self) -> BTreeMap<String, StatValue> {
        let mut stats = BTreeMap::new();
        stats.insert(
            "completeness".to_string(),
            StatValue::Measure(self.completeness, "%".to_string()),
        );
        stats.insert(
            "contamination".to_string(),
            StatValue::Measure(self.contamination, "%".to_string()),
        );
        stats.insert("quality".to_string(), StatValue::Number(self.score()));
        if let Some((found, total)) = self.found {
            stats.insert(
                "essential_genes_found".to_string(),
                StatValue::Text(format!("{found}/{total}")),
            );
        }
        stats
    }

    /// Reads an essential-genes report. Returns `None` when the report cannot
    /// be read or lacks completeness/contamination lines.
    pub fn from_report(path: &Utf8Path) -> Option<Self> {
        let file = File::open(path.as_std_path()).ok()?;
        let reader: Box<dyn Read> = if path.as_str().ends_with(".gz") {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Self::parse(BufReader::new(reader))
    }

    pub fn parse<R: BufRead>(reader: R) -> Option<Self> {
        let mut completeness = None;
        let mut contamination = None;
        let mut found = None;
        for line in reader.lines() {
            let line = line.ok()?;
            let Some(caps) = REPORT_LINE_RE.captures(line.trim()) else {
                continue;
            };
            match &caps[1] {
                "Completeness" => completeness = caps[2].parse::<f64>().ok(),
                "Contamination" => contamination = caps[2].parse::<f64>().ok(),
                _ => {
                    found = caps[2]
                        .parse::<u32>()
                        .ok()
                        .zip(caps.get(3).and_then(|total| total.as_str().parse().ok()));
                }
            }
        }
        Some(Self {
            completeness: completeness?,
            contamination: contamination?,
            found,
        })
    }
}

/// What quality gating decided for a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub tier: QualityTier,
    pub deactivate: bool,
}

pub fn gate(quality: &GenomeQuality, min_qual: MinQuality) -> GateDecision {
    let tier = quality.tier();
    GateDecision {
        tier,
        deactivate: min_qual.rejects(tier),
    }
}
