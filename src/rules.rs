//! Declarative result-detection rules.
//!
//! Every stage owns an ordered list of [`Clause`]s. The first clause whose
//! [`Guard`] holds for the dataset decides the outcome: either a [`FileRule`]
//! (one of several alternative file groups must be complete) or a vacuous
//! result (the stage does not apply to the dataset and is complete without
//! files).
//!
//! Templates use `{}` as the dataset-name placeholder and are resolved
//! relative to the stage directory. Each template is also satisfied by its
//! gzip-compressed variant.

use std::collections::BTreeMap;

use camino::Utf8Path;

use crate::domain::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Always,
    Multi,
    NonMulti,
    Reference,
    /// The stage precedes the first materialized stage of the dataset.
    Upstream(Stage),
}

#[derive(Debug, Clone, Copy)]
pub struct Alternative {
    pub require: &'static [&'static str],
    pub roles: &'static [(&'static str, &'static str)],
}

#[derive(Debug, Clone, Copy)]
pub struct FileRule {
    pub alternatives: &'static [Alternative],
    /// Recorded whenever present, whichever alternative matched.
    pub optional: &'static [(&'static str, &'static str)],
    /// Roles rewritten once through the FASTA normalizer.
    pub clean: &'static [&'static str],
}

#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Files(FileRule),
    Vacuous,
}

#[derive(Debug, Clone, Copy)]
pub struct Clause {
    pub guard: Guard,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy)]
pub struct StageRule {
    pub clauses: &'static [Clause],
}

/// What a guard may look at. Built by the detector from the dataset.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext {
    pub multi: bool,
    pub reference: bool,
    /// First materialized stage strictly before the stage being detected.
    pub anchor: Option<Stage>,
}

impl Guard {
    pub fn holds(&self, ctx: &RuleContext) -> bool {
        match self {
            Guard::Always => true,
            Guard::Multi => ctx.multi,
            Guard::NonMulti => !ctx.multi,
            Guard::Reference => ctx.reference,
            Guard::Upstream(stage) => ctx.anchor.is_some_and(|anchor| *stage < anchor),
        }
    }
}

impl StageRule {
    pub fn select(&self, ctx: &RuleContext) -> Option<&Outcome> {
        self.clauses
            .iter()
            .find(|clause| clause.guard.holds(ctx))
            .map(|clause| &clause.outcome)
    }
}

impl FileRule {
    /// Returns the role -> relative path mapping of the first complete
    /// alternative, or `None` when no alternative is satisfied.
    pub fn resolve(&self, dir: &Utf8Path, name: &str) -> Option<BTreeMap<String, String>> {
        let alternative = self.alternatives.iter().find(|alt| {
            alt.require
                .iter()
                .all(|template| locate(dir, &render(template, name)).is_some())
        })?;

        let mut files = BTreeMap::new();
        for (role, template) in alternative.roles.iter().chain(self.optional) {
            if let Some(path) = locate(dir, &render(template, name)) {
                files.insert(role.to_string(), path);
            }
        }
        Some(files)
    }
}

pub fn render(template: &str, name: &str) -> String {
    template.replace("{}", name)
}

/// Finds `relative` or its `.gz` variant under `dir`; gzip wins when both exist.
pub fn locate(dir: &Utf8Path, relative: &str) -> Option<String> {
    let gz = format!("{relative}.gz");
    if dir.join(&gz).as_std_path().exists() {
        return Some(gz);
    }
    dir.join(relative)
        .as_std_path()
        .exists()
        .then(|| relative.to_string())
}

const NO_ROLES: &[(&str, &str)] = &[];

const DISTANCE_MEDOIDS: FileRule = FileRule {
    alternatives: &[
        Alternative {
            require: &["{}.aai-medoids.tsv", "{}.aai.db"],
            roles: NO_ROLES,
        },
        Alternative {
            require: &["{}.ani-medoids.tsv", "{}.ani.db"],
            roles: NO_ROLES,
        },
    ],
    optional: &[
        ("aai_medoids", "{}.aai-medoids.tsv"),
        ("haai_db", "{}.haai.db"),
        ("aai_db", "{}.aai.db"),
        ("ani_medoids", "{}.ani-medoids.tsv"),
        ("ani_db", "{}.ani.db"),
        ("ref_tree", "{}.nwk"),
        ("ref_tree_pdf", "{}.nwk.pdf"),
        ("intax", "{}.intax.txt"),
    ],
    clean: &[],
};

const RAW_READS: StageRule = StageRule {
    clauses: &[Clause {
        guard: Guard::Always,
        outcome: Outcome::Files(FileRule {
            alternatives: &[
                Alternative {
                    require: &["{}.1.fastq", "{}.2.fastq"],
                    roles: &[("pair1", "{}.1.fastq"), ("pair2", "{}.2.fastq")],
                },
                Alternative {
                    require: &["{}.1.fastq"],
                    roles: &[("single", "{}.1.fastq")],
                },
            ],
            optional: &[],
            clean: &[],
        }),
    }],
};

const TRIMMED_READS: StageRule = StageRule {
    clauses: &[Clause {
        guard: Guard::Always,
        outcome: Outcome::Files(FileRule {
            alternatives: &[
                Alternative {
                    require: &["{}.1.clipped.fastq", "{}.2.clipped.fastq"],
                    roles: &[
                        ("pair1", "{}.1.clipped.fastq"),
                        ("pair2", "{}.2.clipped.fastq"),
                        ("single", "{}.1.clipped.single.fastq"),
                    ],
                },
                Alternative {
                    require: &["{}.1.clipped.fastq"],
                    roles: &[("single", "{}.1.clipped.fastq")],
                },
            ],
            optional: &[("trimming_summary", "{}.1.fastq.trimmed.summary.txt")],
            clean: &[],
        }),
    }],
};

const READ_QUALITY: StageRule = StageRule {
    clauses: &[Clause {
        guard: Guard::Always,
        outcome: Outcome::Files(FileRule {
            alternatives: &[
                Alternative {
                    require: &["{}.pre.1.html", "{}.post.1.html"],
                    roles: &[
                        ("pre_qc_1", "{}.pre.1.html"),
                        ("pre_qc_2", "{}.pre.2.html"),
                        ("post_qc_1", "{}.post.1.html"),
                        ("post_qc_2", "{}.post.2.html"),
                        ("adapter_detection", "{}.adapters.txt"),
                    ],
                },
                // Reports written before the switch to per-read HTML summaries.
                Alternative {
                    require: &["{}.solexaqa", "{}.fastqc"],
                    roles: &[("solexaqa", "{}.solexaqa"), ("fastqc", "{}.fastqc")],
                },
            ],
            optional: &[],
            clean: &[],
        }),
    }],
};

const TRIMMED_FASTA: StageRule = StageRule {
    clauses: &[Clause {
        guard: Guard::Always,
        outcome: Outcome::Files(FileRule {
            alternatives: &[
                Alternative {
                    require: &["{}.CoupledReads.fa"],
                    roles: &[
                        ("coupled", "{}.CoupledReads.fa"),
                        ("single", "{}.SingleReads.fa"),
                    ],
                },
                Alternative {
                    require: &["{}.SingleReads.fa"],
                    roles: &[("single", "{}.SingleReads.fa")],
                },
                Alternative {
                    require: &["{}.1.fasta", "{}.2.fasta"],
                    roles: &[("pair1", "{}.1.fasta"), ("pair2", "{}.2.fasta")],
                },
            ],
            optional: &[],
            clean: &[],
        }),
    }],
};

const ASSEMBLY: StageRule = StageRule {
    clauses: &[Clause {
        guard: Guard::Always,
        outcome: Outcome::Files(FileRule {
            alternatives: &[Alternative {
                require: &["{}.LargeContigs.fna"],
                roles: &[
                    ("largecontigs", "{}.LargeContigs.fna"),
                    ("allcontigs", "{}.AllContigs.fna"),
                    ("assembly_data", "{}"),
                ],
            }],
            optional: &[],
            clean: &["largecontigs"],
        }),
    }],
};

const CDS: StageRule = StageRule {
    clauses: &[Clause {
        guard: Guard::Always,
        outcome: Outcome::Files(FileRule {
            alternatives: &[Alternative {
                require: &["{}.faa"],
                roles: &[
                    ("proteins", "{}.faa"),
                    ("genes", "{}.fna"),
                    ("gff2", "{}.gff2"),
                    ("gff3", "{}.gff3"),
                    ("tab", "{}.tab"),
                ],
            }],
            optional: &[],
            clean: &["proteins", "genes"],
        }),
    }],
};

const ESSENTIAL_GENES: StageRule = StageRule {
    clauses: &[Clause {
        guard: Guard::Always,
        outcome: Outcome::Files(FileRule {
            alternatives: &[Alternative {
                require: &["{}.ess.faa", "{}.ess", "{}.ess/log"],
                roles: &[
                    ("ess_genes", "{}.ess.faa"),
                    ("collection", "{}.ess"),
                    ("report", "{}.ess/log"),
                    ("alignments", "{}.ess/proteins.aln"),
                    ("fastaai_index", "{}.faix"),
                ],
            }],
            optional: &[],
            clean: &[],
        }),
    }],
};

const MYTAXA: StageRule = StageRule {
    clauses: &[
        Clause {
            guard: Guard::Multi,
            outcome: Outcome::Files(FileRule {
                alternatives: &[
                    Alternative {
                        require: &["{}.mytaxa"],
                        roles: NO_ROLES,
                    },
                    Alternative {
                        require: &["{}.nomytaxa.txt"],
                        roles: NO_ROLES,
                    },
                ],
                optional: &[
                    ("mytaxa", "{}.mytaxa"),
                    ("blast", "{}.blast"),
                    ("mytaxain", "{}.mytaxain"),
                    ("nomytaxa", "{}.nomytaxa.txt"),
                    ("species", "{}.mytaxa.Species.txt"),
                    ("genus", "{}.mytaxa.Genus.txt"),
                    ("phylum", "{}.mytaxa.Phylum.txt"),
                    ("innominate", "{}.mytaxa.innominate"),
                    ("kronain", "{}.mytaxa.krona"),
                    ("krona", "{}.html"),
                ],
                clean: &[],
            }),
        },
        Clause {
            guard: Guard::Always,
            outcome: Outcome::Vacuous,
        },
    ],
};

const MYTAXA_SCAN: StageRule = StageRule {
    clauses: &[
        Clause {
            guard: Guard::NonMulti,
            outcome: Outcome::Files(FileRule {
                alternatives: &[
                    Alternative {
                        require: &["{}.pdf", "{}.mytaxa"],
                        roles: NO_ROLES,
                    },
                    Alternative {
                        require: &["{}.nomytaxa.txt"],
                        roles: NO_ROLES,
                    },
                ],
                optional: &[
                    ("nomytaxa", "{}.nomytaxa.txt"),
                    ("mytaxa", "{}.mytaxa"),
                    ("report", "{}.pdf"),
                    ("regions_archive", "{}.reg.tar"),
                    ("blast", "{}.blast"),
                    ("mytaxain", "{}.mytaxain"),
                ],
                clean: &[],
            }),
        },
        Clause {
            guard: Guard::Always,
            outcome: Outcome::Vacuous,
        },
    ],
};

const TAXONOMY: StageRule = StageRule {
    clauses: &[Clause {
        guard: Guard::Always,
        outcome: Outcome::Files(DISTANCE_MEDOIDS),
    }],
};

const DISTANCES: StageRule = StageRule {
    clauses: &[
        Clause {
            guard: Guard::Multi,
            outcome: Outcome::Vacuous,
        },
        Clause {
            guard: Guard::Reference,
            outcome: Outcome::Files(FileRule {
                alternatives: &[Alternative {
                    require: &["01.haai/{}.db"],
                    roles: &[
                        ("haai_db", "01.haai/{}.db"),
                        ("aai_db", "02.aai/{}.db"),
                        ("ani_db", "03.ani/{}.db"),
                    ],
                }],
                optional: &[],
                clean: &[],
            }),
        },
        Clause {
            guard: Guard::Always,
            outcome: Outcome::Files(DISTANCE_MEDOIDS),
        },
    ],
};

const SSU: StageRule = StageRule {
    clauses: &[
        Clause {
            guard: Guard::Upstream(Stage::Assembly),
            outcome: Outcome::Vacuous,
        },
        Clause {
            guard: Guard::Always,
            outcome: Outcome::Files(FileRule {
                alternatives: &[Alternative {
                    require: &["{}.ssu.fa"],
                    roles: &[
                        ("longest_ssu_gene", "{}.ssu.fa"),
                        ("gff", "{}.ssu.gff"),
                        ("all_ssu_genes", "{}.ssu.all.fa"),
                        ("classification", "{}.rdp.tsv"),
                        ("trna_list", "{}.trna.txt"),
                    ],
                }],
                optional: &[],
                clean: &["longest_ssu_gene"],
            }),
        },
    ],
};

const STATS: StageRule = StageRule {
    clauses: &[Clause {
        guard: Guard::Always,
        outcome: Outcome::Files(FileRule {
            alternatives: &[Alternative {
                require: &["{}.done"],
                roles: &[("done", "{}.done")],
            }],
            optional: &[],
            clean: &[],
        }),
    }],
};

pub fn standard_rule(stage: Stage) -> StageRule {
    match stage {
        Stage::RawReads => RAW_READS,
        Stage::TrimmedReads => TRIMMED_READS,
        Stage::ReadQuality => READ_QUALITY,
        Stage::TrimmedFasta => TRIMMED_FASTA,
        Stage::Assembly => ASSEMBLY,
        Stage::Cds => CDS,
        Stage::EssentialGenes => ESSENTIAL_GENES,
        Stage::Mytaxa => MYTAXA,
        Stage::MytaxaScan => MYTAXA_SCAN,
        Stage::Taxonomy => TAXONOMY,
        Stage::Distances => DISTANCES,
        Stage::Ssu => SSU,
        Stage::Stats => STATS,
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    fn touch(dir: &Utf8Path, relative: &str) {
        let path = dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b">a\nACGT\n").unwrap();
    }

    fn scratch() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, dir)
    }

    fn files_rule(stage: Stage, ctx: &RuleContext) -> FileRule {
        match standard_rule(stage).select(ctx) {
            Some(Outcome::Files(rule)) => *rule,
            other => panic!("expected file rule for {stage}, got {other:?}"),
        }
    }

    const SINGLE: RuleContext = RuleContext {
        multi: false,
        reference: false,
        anchor: None,
    };

    #[test]
    fn paired_layout_wins_over_single() {
        let (_temp, dir) = scratch();
        touch(&dir, "s1.1.fastq");
        touch(&dir, "s1.2.fastq.gz");

        let files = files_rule(Stage::RawReads, &SINGLE)
            .resolve(&dir, "s1")
            .unwrap();
        assert_eq!(files["pair1"], "s1.1.fastq");
        assert_eq!(files["pair2"], "s1.2.fastq.gz");
        assert!(!files.contains_key("single"));
    }

    #[test]
    fn single_layout_when_mate_missing() {
        let (_temp, dir) = scratch();
        touch(&dir, "s1.1.fastq");

        let files = files_rule(Stage::RawReads, &SINGLE)
            .resolve(&dir, "s1")
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files["single"], "s1.1.fastq");
    }

    #[test]
    fn legacy_read_quality_reports_are_accepted() {
        let (_temp, dir) = scratch();
        std::fs::create_dir_all(dir.join("s1.solexaqa")).unwrap();
        std::fs::create_dir_all(dir.join("s1.fastqc")).unwrap();

        let files = files_rule(Stage::ReadQuality, &SINGLE)
            .resolve(&dir, "s1")
            .unwrap();
        assert_eq!(files["solexaqa"], "s1.solexaqa");
        assert_eq!(files["fastqc"], "s1.fastqc");
    }

    #[test]
    fn incomplete_group_is_not_satisfied() {
        let (_temp, dir) = scratch();
        touch(&dir, "s1.aai-medoids.tsv");
        touch(&dir, "s1.ani.db");

        assert!(files_rule(Stage::Taxonomy, &SINGLE).resolve(&dir, "s1").is_none());
    }

    #[test]
    fn guards_pick_the_first_matching_clause() {
        let multi = RuleContext {
            multi: true,
            ..SINGLE
        };
        assert!(matches!(
            standard_rule(Stage::Distances).select(&multi),
            Some(Outcome::Vacuous)
        ));
        assert!(matches!(
            standard_rule(Stage::Mytaxa).select(&SINGLE),
            Some(Outcome::Vacuous)
        ));
        assert!(matches!(
            standard_rule(Stage::Mytaxa).select(&multi),
            Some(Outcome::Files(_))
        ));
    }

    #[test]
    fn ssu_is_vacuous_only_when_assembly_is_upstream() {
        let entered_at_cds = RuleContext {
            anchor: Some(Stage::Cds),
            ..SINGLE
        };
        let entered_at_reads = RuleContext {
            anchor: Some(Stage::RawReads),
            ..SINGLE
        };
        assert!(matches!(
            standard_rule(Stage::Ssu).select(&entered_at_cds),
            Some(Outcome::Vacuous)
        ));
        assert!(matches!(
            standard_rule(Stage::Ssu).select(&entered_at_reads),
            Some(Outcome::Files(_))
        ));
    }
}
