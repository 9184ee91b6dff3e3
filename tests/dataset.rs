use camino::Utf8PathBuf;
use tempfile::TempDir;

use kira_pipeline::catalog::TaskCatalog;
use kira_pipeline::dataset::{Dataset, Eligibility};
use kira_pipeline::detect::ResultDetector;
use kira_pipeline::domain::{DatasetType, Stage};
use kira_pipeline::project::{Project, ProjectOptions};
use kira_pipeline::store::Store;

struct Fixture {
    _temp: TempDir,
    store: Store,
    catalog: TaskCatalog,
    project: Project,
}

impl Fixture {
    fn new(options: ProjectOptions) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = Store::new(root);
        let project = Project::create(store.clone(), options).unwrap();
        Self {
            _temp: temp,
            store,
            catalog: TaskCatalog::standard(),
            project,
        }
    }

    fn add(&mut self, name: &str, dataset_type: DatasetType, reference: bool) {
        self.project
            .add_dataset(Dataset::new(name.parse().unwrap(), dataset_type, reference))
            .unwrap();
    }

    fn touch(&self, stage: Stage, relative: &str) {
        let path = self.store.stage_dir(&self.catalog, stage).join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b">a\nACGT\n").unwrap();
    }

    fn refresh(&mut self, name: &str) -> &Dataset {
        let options = self.project.options().clone();
        let detector = ResultDetector::new(&self.catalog, self.store.clone());
        let dataset = self.project.dataset_mut(name).unwrap();
        detector.refresh(dataset, &options).unwrap();
        dataset
    }

    fn refresh_all(&mut self, name: &str) -> &Dataset {
        let options = self.project.options().clone();
        let detector = ResultDetector::new(&self.catalog, self.store.clone());
        let dataset = self.project.dataset_mut(name).unwrap();
        detector.refresh_all(dataset, &options).unwrap();
        dataset
    }

    fn eligibility(&self, name: &str, stage: Stage) -> Eligibility {
        self.project.dataset(name).unwrap().eligibility(
            &self.catalog,
            self.project.options(),
            stage,
        )
    }
}

#[test]
fn paired_reads_enter_at_raw_reads() {
    let mut fx = Fixture::new(ProjectOptions::default());
    fx.add("sample1", DatasetType::Genome, true);
    fx.touch(Stage::RawReads, "sample1.1.fastq");
    fx.touch(Stage::RawReads, "sample1.2.fastq");

    let catalog = fx.catalog.clone();
    let dataset = fx.refresh("sample1");
    assert_eq!(dataset.first_satisfied_stage(&catalog), Some(Stage::RawReads));
    assert_eq!(dataset.next_stage(&catalog), Some(Stage::TrimmedReads));
    let files = &dataset.result(Stage::RawReads).unwrap().files;
    assert!(files.contains_key("pair1"));
    assert!(files.contains_key("pair2"));

    assert_eq!(fx.eligibility("sample1", Stage::RawReads), Eligibility::Complete);
    assert_eq!(fx.eligibility("sample1", Stage::TrimmedReads), Eligibility::Execute);
    // Prerequisites are not enforced by the evaluator.
    assert_eq!(fx.eligibility("sample1", Stage::Assembly), Eligibility::Execute);
}

#[test]
fn present_result_wins_over_forced_skip() {
    let mut fx = Fixture::new(ProjectOptions::default());
    fx.add("sample1", DatasetType::Genome, true);
    fx.touch(Stage::RawReads, "sample1.1.fastq");
    fx.touch(Stage::Assembly, "sample1.LargeContigs.fna");
    {
        let dataset = fx.project.dataset_mut("sample1").unwrap();
        dataset.set_run_override(Stage::Assembly, Some(false));
        dataset.save(&fx.store).unwrap();
    }

    fx.refresh_all("sample1");
    assert_eq!(fx.eligibility("sample1", Stage::Assembly), Eligibility::Complete);

    std::fs::remove_file(
        fx.store
            .stage_dir(&fx.catalog, Stage::Assembly)
            .join("sample1.LargeContigs.fna"),
    )
    .unwrap();
    fx.refresh_all("sample1");
    assert_eq!(fx.eligibility("sample1", Stage::Assembly), Eligibility::Force);
}

#[test]
fn reference_only_stage_with_files_is_complete_for_query_dataset() {
    let options = ProjectOptions {
        ref_project: Some("RefSeq".to_string()),
        ..ProjectOptions::default()
    };
    let mut fx = Fixture::new(options);
    fx.add("query1", DatasetType::Genome, false);
    fx.touch(Stage::Assembly, "query1.LargeContigs.fna");
    fx.touch(Stage::Taxonomy, "query1.aai-medoids.tsv");
    fx.touch(Stage::Taxonomy, "query1.aai.db");

    fx.refresh_all("query1");
    assert_eq!(fx.eligibility("query1", Stage::Taxonomy), Eligibility::Complete);

    fx.add("query2", DatasetType::Genome, false);
    fx.touch(Stage::Assembly, "query2.LargeContigs.fna");
    fx.refresh_all("query2");
    assert_eq!(fx.eligibility("query2", Stage::Taxonomy), Eligibility::NoRef);
}

#[test]
fn empty_and_inactive_datasets() {
    let mut fx = Fixture::new(ProjectOptions::default());
    fx.add("empty1", DatasetType::Genome, true);
    let catalog = fx.catalog.clone();

    let dataset = fx.refresh_all("empty1");
    assert_eq!(dataset.first_satisfied_stage(&catalog), None);
    assert_eq!(dataset.next_stage(&catalog), None);
    assert_eq!(dataset.results().count(), 0);
    for stage in catalog.ordered_stages() {
        assert_eq!(fx.eligibility("empty1", *stage), Eligibility::Empty);
    }

    fx.project.dataset_mut("empty1").unwrap().inactivate("manual");
    assert_eq!(fx.eligibility("empty1", Stage::Assembly), Eligibility::Inactive);
}

#[test]
fn inactive_dataset_keeps_completed_stages() {
    let mut fx = Fixture::new(ProjectOptions::default());
    fx.add("sample1", DatasetType::Genome, true);
    fx.touch(Stage::RawReads, "sample1.1.fastq");
    fx.refresh("sample1");
    fx.project.dataset_mut("sample1").unwrap().inactivate("manual");

    assert_eq!(fx.eligibility("sample1", Stage::RawReads), Eligibility::Complete);
    assert_eq!(fx.eligibility("sample1", Stage::TrimmedReads), Eligibility::Inactive);
}

#[test]
fn stages_before_entry_point_are_upstream() {
    let mut fx = Fixture::new(ProjectOptions::default());
    fx.add("asm1", DatasetType::Genome, true);
    fx.touch(Stage::Assembly, "asm1.LargeContigs.fna");

    let catalog = fx.catalog.clone();
    let dataset = fx.refresh("asm1");
    assert_eq!(dataset.first_satisfied_stage(&catalog), Some(Stage::Assembly));
    assert_eq!(dataset.next_stage(&catalog), Some(Stage::Cds));
    for stage in [Stage::RawReads, Stage::TrimmedReads, Stage::ReadQuality, Stage::TrimmedFasta] {
        assert_eq!(fx.eligibility("asm1", stage), Eligibility::Upstream);
    }
}

#[test]
fn applicability_reasons() {
    let mut fx = Fixture::new(ProjectOptions::default());
    fx.add("genome1", DatasetType::Genome, true);
    fx.add("meta1", DatasetType::Metagenome, true);
    fx.touch(Stage::Assembly, "genome1.LargeContigs.fna");
    fx.touch(Stage::Assembly, "meta1.LargeContigs.fna");

    let options = fx.project.options().clone();
    let detector = ResultDetector::new(&fx.catalog, fx.store.clone());
    for name in ["genome1", "meta1"] {
        let dataset = fx.project.dataset_mut(name).unwrap();
        detector.materialize(dataset, &options, Stage::Assembly).unwrap();
    }

    assert_eq!(fx.eligibility("genome1", Stage::Mytaxa), Eligibility::Multi);
    assert_eq!(fx.eligibility("meta1", Stage::Distances), Eligibility::NonMulti);
    assert_eq!(fx.eligibility("meta1", Stage::Mytaxa), Eligibility::Execute);
    assert_eq!(fx.eligibility("genome1", Stage::Taxonomy), Eligibility::Project);
}

#[test]
fn explicit_run_flag_bypasses_applicability() {
    let mut fx = Fixture::new(ProjectOptions::default());
    fx.add("genome1", DatasetType::Genome, false);
    fx.touch(Stage::Assembly, "genome1.LargeContigs.fna");
    fx.refresh("genome1");

    assert_eq!(fx.eligibility("genome1", Stage::Taxonomy), Eligibility::Project);
    {
        let dataset = fx.project.dataset_mut("genome1").unwrap();
        dataset
            .metadata_mut()
            .extra
            .insert("run_taxonomy".to_string(), serde_json::json!("true"));
    }
    assert_eq!(fx.eligibility("genome1", Stage::Taxonomy), Eligibility::Execute);
    // Upstream still wins over the explicit flag.
    fx.project
        .dataset_mut("genome1")
        .unwrap()
        .set_run_override(Stage::RawReads, Some(true));
    assert_eq!(fx.eligibility("genome1", Stage::RawReads), Eligibility::Upstream);
}

#[test]
fn runnable_stage_passes_over_skipped_gaps() {
    let options = ProjectOptions {
        run_mytaxa: Some(false),
        ..ProjectOptions::default()
    };
    let mut fx = Fixture::new(options);
    fx.add("genome1", DatasetType::Genome, true);
    fx.touch(Stage::Cds, "genome1.faa");
    fx.touch(Stage::EssentialGenes, "genome1.ess.faa");
    fx.touch(Stage::EssentialGenes, "genome1.ess/log");

    let catalog = fx.catalog.clone();
    let options = fx.project.options().clone();
    let dataset = fx.refresh("genome1");

    assert_eq!(dataset.first_satisfied_stage(&catalog), Some(Stage::Cds));
    // Not a multi-sample dataset, so mytaxa is complete without files.
    assert!(dataset.result(Stage::Mytaxa).unwrap().files.is_empty());
    assert_eq!(dataset.next_stage(&catalog), Some(Stage::MytaxaScan));
    assert_eq!(
        dataset.next_runnable_stage(&catalog, &options),
        Some(Stage::Distances)
    );
}
