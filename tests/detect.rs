use std::io::{Read, Write};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tempfile::TempDir;

use kira_pipeline::catalog::TaskCatalog;
use kira_pipeline::dataset::{Dataset, Eligibility};
use kira_pipeline::detect::{LOW_QUALITY_REASON, PostProcess, ResultDetector};
use kira_pipeline::domain::{DatasetType, MinQuality, QualityTier, Stage};
use kira_pipeline::project::{Project, ProjectOptions};
use kira_pipeline::store::Store;

const DIRTY_CONTIGS: &str = ">contig-1 len=8\nACGT ACGT\n";
const CLEAN_CONTIGS: &str = ">contig_1 len=8\nACGTACGT\n";

fn setup(options: ProjectOptions) -> (TempDir, Store, TaskCatalog, Project) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = Store::new(root);
    let catalog = TaskCatalog::standard();
    let mut project = Project::create(store.clone(), options).unwrap();
    project
        .add_dataset(Dataset::new("s1".parse().unwrap(), DatasetType::Genome, true))
        .unwrap();
    (temp, store, catalog, project)
}

fn write(store: &Store, catalog: &TaskCatalog, stage: Stage, relative: &str, content: &[u8]) {
    let path = store.stage_dir(catalog, stage).join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn read(store: &Store, catalog: &TaskCatalog, stage: Stage, relative: &str) -> String {
    std::fs::read_to_string(store.stage_dir(catalog, stage).join(relative)).unwrap()
}

#[test]
fn redetection_only_moves_updated_timestamp() {
    let (_temp, store, catalog, mut project) = setup(ProjectOptions::default());
    write(&store, &catalog, Stage::Assembly, "s1.LargeContigs.fna", DIRTY_CONTIGS.as_bytes());
    write(&store, &catalog, Stage::Assembly, "s1.AllContigs.fna", b">a\nA\n");

    let options = project.options().clone();
    let detector = ResultDetector::new(&catalog, store.clone());
    let json_path = store.result_path(&catalog, Stage::Assembly, "s1");

    let dataset = project.dataset_mut("s1").unwrap();
    detector.refresh(dataset, &options).unwrap();
    let first: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();

    detector.refresh(dataset, &options).unwrap();
    let second: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();

    let strip = |mut value: serde_json::Value| {
        value.as_object_mut().unwrap().remove("updated");
        value
    };
    assert_eq!(strip(first.clone()), strip(second));
    assert_eq!(first["files"]["largecontigs"], "s1.LargeContigs.fna");
    assert_eq!(first["files"]["allcontigs"], "s1.AllContigs.fna");
    assert_eq!(first["clean"], true);
}

#[test]
fn fasta_is_cleaned_at_most_once() {
    let (_temp, store, catalog, mut project) = setup(ProjectOptions::default());
    write(&store, &catalog, Stage::Assembly, "s1.LargeContigs.fna", DIRTY_CONTIGS.as_bytes());

    let options = project.options().clone();
    let detector = ResultDetector::new(&catalog, store.clone());
    let dataset = project.dataset_mut("s1").unwrap();

    let detection = detector.detect(dataset, Stage::Assembly).unwrap();
    assert_matches!(
        detection.pending.as_slice(),
        [PostProcess::CleanFasta { role, .. }] if role == "largecontigs"
    );
    let record = detector.apply(dataset, &options, detection).unwrap();
    assert!(record.clean);
    assert_eq!(
        read(&store, &catalog, Stage::Assembly, "s1.LargeContigs.fna"),
        CLEAN_CONTIGS
    );

    // A rewritten file is not touched again once the result is clean.
    write(&store, &catalog, Stage::Assembly, "s1.LargeContigs.fna", DIRTY_CONTIGS.as_bytes());
    let detection = detector.detect(dataset, Stage::Assembly).unwrap();
    assert!(detection.pending.is_empty());
    detector.apply(dataset, &options, detection).unwrap();
    assert_eq!(
        read(&store, &catalog, Stage::Assembly, "s1.LargeContigs.fna"),
        DIRTY_CONTIGS
    );
}

#[test]
fn gzip_variant_satisfies_rule_and_stays_compressed() {
    let (_temp, store, catalog, mut project) = setup(ProjectOptions::default());
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(DIRTY_CONTIGS.as_bytes()).unwrap();
    write(
        &store,
        &catalog,
        Stage::Assembly,
        "s1.LargeContigs.fna.gz",
        &encoder.finish().unwrap(),
    );

    let options = project.options().clone();
    let detector = ResultDetector::new(&catalog, store.clone());
    let dataset = project.dataset_mut("s1").unwrap();
    let record = detector
        .materialize(dataset, &options, Stage::Assembly)
        .unwrap()
        .unwrap();
    assert_eq!(record.files["largecontigs"], "s1.LargeContigs.fna.gz");

    let path = store
        .stage_dir(&catalog, Stage::Assembly)
        .join("s1.LargeContigs.fna.gz");
    let mut text = String::new();
    GzDecoder::new(std::fs::File::open(path).unwrap())
        .read_to_string(&mut text)
        .unwrap();
    assert_eq!(text, CLEAN_CONTIGS);
}

#[test]
fn vanished_files_drop_the_cached_result() {
    let (_temp, store, catalog, mut project) = setup(ProjectOptions::default());
    write(&store, &catalog, Stage::Cds, "s1.faa", b">p\nMK\n");

    let options = project.options().clone();
    let detector = ResultDetector::new(&catalog, store.clone());
    let json_path = store.result_path(&catalog, Stage::Cds, "s1");
    let dataset = project.dataset_mut("s1").unwrap();

    assert!(detector.materialize(dataset, &options, Stage::Cds).unwrap().is_some());
    assert!(json_path.as_std_path().exists());

    std::fs::remove_file(store.stage_dir(&catalog, Stage::Cds).join("s1.faa")).unwrap();
    assert!(detector.materialize(dataset, &options, Stage::Cds).unwrap().is_none());
    assert!(dataset.result(Stage::Cds).is_none());
    assert!(!json_path.as_std_path().exists());
}

#[test]
fn vacuous_stage_needs_an_entry_point() {
    let (_temp, store, catalog, mut project) = setup(ProjectOptions::default());
    let detector = ResultDetector::new(&catalog, store.clone());
    let dataset = project.dataset_mut("s1").unwrap();

    assert!(detector.detect(dataset, Stage::Mytaxa).is_none());

    write(&store, &catalog, Stage::Assembly, "s1.LargeContigs.fna", b">a\nA\n");
    let options = ProjectOptions::default();
    detector.materialize(dataset, &options, Stage::Assembly).unwrap();
    let detection = detector.detect(dataset, Stage::Mytaxa).unwrap();
    assert!(detection.record.files.is_empty());
}

#[test]
fn low_quality_genome_is_deactivated_once() {
    let options = ProjectOptions {
        min_qual: MinQuality::Tier(QualityTier::High),
        ..ProjectOptions::default()
    };
    let (_temp, store, catalog, mut project) = setup(options);
    write(&store, &catalog, Stage::Cds, "s1.faa", b">p\nMK\n");
    write(&store, &catalog, Stage::EssentialGenes, "s1.ess.faa", b">p\nMK\n");
    write(
        &store,
        &catalog,
        Stage::EssentialGenes,
        "s1.ess/log",
        b"! Essential genes found: 40/106.\n! Completeness: 40.0%.\n! Contamination: 4.0%.\n",
    );

    let options = project.options().clone();
    let detector = ResultDetector::new(&catalog, store.clone());
    {
        let dataset = project.dataset_mut("s1").unwrap();
        detector.refresh(dataset, &options).unwrap();

        let record = dataset.result(Stage::EssentialGenes).unwrap();
        assert_eq!(record.stat("completeness"), Some(40.0));
        assert_eq!(record.stat("quality"), Some(20.0));
        assert!(!dataset.is_active());
        assert_eq!(dataset.metadata().quality, Some(QualityTier::Low));
        assert_eq!(
            dataset.metadata().inactive_reason.as_deref(),
            Some(LOW_QUALITY_REASON)
        );
        assert_eq!(
            dataset.eligibility(&catalog, &options, Stage::MytaxaScan),
            Eligibility::Inactive
        );

        dataset.activate();
        dataset.save(&store).unwrap();
        detector.refresh(dataset, &options).unwrap();
        assert!(dataset.is_active());
    }

    // Persisted metadata and cached results survive a reload.
    let reloaded = Project::load(store.clone(), &catalog).unwrap();
    let dataset = reloaded.dataset("s1").unwrap();
    assert!(dataset.is_active());
    assert_eq!(dataset.metadata().quality, Some(QualityTier::Low));
    assert_eq!(dataset.first_satisfied_stage(&catalog), Some(Stage::Cds));
    assert!(dataset.result(Stage::EssentialGenes).unwrap().stats.is_some());
}

#[test]
fn reload_and_redetect_keeps_files() {
    let (_temp, store, catalog, mut project) = setup(ProjectOptions::default());
    write(&store, &catalog, Stage::Assembly, "s1.LargeContigs.fna", CLEAN_CONTIGS.as_bytes());
    write(&store, &catalog, Stage::Assembly, "s1.AllContigs.fna.gz", b"");
    write(&store, &catalog, Stage::Cds, "s1.faa", b">p\nMK\n");
    write(&store, &catalog, Stage::Cds, "s1.gff3", b"##gff-version 3\n");

    let options = project.options().clone();
    let detector = ResultDetector::new(&catalog, store.clone());
    let dataset = project.dataset_mut("s1").unwrap();
    let assembly = detector
        .materialize(dataset, &options, Stage::Assembly)
        .unwrap()
        .unwrap();
    let cds = detector
        .materialize(dataset, &options, Stage::Cds)
        .unwrap()
        .unwrap();

    let mut reloaded = Project::load(store.clone(), &catalog).unwrap();
    let dataset = reloaded.dataset_mut("s1").unwrap();
    assert_eq!(dataset.result(Stage::Assembly).unwrap().files, assembly.files);

    let detector = ResultDetector::new(&catalog, store.clone());
    for expected in [&assembly, &cds] {
        let again = detector
            .materialize(dataset, &options, expected.stage)
            .unwrap()
            .unwrap();
        assert_eq!(again.files, expected.files);
        assert_eq!(again.created, expected.created);
    }
    assert_eq!(assembly.files["allcontigs"], "s1.AllContigs.fna.gz");
}
