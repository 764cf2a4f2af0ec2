use std::collections::BTreeSet;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use cmip_replica::app::{
    App, CatalogRequest, CompleteRequest, PathSource, ReconcileRequest, SearchRequest, script_path,
};
use cmip_replica::config::{Config, ConfigLoader};
use cmip_replica::constraints::ConstraintSet;
use cmip_replica::domain::VarMip;
use cmip_replica::error::ReplicaError;
use cmip_replica::esgf::{ArchiveClient, NO_MATCHES, SearchQuery};
use cmip_replica::output::JsonOutput;
use cmip_replica::reconcile::{RequestedCombination, RequestedSpace};

const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";
const HOST_DIR: &str =
    "node.example.org/cmip5/output1/NCAR/CCSM4/rcp45/mon/atmos/Amon/r1i1p1/v20120101/tas";

struct MockArchive {
    script: String,
    queries: Mutex<Vec<String>>,
}

impl MockArchive {
    fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            queries: Mutex::new(Vec::new()),
        }
    }
}

impl ArchiveClient for MockArchive {
    fn fetch_script(&self, query: &SearchQuery) -> Result<String, ReplicaError> {
        self.queries.lock().unwrap().push(query.experiment.clone());
        Ok(self.script.clone())
    }
}

fn utf8(path: &std::path::Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

fn app(root: &Utf8Path, archive: MockArchive) -> App<MockArchive> {
    let config = ConfigLoader::resolve_config(Config {
        replica_root: Some(root.join("tree").to_string()),
        checksum_exempt: Some(Vec::new()),
        workers: Some(2),
        ..Config::default()
    });
    App::new(config, archive)
}

fn entry(filename: &str, checksum: &str) -> String {
    format!("'{filename}' 'http://{HOST_DIR}/{filename}' 'MD5' '{checksum}'")
}

fn space(models: &[&str]) -> RequestedSpace {
    RequestedSpace::new(
        ["tas_Amon".parse::<VarMip>().unwrap()],
        models.iter().map(|model| model.to_string()),
        ["rcp45".to_string()],
    )
}

fn reconcile_request(root: &Utf8Path, models: &[&str]) -> ReconcileRequest {
    ReconcileRequest {
        space: space(models),
        dir: root.to_path_buf(),
        fetch: false,
        output_root: Some(root.join("reports/variables").to_string()),
        table: true,
        workers: None,
    }
}

#[test]
fn reconcile_sorts_files_into_replicas_and_downloads() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8(temp.path());

    let current = "tas_Amon_CCSM4_rcp45_r1i1p1_200601-205012.nc";
    let stale = "tas_Amon_CCSM4_rcp45_r1i1p1_205101-210012.nc";
    let replica_dir = root.join("tree").join(HOST_DIR);
    std::fs::create_dir_all(replica_dir.as_std_path()).unwrap();
    std::fs::write(replica_dir.join(current).as_std_path(), b"hello").unwrap();
    std::fs::write(replica_dir.join(stale).as_std_path(), b"outdated").unwrap();

    let script = format!(
        "#!/bin/bash\n{}\n{}\n",
        entry(current, HELLO_MD5),
        entry(stale, HELLO_MD5)
    );
    std::fs::write(script_path(&root, "rcp45").as_std_path(), script).unwrap();

    let app = app(&root, MockArchive::new(""));
    let result = app
        .reconcile(reconcile_request(&root, &["CCSM4", "MIROC5"]), &JsonOutput)
        .unwrap();

    let reconciliation = &result.reconciliation;
    assert_eq!(reconciliation.published_stale.len(), 1);
    assert!(reconciliation.published_current.is_empty());
    assert_eq!(reconciliation.not_published.len(), 1);
    assert_eq!(reconciliation.replicas().count(), 1);
    assert_eq!(reconciliation.downloads().count(), 1);
    assert_eq!(result.experiments[0].accepted, 2);
    assert_eq!(result.reports.len(), 4);

    let replicas =
        std::fs::read_to_string(root.join("reports/variables_replica.csv").as_std_path()).unwrap();
    assert!(replicas.contains(current));
    assert!(replicas.contains("v20120101"));
    let downloads =
        std::fs::read_to_string(root.join("reports/variables_to_download.csv").as_std_path())
            .unwrap();
    assert!(downloads.contains(&format!("http://{HOST_DIR}/{stale}")));
    let missing =
        std::fs::read_to_string(root.join("reports/variables_not_published.csv").as_std_path())
            .unwrap();
    assert!(missing.contains("tas_Amon,MIROC5,rcp45"));
    let table = std::fs::read_to_string(root.join("reports/rcp45.csv").as_std_path()).unwrap();
    assert!(table.contains("CCSM4_r1i1p1"));
    assert!(table.contains("2 files (1 to update)"));

    assert_matches!(
        app.reconcile(reconcile_request(&root, &["CCSM4"]), &JsonOutput),
        Err(ReplicaError::OutputExists(_))
    );
}

#[test]
fn empty_archive_listing_is_refused() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8(temp.path());
    std::fs::write(
        script_path(&root, "rcp45").as_std_path(),
        format!("{NO_MATCHES}\n"),
    )
    .unwrap();

    let app = app(&root, MockArchive::new(""));
    assert_matches!(
        app.reconcile(reconcile_request(&root, &["CCSM4"]), &JsonOutput),
        Err(ReplicaError::NothingToReconcile(_))
    );
    assert!(!root.join("reports/variables_replica.csv").as_std_path().exists());
}

fn two_experiment_request(root: &Utf8Path) -> ReconcileRequest {
    ReconcileRequest {
        space: RequestedSpace::new(
            ["tas_Amon".parse::<VarMip>().unwrap()],
            ["CCSM4".to_string()],
            ["rcp45".to_string(), "historical".to_string()],
        ),
        dir: root.to_path_buf(),
        fetch: false,
        output_root: None,
        table: false,
        workers: None,
    }
}

#[test]
fn empty_experiment_does_not_stop_the_run() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8(temp.path());
    let filename = "tas_Amon_CCSM4_rcp45_r1i1p1_200601-210012.nc";
    let replica_dir = root.join("tree").join(HOST_DIR);
    std::fs::create_dir_all(replica_dir.as_std_path()).unwrap();
    std::fs::write(replica_dir.join(filename).as_std_path(), b"hello").unwrap();
    std::fs::write(
        script_path(&root, "rcp45").as_std_path(),
        entry(filename, HELLO_MD5),
    )
    .unwrap();
    std::fs::write(
        script_path(&root, "historical").as_std_path(),
        format!("{NO_MATCHES}\n"),
    )
    .unwrap();

    let app = app(&root, MockArchive::new(""));
    let result = app
        .reconcile(two_experiment_request(&root), &JsonOutput)
        .unwrap();

    let historical = result
        .experiments
        .iter()
        .find(|listing| listing.experiment == "historical")
        .unwrap();
    assert!(historical.no_matches);
    assert_eq!(historical.accepted, 0);

    let reconciliation = &result.reconciliation;
    let tas = "tas_Amon".parse::<VarMip>().unwrap();
    assert_eq!(
        reconciliation.published_current,
        BTreeSet::from([RequestedCombination::new(tas.clone(), "CCSM4", "rcp45")])
    );
    assert!(reconciliation.published_stale.is_empty());
    assert_eq!(
        reconciliation.not_published,
        BTreeSet::from([RequestedCombination::new(tas, "CCSM4", "historical")])
    );
}

#[test]
fn missing_saved_script_counts_as_empty() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8(temp.path());
    let filename = "tas_Amon_CCSM4_rcp45_r1i1p1_200601-210012.nc";
    std::fs::write(
        script_path(&root, "rcp45").as_std_path(),
        entry(filename, HELLO_MD5),
    )
    .unwrap();

    let app = app(&root, MockArchive::new(""));
    let result = app
        .reconcile(two_experiment_request(&root), &JsonOutput)
        .unwrap();
    let historical = result
        .experiments
        .iter()
        .find(|listing| listing.experiment == "historical")
        .unwrap();
    assert!(!historical.no_matches);
    assert_eq!(historical.candidates, 0);
    assert_eq!(result.reconciliation.published_stale.len(), 1);
    assert_eq!(result.reconciliation.not_published.len(), 1);

    std::fs::remove_file(script_path(&root, "rcp45").as_std_path()).unwrap();
    assert_matches!(
        app.reconcile(two_experiment_request(&root), &JsonOutput),
        Err(ReplicaError::NothingToReconcile(_))
    );
}

#[test]
fn fetch_saves_script_and_reconciles() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8(temp.path());
    let filename = "tas_Amon_CCSM4_rcp45_r1i1p1_200601-210012.nc";
    let app = app(&root, MockArchive::new(entry(filename, HELLO_MD5)));

    let mut request = reconcile_request(&root, &[]);
    request.fetch = true;
    request.output_root = None;
    let result = app.reconcile(request, &JsonOutput).unwrap();

    assert!(script_path(&root, "rcp45").as_std_path().exists());
    assert_eq!(result.reconciliation.requested.len(), 1);
    assert_eq!(result.reconciliation.published_stale.len(), 1);
    assert!(result.reports.is_empty());
}

#[test]
fn search_never_overwrites_scripts() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8(temp.path());
    let archive = MockArchive::new(format!("{NO_MATCHES}\n"));
    let app = app(&root, archive);

    let request = SearchRequest {
        space: space(&["CCSM4"]),
        dir: root.clone(),
    };
    let result = app.search(request.clone(), &JsonOutput).unwrap();
    assert_eq!(result.scripts.len(), 1);
    assert!(result.scripts[0].url.contains("experiment=rcp45"));
    let saved = std::fs::read_to_string(script_path(&root, "rcp45").as_std_path()).unwrap();
    assert!(saved.starts_with(NO_MATCHES));

    assert_matches!(
        app.search(request, &JsonOutput),
        Err(ReplicaError::OutputExists(_))
    );
}

#[test]
fn catalog_then_complete_runs() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8(temp.path());
    let tree = root.join("tree");
    for (ensemble, variable) in [("r1i1p1", "tas"), ("r1i1p1", "pr"), ("r2i1p1", "tas")] {
        let dir = tree.join(format!("CCSM4/rcp45/{ensemble}/v20120101/{variable}"));
        std::fs::create_dir_all(dir.as_std_path()).unwrap();
        std::fs::write(
            dir.join(format!("{variable}_Amon_CCSM4_rcp45_{ensemble}_200601-210012.nc"))
                .as_std_path(),
            b"data",
        )
        .unwrap();
    }
    std::fs::write(tree.join("README").as_std_path(), b"notes").unwrap();

    let app = app(&root, MockArchive::new(""));
    let catalog_path = root.join("CMIP5_database.db");
    let result = app
        .catalog(
            CatalogRequest {
                constraints: ConstraintSet::default(),
                source: PathSource::Walk(tree.clone()),
                output: catalog_path.clone(),
            },
            &JsonOutput,
        )
        .unwrap();
    assert_eq!(result.records, 3);
    assert_eq!(result.stats.malformed, 1);
    assert_eq!(result.persisted.inserted, 3);

    let complete = app
        .complete(
            CompleteRequest {
                catalog: catalog_path,
                required: ["tas_Amon", "pr_Amon"]
                    .into_iter()
                    .map(|key| key.parse().unwrap())
                    .collect(),
                output: Some(root.join("ensembles.csv").to_string()),
            },
            &JsonOutput,
        )
        .unwrap();
    assert_eq!(complete.complete.len(), 1);
    assert_eq!(complete.incomplete.len(), 1);
    let written =
        std::fs::read_to_string(root.join("complete_ensembles.csv").as_std_path()).unwrap();
    assert!(written.contains("CCSM4,rcp45,r1i1p1"));
}

#[test]
fn manifest_source_reads_listing() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8(temp.path());
    let manifest = root.join("paths.txt");
    std::fs::write(
        manifest.as_std_path(),
        concat!(
            "/tree/CCSM4/v20120101/tas/tas_Amon_CCSM4_rcp45_r1i1p1_200601-210012.nc\n",
            "\n",
            "/tree/CCSM4/v20120101/pr/pr_day_CCSM4_rcp45_r1i1p1_20060101-21001231.nc\n",
        ),
    )
    .unwrap();

    let app = app(&root, MockArchive::new(""));
    let output = root.join("catalog.csv");
    let result = app
        .catalog(
            CatalogRequest {
                constraints: ConstraintSet::default().with_frequencies(["day"]),
                source: PathSource::Manifest(manifest),
                output: output.clone(),
            },
            &JsonOutput,
        )
        .unwrap();
    assert_eq!(result.stats.seen, 2);
    assert_eq!(result.stats.filtered, 1);
    assert_eq!(result.records, 1);
    let text = std::fs::read_to_string(output.as_std_path()).unwrap();
    assert!(text.contains("pr,day,CCSM4,rcp45,r1i1p1,v20120101"));
}
