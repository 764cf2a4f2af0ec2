use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{BuildStats, PersistSummary, build_catalog, persist};
use crate::config::ResolvedConfig;
use crate::constraints::ConstraintSet;
use crate::domain::VarMip;
use crate::error::ReplicaError;
use crate::esgf::{ArchiveClient, ScriptListing, SearchQuery, parse_script};
use crate::freshness::Md5Freshness;
use crate::listing::{manifest_lines, walk_paths};
use crate::output::{ReportPaths, render_runs, write_reports};
use crate::reconcile::{
    ModelRun, ReconciliationResult, RemoteRecord, RequestedSpace, collect_remote,
    ensemble_completeness, reconcile,
};
use crate::store::{open_catalog, write_new_atomic};

#[derive(Debug, Clone)]
pub enum PathSource {
    Manifest(Utf8PathBuf),
    Walk(Utf8PathBuf),
}

impl PathSource {
    fn describe(&self) -> String {
        match self {
            PathSource::Manifest(path) => format!("manifest {path}"),
            PathSource::Walk(path) => format!("tree {path}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogRequest {
    pub constraints: ConstraintSet,
    pub source: PathSource,
    pub output: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub space: RequestedSpace,
    pub dir: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    pub space: RequestedSpace,
    pub dir: Utf8PathBuf,
    pub fetch: bool,
    pub output_root: Option<String>,
    pub table: bool,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CompleteRequest {
    pub catalog: Utf8PathBuf,
    pub required: BTreeSet<VarMip>,
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogResult {
    pub generated_at: String,
    pub source: String,
    pub output: String,
    pub stats: BuildStats,
    pub records: usize,
    pub persisted: PersistSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub scripts: Vec<SearchItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchItem {
    pub experiment: String,
    pub url: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentListing {
    pub experiment: String,
    pub no_matches: bool,
    pub candidates: usize,
    pub accepted: usize,
    pub rejected_lines: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileResult {
    pub generated_at: String,
    pub experiments: Vec<ExperimentListing>,
    pub rejected_lines: usize,
    pub reconciliation: ReconciliationResult,
    pub reports: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteResult {
    pub required: Vec<String>,
    pub complete: BTreeSet<ModelRun>,
    pub incomplete: BTreeSet<ModelRun>,
    pub reports: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<A: ArchiveClient> {
    config: ResolvedConfig,
    archive: A,
    freshness: Md5Freshness,
}

impl<A: ArchiveClient> App<A> {
    pub fn new(config: ResolvedConfig, archive: A) -> Self {
        let freshness = Md5Freshness::new(config.replica_root.clone(), config.checksum_policy());
        Self {
            config,
            archive,
            freshness,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Builds the ensemble catalog from a path listing and stores the rows not yet present.
    pub fn catalog(
        &self,
        request: CatalogRequest,
        sink: &dyn ProgressSink,
    ) -> Result<CatalogResult, ReplicaError> {
        let started = Instant::now();
        if request.constraints.is_unconstrained() {
            info!("no constraints, cataloguing everything");
        }
        sink.event(ProgressEvent {
            message: format!("phase=Scan; reading {}", request.source.describe()),
            elapsed: None,
        });

        let paths: Box<dyn Iterator<Item = Result<String, ReplicaError>>> = match &request.source
        {
            PathSource::Manifest(path) => Box::new(manifest_lines(path)?),
            PathSource::Walk(root) => Box::new(walk_paths(root)),
        };
        let mut read_error = None;
        let catalog = build_catalog(
            paths.map_while(|line| match line {
                Ok(line) => Some(line),
                Err(err) => {
                    read_error = Some(err);
                    None
                }
            }),
            &request.constraints,
        );
        if let Some(err) = read_error {
            return Err(err);
        }
        let stats = catalog.stats();
        info!(
            seen = stats.seen,
            malformed = stats.malformed,
            records = catalog.len(),
            "catalog built"
        );

        sink.event(ProgressEvent {
            message: format!("phase=Store; writing {} records", catalog.len()),
            elapsed: Some(started.elapsed()),
        });
        let mut store = open_catalog(&request.output)?;
        let persisted = persist(&catalog, store.as_mut())?;

        Ok(CatalogResult {
            generated_at: Utc::now().to_rfc3339(),
            source: request.source.describe(),
            output: request.output.to_string(),
            stats,
            records: catalog.len(),
            persisted,
        })
    }

    /// Downloads one wget script per experiment into `request.dir`.
    pub fn search(
        &self,
        request: SearchRequest,
        sink: &dyn ProgressSink,
    ) -> Result<SearchResult, ReplicaError> {
        let targets = request
            .space
            .experiments
            .iter()
            .map(|experiment| (experiment, script_path(&request.dir, experiment)))
            .collect::<Vec<_>>();
        if let Some((_, path)) = targets.iter().find(|(_, path)| path.as_std_path().exists()) {
            return Err(ReplicaError::OutputExists(path.to_string()));
        }

        let mut scripts = Vec::new();
        for (experiment, path) in targets {
            let query = self.query(&request.space, experiment);
            let url = query.url(self.config.node)?;
            sink.event(ProgressEvent {
                message: format!("phase=Search; {experiment} via {url}"),
                elapsed: None,
            });
            let text = self.archive.fetch_script(&query)?;
            write_new_atomic(&path, text.as_bytes())?;
            scripts.push(SearchItem {
                experiment: experiment.clone(),
                url: url.to_string(),
                path: path.to_string(),
            });
        }
        Ok(SearchResult { scripts })
    }

    /// Classifies every requested combination as current, stale or not published.
    pub fn reconcile(
        &self,
        request: ReconcileRequest,
        sink: &dyn ProgressSink,
    ) -> Result<ReconcileResult, ReplicaError> {
        let started = Instant::now();
        if let Some(root) = &request.output_root {
            let paths = ReportPaths::new(root);
            for path in [&paths.replica, &paths.to_download, &paths.not_published] {
                if path.as_std_path().exists() {
                    return Err(ReplicaError::OutputExists(path.to_string()));
                }
            }
        }

        let mut catalog = BTreeMap::<String, RemoteRecord>::new();
        let mut experiments = Vec::new();
        for experiment in &request.space.experiments {
            let listing = match self.script_text(&request, experiment)? {
                Some(text) => parse_script(&text),
                None => ScriptListing::default(),
            };
            if listing.no_matches {
                warn!(experiment = experiment.as_str(), "no files matched the query");
            }
            let rejected_lines = listing.rejected.len();
            let stats = collect_remote(listing.files, &request.space, &mut catalog);
            let accepted = stats.accepted();
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Parse; {experiment}: {accepted} files, {rejected_lines} rejected lines"
                ),
                elapsed: Some(started.elapsed()),
            });
            experiments.push(ExperimentListing {
                experiment: experiment.clone(),
                no_matches: listing.no_matches,
                candidates: stats.candidates,
                accepted,
                rejected_lines,
            });
        }

        if experiments.iter().all(|listing| listing.accepted == 0) {
            let names = request
                .space
                .experiments
                .iter()
                .cloned()
                .collect::<Vec<_>>();
            return Err(ReplicaError::NothingToReconcile(names.join(", ")));
        }

        let workers = request.workers.unwrap_or(self.config.workers).max(1);
        sink.event(ProgressEvent {
            message: format!("phase=Verify; checking {} files on {workers} workers", catalog.len()),
            elapsed: Some(started.elapsed()),
        });
        let reconciliation = reconcile(&request.space, &catalog, &self.freshness, workers);

        let reports = match &request.output_root {
            Some(root) => {
                let written = write_reports(
                    &reconciliation,
                    root,
                    &self.config.replica_root,
                    request.table,
                )?;
                written.into_iter().map(|path| path.to_string()).collect()
            }
            None => Vec::new(),
        };
        sink.event(ProgressEvent {
            message: "phase=Report; done".to_string(),
            elapsed: Some(started.elapsed()),
        });

        Ok(ReconcileResult {
            generated_at: Utc::now().to_rfc3339(),
            rejected_lines: experiments.iter().map(|listing| listing.rejected_lines).sum(),
            experiments,
            reconciliation,
            reports,
        })
    }

    /// Lists the model runs of a stored catalog that hold every required variable.
    pub fn complete(
        &self,
        request: CompleteRequest,
        sink: &dyn ProgressSink,
    ) -> Result<CompleteResult, ReplicaError> {
        if !request.catalog.as_std_path().exists() {
            return Err(ReplicaError::Filesystem(format!(
                "catalog not found: {}",
                request.catalog
            )));
        }
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; reading {}", request.catalog),
            elapsed: None,
        });
        let store = open_catalog(&request.catalog)?;
        let records = store.records()?;
        let completeness = ensemble_completeness(&records, &request.required);

        let mut reports = Vec::new();
        if let Some(name) = &request.output {
            let output = Utf8Path::new(name);
            let parent = output.parent().unwrap_or(Utf8Path::new(""));
            let file_name = output.file_name().unwrap_or("ensembles.csv");
            let complete_path = parent.join(format!("complete_{file_name}"));
            let incomplete_path = parent.join(format!("not_complete_{file_name}"));
            for path in [&complete_path, &incomplete_path] {
                if path.as_std_path().exists() {
                    return Err(ReplicaError::OutputExists(path.to_string()));
                }
            }
            write_new_atomic(&complete_path, &render_runs(&completeness.complete)?)?;
            write_new_atomic(&incomplete_path, &render_runs(&completeness.incomplete)?)?;
            reports.push(complete_path.to_string());
            reports.push(incomplete_path.to_string());
        }

        Ok(CompleteResult {
            required: request.required.iter().map(ToString::to_string).collect(),
            complete: completeness.complete,
            incomplete: completeness.incomplete,
            reports,
        })
    }

    fn query(&self, space: &RequestedSpace, experiment: &str) -> SearchQuery {
        SearchQuery {
            experiment: experiment.to_string(),
            var_mips: space.var_mips.clone(),
            models: space.models.clone(),
            limit: self.config.search_limit,
        }
    }

    fn script_text(
        &self,
        request: &ReconcileRequest,
        experiment: &str,
    ) -> Result<Option<String>, ReplicaError> {
        let path = script_path(&request.dir, experiment);
        if !request.fetch {
            if !path.as_std_path().exists() {
                warn!(path = path.as_str(), "no saved script, treating experiment as empty");
                return Ok(None);
            }
            return fs::read_to_string(path.as_std_path())
                .map(Some)
                .map_err(|err| ReplicaError::Filesystem(format!("read {path}: {err}")));
        }

        let text = self
            .archive
            .fetch_script(&self.query(&request.space, experiment))?;
        if path.as_std_path().exists() {
            warn!(path = path.as_str(), "keeping existing script, not overwriting");
        } else {
            write_new_atomic(&path, text.as_bytes())?;
        }
        Ok(Some(text))
    }
}

pub fn script_path(dir: &Utf8Path, experiment: &str) -> Utf8PathBuf {
    dir.join(format!("wget_{experiment}.out"))
}
