use std::collections::BTreeSet;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use csv::WriterBuilder;
use serde::Serialize;

use crate::app::{CatalogResult, CompleteResult, ReconcileResult, SearchResult};
use crate::error::ReplicaError;
use crate::freshness::local_path;
use crate::reconcile::{ModelRun, ReconciliationResult, ResultMatrix};
use crate::store::write_new_atomic;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_catalog(result: &CatalogResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_search(result: &SearchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_reconcile(result: &ReconcileResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_complete(result: &CompleteResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl crate::app::ProgressSink for JsonOutput {
    fn event(&self, _event: crate::app::ProgressEvent) {}
}

/// Report files of one reconciliation run, all named after `root`.
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub replica: Utf8PathBuf,
    pub to_download: Utf8PathBuf,
    pub not_published: Utf8PathBuf,
}

impl ReportPaths {
    pub fn new(root: &str) -> Self {
        Self {
            replica: Utf8PathBuf::from(format!("{root}_replica.csv")),
            to_download: Utf8PathBuf::from(format!("{root}_to_download.csv")),
            not_published: Utf8PathBuf::from(format!("{root}_not_published.csv")),
        }
    }

    pub fn table(root: &str, experiment: &str) -> Utf8PathBuf {
        let parent = Utf8Path::new(root)
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_default();
        parent.join(format!("{experiment}.csv"))
    }
}

/// Writes the replica, download and not-published lists, plus one table per
/// experiment when `table` is set. Nothing is written if any target exists.
pub fn write_reports(
    result: &ReconciliationResult,
    root: &str,
    replica_root: &Utf8Path,
    table: bool,
) -> Result<Vec<Utf8PathBuf>, ReplicaError> {
    let paths = ReportPaths::new(root);
    let matrix = result.matrix();

    let mut outputs = vec![
        (paths.replica, render_replicas(result, replica_root)?),
        (paths.to_download, render_downloads(result)?),
        (paths.not_published, render_not_published(result)?),
    ];
    if table {
        for experiment in matrix.experiments.keys() {
            outputs.push((
                ReportPaths::table(root, experiment),
                render_table(&matrix, experiment)?,
            ));
        }
    }

    if let Some((path, _)) = outputs
        .iter()
        .find(|(path, _)| path.as_std_path().exists())
    {
        return Err(ReplicaError::OutputExists(path.to_string()));
    }
    for (path, content) in &outputs {
        write_new_atomic(path, content)?;
    }
    Ok(outputs.into_iter().map(|(path, _)| path).collect())
}

pub fn render_replicas(
    result: &ReconciliationResult,
    replica_root: &Utf8Path,
) -> Result<Vec<u8>, ReplicaError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record([
            "var",
            "mip_table",
            "model",
            "experiment",
            "ensemble",
            "version",
            "filepath",
        ])
        .map_err(csv_error)?;
    for status in result.replicas() {
        let record = &status.record;
        let path = local_path(replica_root, &record.file);
        writer
            .write_record([
                record.variable.as_str(),
                record.mip_table.as_str(),
                record.model.as_str(),
                record.experiment.as_str(),
                record.ensemble.as_str(),
                record.version.as_str(),
                path.as_str(),
            ])
            .map_err(csv_error)?;
    }
    finish(writer)
}

pub fn render_downloads(result: &ReconciliationResult) -> Result<Vec<u8>, ReplicaError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record([
            "var",
            "mip_table",
            "model",
            "experiment",
            "ensemble",
            "version",
            "file_url",
        ])
        .map_err(csv_error)?;
    for status in result.downloads() {
        let record = &status.record;
        writer
            .write_record([
                record.variable.as_str(),
                record.mip_table.as_str(),
                record.model.as_str(),
                record.experiment.as_str(),
                record.ensemble.as_str(),
                record.version.as_str(),
                record.file.url().as_str(),
            ])
            .map_err(csv_error)?;
    }
    finish(writer)
}

pub fn render_not_published(result: &ReconciliationResult) -> Result<Vec<u8>, ReplicaError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(["var_mip-table", "model", "experiment"])
        .map_err(csv_error)?;
    for combo in &result.not_published {
        writer
            .write_record([
                combo.var_mip.to_string().as_str(),
                combo.model.as_str(),
                combo.experiment.as_str(),
            ])
            .map_err(csv_error)?;
    }
    finish(writer)
}

/// One row per model/ensemble, one column per variable; `NP` marks nothing published.
pub fn render_table(matrix: &ResultMatrix, experiment: &str) -> Result<Vec<u8>, ReplicaError> {
    let columns = matrix.experiments.get(experiment);
    let unpublished = matrix.unpublished.get(experiment);

    let mut header = vec!["model_ensemble/variable".to_string()];
    if let Some(columns) = columns {
        header.extend(columns.keys().map(ToString::to_string));
    }
    if let Some(unpublished) = unpublished {
        header.extend(unpublished.iter().map(ToString::to_string));
    }

    let rows = columns
        .into_iter()
        .flat_map(|columns| columns.values())
        .flatten()
        .map(|group| (group.model.clone(), group.ensemble.clone()))
        .collect::<BTreeSet<_>>();

    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(&header).map_err(csv_error)?;
    for (model, ensemble) in rows {
        let mut line = vec![format!("{model}_{ensemble}")];
        for groups in columns.into_iter().flat_map(|columns| columns.values()) {
            let cells = groups
                .iter()
                .filter(|group| group.model == model && group.ensemble == ensemble)
                .map(|group| {
                    format!(
                        "{}  {} files ({} to update)",
                        group.version, group.files, group.stale
                    )
                })
                .collect::<Vec<_>>();
            line.push(if cells.is_empty() {
                "NP".to_string()
            } else {
                cells.join(" ")
            });
        }
        line.extend(unpublished.into_iter().flatten().map(|_| "NP".to_string()));
        writer.write_record(&line).map_err(csv_error)?;
    }
    finish(writer)
}

pub fn render_runs(runs: &BTreeSet<ModelRun>) -> Result<Vec<u8>, ReplicaError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(["model", "experiment", "ensemble"])
        .map_err(csv_error)?;
    for run in runs {
        writer
            .write_record([
                run.model.as_str(),
                run.experiment.as_str(),
                run.ensemble.as_str(),
            ])
            .map_err(csv_error)?;
    }
    finish(writer)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, ReplicaError> {
    writer
        .into_inner()
        .map_err(|err| ReplicaError::Csv(err.to_string()))
}

fn csv_error(err: csv::Error) -> ReplicaError {
    ReplicaError::Csv(err.to_string())
}
