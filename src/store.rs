use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use csv::{ReaderBuilder, WriterBuilder};
use rusqlite::{Connection, OptionalExtension, params};
use tempfile::Builder;

use crate::catalog::{CatalogSink, EnsembleRecord};
use crate::error::ReplicaError;

const CSV_HEADER: [&str; 7] = [
    "id",
    "variable",
    "mip_table",
    "model",
    "experiment",
    "ensemble",
    "version",
];

/// Opens the catalog store matching the file extension: SQLite for `.db`/`.sqlite`, CSV otherwise.
pub fn open_catalog(path: &Utf8Path) -> Result<Box<dyn CatalogSink>, ReplicaError> {
    match path.extension() {
        Some("db") | Some("sqlite") => Ok(Box::new(SqliteCatalog::open(path)?)),
        _ => Ok(Box::new(CsvCatalog::open(path)?)),
    }
}

pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    pub fn open(path: &Utf8Path) -> Result<Self, ReplicaError> {
        ensure_parent(path)?;
        let conn = Connection::open(path.as_std_path()).map_err(database)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cmip5 (
                id TEXT PRIMARY KEY,
                variable TEXT,
                mip TEXT,
                model TEXT,
                experiment TEXT,
                ensemble TEXT,
                version TEXT
            );",
        )
        .map_err(database)?;
        Ok(Self { conn })
    }

    pub fn contains(&self, id: &str) -> Result<bool, ReplicaError> {
        self.conn
            .query_row("SELECT 1 FROM cmip5 WHERE id = ?1", params![id], |_| Ok(()))
            .optional()
            .map(|row| row.is_some())
            .map_err(database)
    }
}

impl CatalogSink for SqliteCatalog {
    fn insert_if_absent(&mut self, record: &EnsembleRecord) -> Result<bool, ReplicaError> {
        if self.contains(&record.id)? {
            return Ok(false);
        }
        let changed = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO cmip5
                    (id, variable, mip, model, experiment, ensemble, version)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.variable,
                    record.mip_table,
                    record.model,
                    record.experiment,
                    record.ensemble,
                    record.version
                ],
            )
            .map_err(database)?;
        Ok(changed == 1)
    }

    fn records(&self) -> Result<Vec<EnsembleRecord>, ReplicaError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, variable, mip, model, experiment, ensemble, version
                 FROM cmip5 ORDER BY id",
            )
            .map_err(database)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(EnsembleRecord {
                    id: row.get(0)?,
                    variable: row.get(1)?,
                    mip_table: row.get(2)?,
                    model: row.get(3)?,
                    experiment: row.get(4)?,
                    ensemble: row.get(5)?,
                    version: row.get(6)?,
                })
            })
            .map_err(database)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(database)
    }
}

/// Flat-file catalog. Ids already in the file are loaded on open so reruns only append new rows.
pub struct CsvCatalog {
    path: Utf8PathBuf,
    ids: HashSet<String>,
    writer: csv::Writer<BufWriter<File>>,
}

impl CsvCatalog {
    pub fn open(path: &Utf8Path) -> Result<Self, ReplicaError> {
        ensure_parent(path)?;
        let existing = if path.as_std_path().exists() {
            read_csv_records(path)?
        } else {
            Vec::new()
        };
        let needs_header = fs::metadata(path.as_std_path())
            .map(|meta| meta.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path.as_std_path())
            .map_err(|err| ReplicaError::Filesystem(format!("open {path}: {err}")))?;
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        if needs_header {
            writer.write_record(CSV_HEADER).map_err(csv_error)?;
            writer.flush().map_err(|err| ReplicaError::Csv(err.to_string()))?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            ids: existing.into_iter().map(|record| record.id).collect(),
            writer,
        })
    }
}

impl CatalogSink for CsvCatalog {
    fn insert_if_absent(&mut self, record: &EnsembleRecord) -> Result<bool, ReplicaError> {
        if self.ids.contains(&record.id) {
            return Ok(false);
        }
        self.writer
            .write_record([
                &record.id,
                &record.variable,
                &record.mip_table,
                &record.model,
                &record.experiment,
                &record.ensemble,
                &record.version,
            ])
            .map_err(csv_error)?;
        self.writer
            .flush()
            .map_err(|err| ReplicaError::Csv(err.to_string()))?;
        self.ids.insert(record.id.clone());
        Ok(true)
    }

    fn records(&self) -> Result<Vec<EnsembleRecord>, ReplicaError> {
        read_csv_records(&self.path)
    }
}

fn read_csv_records(path: &Utf8Path) -> Result<Vec<EnsembleRecord>, ReplicaError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path.as_std_path())
        .map_err(csv_error)?;
    reader
        .deserialize::<EnsembleRecord>()
        .map(|row| row.map_err(csv_error))
        .collect()
}

/// Writes `content` to a new file at `path`, never replacing an existing one.
pub fn write_new_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), ReplicaError> {
    if path.as_std_path().exists() {
        return Err(ReplicaError::OutputExists(path.to_string()));
    }
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| ReplicaError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".cmip-replica")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| ReplicaError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| ReplicaError::Filesystem(err.to_string()))?;
    temp.persist_noclobber(path.as_std_path())
        .map_err(|err| match err.error.kind() {
            std::io::ErrorKind::AlreadyExists => ReplicaError::OutputExists(path.to_string()),
            _ => ReplicaError::Filesystem(err.error.to_string()),
        })?;
    Ok(())
}

fn ensure_parent(path: &Utf8Path) -> Result<(), ReplicaError> {
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| ReplicaError::Filesystem(err.to_string()))?;
        }
    }
    Ok(())
}

fn database(err: rusqlite::Error) -> ReplicaError {
    ReplicaError::Database(err.to_string())
}

fn csv_error(err: csv::Error) -> ReplicaError {
    ReplicaError::Csv(err.to_string())
}
