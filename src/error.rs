use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ReplicaError {
    #[error("invalid variable/table key (expected var_table, e.g. tas_Amon): {0}")]
    InvalidVarMip(String),

    #[error("invalid search node: {0}")]
    InvalidNode(String),

    #[error("config file not found: {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("ESGF request failed: {0}")]
    EsgfHttp(String),

    #[error("ESGF returned status {status}: {message}")]
    EsgfStatus { status: u16, message: String },

    #[error("catalog database error: {0}")]
    Database(String),

    #[error("csv error: {0}")]
    Csv(String),

    #[error("refusing to overwrite existing output file: {0}")]
    #[diagnostic(help("remove the file or choose another output name"))]
    OutputExists(String),

    #[error("no files found for any of the experiments: {0}")]
    NothingToReconcile(String),
}
