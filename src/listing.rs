//! Sources of candidate file paths for the catalog: a newline-delimited
//! manifest of the replica tree or a live walk of a directory.

use std::fs::File;
use std::io::{BufRead, BufReader};

use camino::Utf8Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::ReplicaError;

/// Lazily yields the non-empty, trimmed lines of a manifest file.
pub fn manifest_lines(
    path: &Utf8Path,
) -> Result<impl Iterator<Item = Result<String, ReplicaError>> + use<>, ReplicaError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| ReplicaError::Filesystem(format!("open manifest {path}: {err}")))?;
    Ok(read_lines(BufReader::new(file)))
}

pub fn read_lines<R: BufRead>(reader: R) -> impl Iterator<Item = Result<String, ReplicaError>> {
    reader.lines().filter_map(|line| match line {
        Ok(line) => {
            let trimmed = line.trim();
            (!trimmed.is_empty()).then(|| Ok(trimmed.to_string()))
        }
        Err(err) => Some(Err(ReplicaError::Filesystem(err.to_string()))),
    })
}

/// Yields every regular file below `root`, following no symlinks.
pub fn walk_paths(
    root: &Utf8Path,
) -> impl Iterator<Item = Result<String, ReplicaError>> + use<> {
    WalkDir::new(root.as_std_path())
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) if entry.file_type().is_file() => match entry.path().to_str() {
                Some(path) => Some(Ok(path.to_string())),
                None => {
                    debug!(path = %entry.path().display(), "skipping non UTF-8 path");
                    None
                }
            },
            Ok(_) => None,
            Err(err) => Some(Err(ReplicaError::Filesystem(err.to_string()))),
        })
}
