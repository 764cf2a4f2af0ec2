use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use regex::Regex;

use crate::error::ReplicaError;

/// Publication versions look like `v20130101` or `20120314`; only 2010-2019 dates occur.
static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-z]*201[0-9][01][0-9][0-3][0-9]").expect("version pattern is valid")
});

/// Placeholder stored when no directory segment carries a version.
///
/// The local catalog and the remote reconciliation historically use different
/// placeholders and downstream consumers rely on both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSentinel {
    Catalog,
    Remote,
}

impl VersionSentinel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionSentinel::Catalog => "not_specified",
            VersionSentinel::Remote => "no_version",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Variable,
    MipTable,
    Model,
    Experiment,
    Ensemble,
}

/// Dataset identity decoded from a `variable_miptable_model_experiment_ensemble[_period].ext` name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentifier {
    pub variable: String,
    pub mip_table: String,
    pub model: String,
    pub experiment: String,
    pub ensemble: String,
    /// Directory holding the file, without the file name.
    pub path: String,
}

impl FileIdentifier {
    pub fn field(&self, field: Field) -> &str {
        match field {
            Field::Variable => &self.variable,
            Field::MipTable => &self.mip_table,
            Field::Model => &self.model,
            Field::Experiment => &self.experiment,
            Field::Ensemble => &self.ensemble,
        }
    }

    pub fn var_mip(&self) -> VarMip {
        VarMip {
            variable: self.variable.clone(),
            mip_table: self.mip_table.clone(),
        }
    }

    pub fn version(&self, sentinel: VersionSentinel) -> String {
        find_version(self.path.split('/'), sentinel)
    }
}

/// Parses the last segment of `path` into a [`FileIdentifier`].
///
/// Returns `None` for names with fewer than five underscore-separated segments.
pub fn parse_identifier(path: &str) -> Option<FileIdentifier> {
    let path = path.trim();
    let (directory, filename) = match path.rsplit_once('/') {
        Some((directory, filename)) => (directory, filename),
        None => ("", path),
    };
    let filename = filename.replace(['\'', '"'], "");
    let segments = filename.split('_').collect::<Vec<_>>();
    if segments.len() < 5 {
        return None;
    }

    // Time-invariant files have no period segment, so the extension sticks to the ensemble.
    let ensemble = segments[4].split('.').next().unwrap_or_default();

    Some(FileIdentifier {
        variable: segments[0].to_string(),
        mip_table: segments[1].to_string(),
        model: segments[2].to_string(),
        experiment: segments[3].to_string(),
        ensemble: ensemble.to_string(),
        path: directory.replace(['\'', '"'], ""),
    })
}

/// Returns the first directory segment that looks like a publication version.
pub fn find_version<I, S>(segments: I, sentinel: VersionSentinel) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    segments
        .into_iter()
        .find(|segment| VERSION_PATTERN.is_match(segment.as_ref()))
        .map(|segment| segment.as_ref().to_string())
        .unwrap_or_else(|| sentinel.as_str().to_string())
}

/// Compound `variable_miptable` key, e.g. `tas_Amon`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VarMip {
    pub variable: String,
    pub mip_table: String,
}

impl VarMip {
    pub fn new(variable: impl Into<String>, mip_table: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            mip_table: mip_table.into(),
        }
    }
}

impl fmt::Display for VarMip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.variable, self.mip_table)
    }
}

impl FromStr for VarMip {
    type Err = ReplicaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (variable, mip_table) = trimmed
            .split_once('_')
            .ok_or_else(|| ReplicaError::InvalidVarMip(value.to_string()))?;
        if variable.is_empty() || mip_table.is_empty() || mip_table.contains('_') {
            return Err(ReplicaError::InvalidVarMip(value.to_string()));
        }
        Ok(Self::new(variable, mip_table))
    }
}

impl TryFrom<String> for VarMip {
    type Error = ReplicaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VarMip> for String {
    fn from(value: VarMip) -> Self {
        value.to_string()
    }
}

/// One file entry advertised by the remote archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RemoteFile {
    pub filename: String,
    /// Archive location with the URL scheme removed (`host/path/file.nc`).
    pub location: String,
    pub checksum: String,
}

impl RemoteFile {
    pub fn url(&self) -> String {
        format!("http://{}", self.location)
    }
}
