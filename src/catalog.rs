use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constraints::ConstraintSet;
use crate::domain::{VarMip, VersionSentinel, parse_identifier};
use crate::error::ReplicaError;

/// One ensemble directory of the replica tree. `id` is the directory path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnsembleRecord {
    pub id: String,
    pub variable: String,
    pub mip_table: String,
    pub model: String,
    pub experiment: String,
    pub ensemble: String,
    pub version: String,
}

impl EnsembleRecord {
    pub fn var_mip(&self) -> VarMip {
        VarMip::new(&self.variable, &self.mip_table)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub seen: usize,
    pub malformed: usize,
    pub filtered: usize,
    pub accepted: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    records: BTreeSet<EnsembleRecord>,
    stats: BuildStats,
}

impl Catalog {
    pub fn records(&self) -> &BTreeSet<EnsembleRecord> {
        &self.records
    }

    pub fn stats(&self) -> BuildStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Single pass over `paths`, keeping one record per distinct ensemble tuple.
pub fn build_catalog<I, S>(paths: I, constraints: &ConstraintSet) -> Catalog
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut catalog = Catalog::default();
    for path in paths {
        let path = path.as_ref().trim();
        if path.is_empty() {
            continue;
        }
        catalog.stats.seen += 1;

        let Some(identifier) = parse_identifier(path) else {
            debug!(path, "skipping non-conforming file name");
            catalog.stats.malformed += 1;
            continue;
        };
        if !constraints.matches(&identifier) {
            catalog.stats.filtered += 1;
            continue;
        }

        catalog.stats.accepted += 1;
        let version = identifier.version(VersionSentinel::Catalog);
        catalog.records.insert(EnsembleRecord {
            id: identifier.path,
            variable: identifier.variable,
            mip_table: identifier.mip_table,
            model: identifier.model,
            experiment: identifier.experiment,
            ensemble: identifier.ensemble,
            version,
        });
    }
    catalog
}

/// Destination for catalog rows keyed by [`EnsembleRecord::id`].
pub trait CatalogSink {
    /// Returns `false` without writing when the id is already stored.
    fn insert_if_absent(&mut self, record: &EnsembleRecord) -> Result<bool, ReplicaError>;
    fn records(&self) -> Result<Vec<EnsembleRecord>, ReplicaError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistSummary {
    pub inserted: usize,
    pub skipped: usize,
}

pub fn persist<S: CatalogSink + ?Sized>(
    catalog: &Catalog,
    sink: &mut S,
) -> Result<PersistSummary, ReplicaError> {
    let mut summary = PersistSummary::default();
    for record in catalog.records() {
        if sink.insert_if_absent(record)? {
            summary.inserted += 1;
        } else {
            debug!(id = record.id.as_str(), "already catalogued");
            summary.skipped += 1;
        }
    }
    Ok(summary)
}
