//! Reconciliation of requested `(var_mip, model, experiment)` combinations
//! against what the archive publishes and what the replica already holds.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::EnsembleRecord;
use crate::constraints::ConstraintSet;
use crate::domain::{RemoteFile, VarMip, VersionSentinel, find_version, parse_identifier};
use crate::freshness::{Freshness, FreshnessCheck, assess};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RequestedCombination {
    pub var_mip: VarMip,
    pub model: String,
    pub experiment: String,
}

impl RequestedCombination {
    pub fn new(var_mip: VarMip, model: impl Into<String>, experiment: impl Into<String>) -> Self {
        Self {
            var_mip,
            model: model.into(),
            experiment: experiment.into(),
        }
    }
}

/// Requested variables, models and experiments. No models means every model the archive returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestedSpace {
    pub var_mips: BTreeSet<VarMip>,
    pub models: BTreeSet<String>,
    pub experiments: BTreeSet<String>,
}

impl RequestedSpace {
    pub fn new<V, M, E>(var_mips: V, models: M, experiments: E) -> Self
    where
        V: IntoIterator<Item = VarMip>,
        M: IntoIterator<Item = String>,
        E: IntoIterator<Item = String>,
    {
        Self {
            var_mips: var_mips.into_iter().collect(),
            models: models.into_iter().collect(),
            experiments: experiments.into_iter().collect(),
        }
    }

    /// Cartesian product of the request, with the model axis taken from
    /// `observed_models` when no model was requested.
    pub fn combinations(
        &self,
        observed_models: &BTreeSet<String>,
    ) -> BTreeSet<RequestedCombination> {
        let models = if self.models.is_empty() {
            observed_models
        } else {
            &self.models
        };
        let mut combinations = BTreeSet::new();
        for var_mip in &self.var_mips {
            for model in models {
                for experiment in &self.experiments {
                    combinations.insert(RequestedCombination::new(
                        var_mip.clone(),
                        model.clone(),
                        experiment.clone(),
                    ));
                }
            }
        }
        combinations
    }

    /// Filter applied to archive listings before reconciliation.
    pub fn constraints(&self) -> ConstraintSet {
        let mut constraints = ConstraintSet::from_var_mips(&self.var_mips);
        constraints.model = self.models.clone();
        constraints.experiment = self.experiments.clone();
        constraints
    }
}

/// A published file together with the dataset identity decoded from its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteRecord {
    pub variable: String,
    pub mip_table: String,
    pub model: String,
    pub experiment: String,
    pub ensemble: String,
    pub version: String,
    pub file: RemoteFile,
}

impl RemoteRecord {
    pub fn from_remote(file: RemoteFile) -> Option<Self> {
        let identifier = parse_identifier(&file.filename)?;
        let directory = file
            .location
            .rsplit_once('/')
            .map(|(directory, _)| directory)
            .unwrap_or_default();
        let version = find_version(directory.split('/'), VersionSentinel::Remote);
        Some(Self {
            variable: identifier.variable,
            mip_table: identifier.mip_table,
            model: identifier.model,
            experiment: identifier.experiment,
            ensemble: identifier.ensemble,
            version,
            file,
        })
    }

    pub fn var_mip(&self) -> VarMip {
        VarMip::new(&self.variable, &self.mip_table)
    }

    pub fn combination(&self) -> RequestedCombination {
        RequestedCombination::new(self.var_mip(), &self.model, &self.experiment)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectStats {
    pub candidates: usize,
    pub malformed: usize,
    pub filtered: usize,
}

impl CollectStats {
    pub fn accepted(&self) -> usize {
        self.candidates - self.malformed - self.filtered
    }
}

/// Archive files of the requested space keyed by location.
///
/// A file is kept only when its exact `var_mip` pair was requested; the
/// variable and table groups alone would also admit crossed pairs.
pub fn collect_remote<I>(
    files: I,
    space: &RequestedSpace,
    catalog: &mut BTreeMap<String, RemoteRecord>,
) -> CollectStats
where
    I: IntoIterator<Item = RemoteFile>,
{
    let constraints = space.constraints();
    let mut stats = CollectStats::default();
    for file in files {
        stats.candidates += 1;
        let Some(identifier) = parse_identifier(&file.filename) else {
            debug!(filename = file.filename.as_str(), "skipping non-conforming file name");
            stats.malformed += 1;
            continue;
        };
        if !constraints.matches(&identifier) || !space.var_mips.contains(&identifier.var_mip()) {
            stats.filtered += 1;
            continue;
        }
        if let Some(record) = RemoteRecord::from_remote(file) {
            catalog.insert(record.file.location.clone(), record);
        }
    }
    stats
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub record: RemoteRecord,
    pub freshness: Freshness,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub requested: BTreeSet<RequestedCombination>,
    pub published_current: BTreeSet<RequestedCombination>,
    pub published_stale: BTreeSet<RequestedCombination>,
    pub not_published: BTreeSet<RequestedCombination>,
    pub files: Vec<FileStatus>,
}

impl ReconciliationResult {
    pub fn replicas(&self) -> impl Iterator<Item = &FileStatus> {
        self.files
            .iter()
            .filter(|status| status.freshness == Freshness::Current)
    }

    pub fn downloads(&self) -> impl Iterator<Item = &FileStatus> {
        self.files
            .iter()
            .filter(|status| status.freshness == Freshness::Stale)
    }

    pub fn published(&self) -> impl Iterator<Item = &RequestedCombination> {
        self.published_current
            .iter()
            .chain(self.published_stale.iter())
    }

    /// Per experiment, `var_mip -> [(model, ensemble, version) status]` for published
    /// combinations, plus the variables never published for that experiment.
    pub fn matrix(&self) -> ResultMatrix {
        let mut experiments = BTreeMap::<String, BTreeMap<VarMip, Vec<GroupStatus>>>::new();
        let mut groups =
            BTreeMap::<(String, VarMip), BTreeMap<(String, String, String), (usize, usize)>>::new();

        for status in &self.files {
            let record = &status.record;
            let counts = groups
                .entry((record.experiment.clone(), record.var_mip()))
                .or_default()
                .entry((
                    record.model.clone(),
                    record.ensemble.clone(),
                    record.version.clone(),
                ))
                .or_default();
            counts.0 += 1;
            if status.freshness == Freshness::Stale {
                counts.1 += 1;
            }
        }

        for experiment in self.requested.iter().map(|combo| &combo.experiment) {
            experiments.entry(experiment.clone()).or_default();
        }
        for ((experiment, var_mip), keys) in groups {
            let rows = keys
                .into_iter()
                .map(|((model, ensemble, version), (files, stale))| GroupStatus {
                    model,
                    ensemble,
                    version,
                    files,
                    stale,
                })
                .collect();
            experiments
                .entry(experiment)
                .or_default()
                .insert(var_mip, rows);
        }

        let mut unpublished = BTreeMap::<String, BTreeSet<VarMip>>::new();
        for combo in &self.not_published {
            let published_here = experiments
                .get(&combo.experiment)
                .is_some_and(|columns| columns.contains_key(&combo.var_mip));
            if !published_here {
                unpublished
                    .entry(combo.experiment.clone())
                    .or_default()
                    .insert(combo.var_mip.clone());
            }
        }

        ResultMatrix {
            experiments,
            unpublished,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStatus {
    pub model: String,
    pub ensemble: String,
    pub version: String,
    pub files: usize,
    pub stale: usize,
}

impl GroupStatus {
    pub fn summary(&self) -> String {
        format!(
            "{}  {} files, {} to update",
            self.version, self.files, self.stale
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultMatrix {
    pub experiments: BTreeMap<String, BTreeMap<VarMip, Vec<GroupStatus>>>,
    pub unpublished: BTreeMap<String, BTreeSet<VarMip>>,
}

/// Partitions the requested space into current, stale and unpublished combinations.
///
/// Freshness is only evaluated for archive files that belong to a requested
/// combination; checks run on `workers` threads and are merged afterwards.
pub fn reconcile<C: FreshnessCheck + ?Sized>(
    requested: &RequestedSpace,
    catalog: &BTreeMap<String, RemoteRecord>,
    freshness: &C,
    workers: usize,
) -> ReconciliationResult {
    let observed = catalog
        .values()
        .map(RemoteRecord::combination)
        .collect::<BTreeSet<_>>();
    let observed_models = catalog
        .values()
        .filter(|record| requested.var_mips.contains(&record.var_mip()))
        .map(|record| record.model.clone())
        .collect::<BTreeSet<_>>();
    let requested = requested.combinations(&observed_models);
    let not_published = requested
        .difference(&observed)
        .cloned()
        .collect::<BTreeSet<_>>();

    let matching = catalog
        .values()
        .filter(|record| requested.contains(&record.combination()))
        .collect::<Vec<_>>();
    let files = matching
        .iter()
        .map(|record| &record.file)
        .collect::<Vec<_>>();
    let verdicts = assess(&files, freshness, workers);

    let mut published = BTreeSet::new();
    let mut published_stale = BTreeSet::new();
    let mut statuses = Vec::with_capacity(matching.len());
    for (record, verdict) in matching.into_iter().zip(verdicts) {
        let combination = record.combination();
        if verdict == Freshness::Stale {
            published_stale.insert(combination.clone());
        }
        published.insert(combination);
        statuses.push(FileStatus {
            record: record.clone(),
            freshness: verdict,
        });
    }
    let published_current = published
        .difference(&published_stale)
        .cloned()
        .collect::<BTreeSet<_>>();

    info!(
        requested = requested.len(),
        current = published_current.len(),
        stale = published_stale.len(),
        not_published = not_published.len(),
        "reconciled request"
    );

    ReconciliationResult {
        requested,
        published_current,
        published_stale,
        not_published,
        files: statuses,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ModelRun {
    pub model: String,
    pub experiment: String,
    pub ensemble: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Completeness {
    pub complete: BTreeSet<ModelRun>,
    pub incomplete: BTreeSet<ModelRun>,
}

/// Splits the model runs of a catalog by whether they hold every required variable.
pub fn ensemble_completeness<'a, I>(records: I, required: &BTreeSet<VarMip>) -> Completeness
where
    I: IntoIterator<Item = &'a EnsembleRecord>,
{
    let mut available = BTreeMap::<ModelRun, BTreeSet<VarMip>>::new();
    for record in records {
        let run = ModelRun {
            model: record.model.clone(),
            experiment: record.experiment.clone(),
            ensemble: record.ensemble.clone(),
        };
        available.entry(run).or_default().insert(record.var_mip());
    }

    let mut completeness = Completeness::default();
    for (run, var_mips) in available {
        if required.is_subset(&var_mips) {
            completeness.complete.insert(run);
        } else {
            completeness.incomplete.insert(run);
        }
    }
    completeness
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_summary_format() {
        let status = GroupStatus {
            model: "CCSM4".to_string(),
            ensemble: "r1i1p1".to_string(),
            version: "v20130101".to_string(),
            files: 4,
            stale: 1,
        };
        assert_eq!(status.summary(), "v20130101  4 files, 1 to update");
    }

    #[test]
    fn remote_version_uses_remote_sentinel() {
        let record = RemoteRecord::from_remote(RemoteFile {
            filename: "tas_Amon_CCSM4_rcp45_r1i1p1_200601-210012.nc".to_string(),
            location: "host/data/tas_Amon_CCSM4_rcp45_r1i1p1_200601-210012.nc".to_string(),
            checksum: "abc".to_string(),
        })
        .unwrap();
        assert_eq!(record.version, "no_version");
    }

    #[test]
    fn requested_model_axis_backfills() {
        let space = RequestedSpace::new(
            ["tas_Amon".parse::<VarMip>().unwrap()],
            Vec::<String>::new(),
            ["rcp45".to_string()],
        );
        let observed = BTreeSet::from(["CCSM4".to_string(), "MIROC5".to_string()]);
        assert_eq!(space.combinations(&observed).len(), 2);

        let explicit = RequestedSpace::new(
            ["tas_Amon".parse::<VarMip>().unwrap()],
            ["GFDL-CM3".to_string()],
            ["rcp45".to_string()],
        );
        let combos = explicit.combinations(&observed);
        assert_eq!(combos.len(), 1);
        assert_eq!(combos.iter().next().unwrap().model, "GFDL-CM3");
    }
}
