use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::ReplicaError;
use crate::esgf::Node;
use crate::freshness::ChecksumPolicy;

pub const CONFIG_FILE: &str = "cmip-replica.json";
pub const DEFAULT_REPLICA_ROOT: &str = "/g/data1/ua6/unofficial-ESG-replica/tmp/tree";
pub const DEFAULT_MANIFEST: &str =
    "/g/data1/ua6/unofficial-ESG-replica/tmp/tree/esg-tree-LATEST-paths.txt";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub replica_root: Option<String>,
    #[serde(default)]
    pub manifest: Option<String>,
    #[serde(default)]
    pub node: Option<Node>,
    #[serde(default)]
    pub search_limit: Option<usize>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub checksum_exempt: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub replica_root: Utf8PathBuf,
    pub manifest: Utf8PathBuf,
    pub node: Node,
    pub search_limit: usize,
    pub workers: usize,
    pub checksum_exempt: Vec<String>,
}

impl ResolvedConfig {
    pub fn checksum_policy(&self) -> ChecksumPolicy {
        ChecksumPolicy::new(self.checksum_exempt.iter().cloned())
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        // Built-in defaults never fail to resolve.
        ConfigLoader::resolve_config(Config::default())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit path first, then `./cmip-replica.json`, then the user config directory.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ReplicaError> {
        let config_path = match path {
            Some(path) => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    return Err(ReplicaError::MissingConfig(path));
                }
                Some(path)
            }
            None => Self::candidates().into_iter().find(|path| path.exists()),
        };

        let Some(config_path) = config_path else {
            return Ok(Self::resolve_config(Config::default()));
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ReplicaError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ReplicaError::ConfigParse(err.to_string()))?;

        Ok(Self::resolve_config(config))
    }

    fn candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dirs) = BaseDirs::new() {
            candidates.push(dirs.config_dir().join("cmip-replica").join(CONFIG_FILE));
        }
        candidates
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            replica_root: Utf8PathBuf::from(
                config
                    .replica_root
                    .unwrap_or_else(|| DEFAULT_REPLICA_ROOT.to_string()),
            ),
            manifest: Utf8PathBuf::from(
                config
                    .manifest
                    .unwrap_or_else(|| DEFAULT_MANIFEST.to_string()),
            ),
            node: config.node.unwrap_or_default(),
            search_limit: config.search_limit.unwrap_or(10_000),
            workers: config.workers.unwrap_or(1).max(1),
            checksum_exempt: config
                .checksum_exempt
                .unwrap_or_else(default_checksum_exempt),
        }
    }
}

pub fn default_checksum_exempt() -> Vec<String> {
    vec!["ACCESS".to_string(), "CSIRO".to_string()]
}
