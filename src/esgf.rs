use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use clap::ValueEnum;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{RemoteFile, VarMip};
use crate::error::ReplicaError;

pub const NO_MATCHES: &str = "No files were found that matched the query";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Node {
    #[default]
    Dkrz,
    Pcmdi,
}

impl Node {
    pub fn base_url(&self) -> &'static str {
        match self {
            Node::Dkrz => "http://esgf-data.dkrz.de",
            Node::Pcmdi => "http://pcmdi9.llnl.gov",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Dkrz => write!(f, "dkrz"),
            Node::Pcmdi => write!(f, "pcmdi"),
        }
    }
}

impl FromStr for Node {
    type Err = ReplicaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "dkrz" => Ok(Node::Dkrz),
            "pcmdi" => Ok(Node::Pcmdi),
            _ => Err(ReplicaError::InvalidNode(value.to_string())),
        }
    }
}

/// Directory names that the search index knows under a different spelling.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("ACCESS1-0", "ACCESS1.0"),
    ("ACCESS1-3", "ACCESS1.3"),
    ("CESM1-BGC", "CESM1(BGC)"),
    ("CESM1-CAM5", "CESM1(CAM5)"),
    ("CESM1-CAM5-1-FV2", "CESM1(CAM5.1,FV2)"),
    ("CESM1-WACCM", "CESM1(WACCM)"),
    ("CESM1-FASTCHEM", "CESM1(FASTCHEM)"),
    ("bcc-csm1-1", "BCC-CSM1.1"),
    ("bcc-csm1-1-m", "BCC-CSM1.1(m)"),
    ("inmcm4", "INM-CM4"),
];

pub fn search_model_name(model: &str) -> &str {
    MODEL_ALIASES
        .iter()
        .find(|(directory, _)| *directory == model)
        .map(|(_, search)| *search)
        .unwrap_or(model)
}

/// One wget-script search: a single experiment crossed with the requested variables and models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub experiment: String,
    pub var_mips: BTreeSet<VarMip>,
    pub models: BTreeSet<String>,
    pub limit: usize,
}

impl SearchQuery {
    pub fn url(&self, node: Node) -> Result<Url, ReplicaError> {
        let mut url = Url::parse(&format!("{}/esg-search/wget", node.base_url()))
            .map_err(|err| ReplicaError::EsgfHttp(err.to_string()))?;
        let tables = self
            .var_mips
            .iter()
            .map(|key| key.mip_table.as_str())
            .collect::<BTreeSet<_>>();
        let variables = self
            .var_mips
            .iter()
            .map(|key| key.variable.as_str())
            .collect::<BTreeSet<_>>();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("experiment", &self.experiment);
            for table in tables {
                pairs.append_pair("cmor_table", table);
            }
            pairs.append_pair("project", "CMIP5");
            for model in &self.models {
                pairs.append_pair("model", search_model_name(model));
            }
            for variable in variables {
                pairs.append_pair("variable", variable);
            }
            pairs.append_pair("replica", "false");
            pairs.append_pair("latest", "true");
            pairs.append_pair("limit", &self.limit.to_string());
        }
        Ok(url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedLine {
    pub line_no: usize,
    pub line: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptListing {
    pub files: Vec<RemoteFile>,
    pub rejected: Vec<RejectedLine>,
    pub no_matches: bool,
}

/// Extracts the `'filename' 'url' 'MD5' 'checksum'` entries of a wget download script.
///
/// Entries whose checksum type is not MD5 are rejected individually.
pub fn parse_script(text: &str) -> ScriptListing {
    let mut listing = ScriptListing::default();
    let mut lines = text.lines().peekable();
    if lines
        .peek()
        .is_some_and(|first| first.trim() == NO_MATCHES)
    {
        listing.no_matches = true;
        return listing;
    }

    for (index, raw) in lines.enumerate() {
        let line = raw.trim();
        if !line.starts_with('\'') {
            continue;
        }
        match parse_entry(line) {
            Some(file) => listing.files.push(file),
            None => {
                warn!(line_no = index + 1, line, "rejecting malformed script entry");
                listing.rejected.push(RejectedLine {
                    line_no: index + 1,
                    line: line.to_string(),
                });
            }
        }
    }
    listing
}

fn parse_entry(line: &str) -> Option<RemoteFile> {
    let unquoted = line.replace(['\'', '"'], "");
    let tokens = unquoted.split_whitespace().collect::<Vec<_>>();
    let [filename, url, checksum_type, checksum] = tokens.as_slice() else {
        return None;
    };
    if !checksum_type.eq_ignore_ascii_case("md5") {
        return None;
    }
    let location = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(*url);
    Some(RemoteFile {
        filename: filename.to_string(),
        location: location.to_string(),
        checksum: checksum.to_string(),
    })
}

pub trait ArchiveClient: Send + Sync {
    fn fetch_script(&self, query: &SearchQuery) -> Result<String, ReplicaError>;
}

#[derive(Clone)]
pub struct EsgfHttpClient {
    client: Client,
    node: Node,
}

impl EsgfHttpClient {
    pub fn new(node: Node) -> Result<Self, ReplicaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cmip-replica/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ReplicaError::EsgfHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| ReplicaError::EsgfHttp(err.to_string()))?;
        Ok(Self { client, node })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, ReplicaError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "ESGF search failed".to_string());
        Err(ReplicaError::EsgfStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, ReplicaError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    if attempt < MAX_RETRIES && is_retryable_status(resp.status().as_u16()) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(ReplicaError::EsgfHttp(err.to_string()));
                }
            }
        }
    }
}

impl ArchiveClient for EsgfHttpClient {
    fn fetch_script(&self, query: &SearchQuery) -> Result<String, ReplicaError> {
        let url = query.url(self.node)?;
        let response = self.send_with_retries(|| self.client.get(url.clone()))?;
        let response = Self::handle_status(response)?;
        response
            .text()
            .map_err(|err| ReplicaError::EsgfHttp(err.to_string()))
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
