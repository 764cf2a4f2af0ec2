use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use md5::{Digest, Md5};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::RemoteFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Current,
    Stale,
}

pub trait FreshnessCheck: Send + Sync {
    fn check(&self, file: &RemoteFile) -> Freshness;
}

/// Models whose replicas are trusted without checksum comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumPolicy {
    exempt: Vec<String>,
}

impl ChecksumPolicy {
    pub fn new<I, S>(exempt: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exempt: exempt.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_exempt(&self, filename: &str) -> bool {
        self.exempt
            .iter()
            .any(|token| !token.is_empty() && filename.contains(token.as_str()))
    }
}

/// Compares the replica copy under `replica_root` with the upstream MD5 checksum.
#[derive(Debug, Clone)]
pub struct Md5Freshness {
    replica_root: Utf8PathBuf,
    policy: ChecksumPolicy,
}

impl Md5Freshness {
    pub fn new(replica_root: impl Into<Utf8PathBuf>, policy: ChecksumPolicy) -> Self {
        Self {
            replica_root: replica_root.into(),
            policy,
        }
    }

    pub fn local_path(&self, file: &RemoteFile) -> Utf8PathBuf {
        local_path(&self.replica_root, file)
    }
}

pub fn local_path(replica_root: &Utf8Path, file: &RemoteFile) -> Utf8PathBuf {
    replica_root.join(file.location.trim_start_matches('/'))
}

impl FreshnessCheck for Md5Freshness {
    fn check(&self, file: &RemoteFile) -> Freshness {
        if self.policy.is_exempt(&file.filename) {
            return Freshness::Current;
        }
        let path = self.local_path(file);
        if !path.as_std_path().is_file() {
            return Freshness::Stale;
        }
        match md5_hex(path.as_std_path()) {
            Ok(digest) if digest.eq_ignore_ascii_case(&file.checksum) => Freshness::Current,
            Ok(_) => {
                debug!(path = path.as_str(), "checksum differs from upstream");
                Freshness::Stale
            }
            Err(err) => {
                warn!(path = path.as_str(), error = %err, "unable to hash replica file");
                Freshness::Stale
            }
        }
    }
}

pub fn md5_hex(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 1 << 20];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Checks every file on a pool of `workers` threads; results keep the input order.
pub fn assess<C: FreshnessCheck + ?Sized>(
    files: &[&RemoteFile],
    check: &C,
    workers: usize,
) -> Vec<Freshness> {
    if files.is_empty() {
        return Vec::new();
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build();

    match pool {
        Ok(pool) => pool.install(|| files.par_iter().map(|file| check.check(file)).collect()),
        Err(err) => {
            warn!(error = %err, "worker pool unavailable, checking sequentially");
            files.iter().map(|file| check.check(file)).collect()
        }
    }
}
