//! Build manifest for incremental builds.
//!
//! Most files in a site do not change between two builds. The manifest
//! records, per logical path, the fingerprint of the source that was last
//! built successfully and the destination files it produced, so the
//! change filter can drop unchanged files before they are even read.
//!
//! # Design
//!
//! ## Fingerprints
//!
//! A [`Fingerprint`] is `(size, mtime, sha256)`. Comparison is two-tier:
//!
//! 1. **Stat match**: size and modification time equal the recorded ones.
//!    No file content is read.
//! 2. **Hash match**: the stat differs (e.g. after `git checkout`, which
//!    resets modification times) but the SHA-256 of the content is equal.
//!
//! A file is unchanged only if either tier matches **and** every output it
//! produced last time still exists in the destination tree. A deleted
//! output therefore triggers a rebuild of its source.
//!
//! ## Run parameters
//!
//! Fingerprints only cover the source file itself. Everything else that
//! influences output (configuration, run flags, layered assets, site
//! metadata) is folded into one `params_hash`. If it differs from the
//! stored one the manifest is discarded and every file is rebuilt.
//!
//! ## Storage
//!
//! JSON at `<destination>/.strata-manifest.json`, so `--remove` (which
//! deletes the destination) implies a full rebuild. A missing, corrupt or
//! outdated manifest loads as empty.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;

/// Name of the manifest file within the destination directory.
pub const MANIFEST_FILENAME: &str = ".strata-manifest.json";

/// Bump to invalidate existing manifests when the format changes.
const MANIFEST_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Comparable summary of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub size: u64,
    pub modified_ms: u64,
    pub hash: String,
}

impl Fingerprint {
    /// Stat and hash a file.
    pub fn compute(path: &Path) -> io::Result<Self> {
        let (size, modified_ms) = stat(path)?;
        Ok(Self {
            size,
            modified_ms,
            hash: hash_file(path)?,
        })
    }

    /// Fingerprint of content already in memory, with `meta` taken from the
    /// same file.
    pub fn of_bytes(meta: &std::fs::Metadata, bytes: &[u8]) -> Self {
        Self {
            size: bytes.len() as u64,
            modified_ms: modified_ms(meta),
            hash: hash_bytes(bytes),
        }
    }
}

fn modified_ms(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `(size, modified time in ms since the epoch)`.
fn stat(path: &Path) -> io::Result<(u64, u64)> {
    let meta = std::fs::metadata(path)?;
    Ok((meta.len(), modified_ms(&meta)))
}

/// Result of comparing a source against the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Unchanged,
    /// Needs a rebuild. Carries the fresh fingerprint when one was computed.
    Changed(Option<Fingerprint>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub fingerprint: Fingerprint,
    /// Destination-relative paths produced from this source.
    pub outputs: Vec<String>,
}

/// On-disk manifest keyed by logical path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildManifest {
    pub version: u32,
    pub params_hash: String,
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl BuildManifest {
    /// Empty manifest for the given run parameters (first build, `--remove`,
    /// or parameters changed).
    pub fn empty(params_hash: &str) -> Self {
        Self {
            version: MANIFEST_VERSION,
            params_hash: params_hash.to_string(),
            entries: BTreeMap::new(),
        }
    }

    /// Load from the destination directory. Returns an empty manifest if the
    /// file is missing, unparsable, from another format version, or was
    /// written with different run parameters.
    pub fn load(destination: &Path, params_hash: &str) -> Self {
        let content = match std::fs::read_to_string(manifest_path(destination)) {
            Ok(c) => c,
            Err(_) => return Self::empty(params_hash),
        };
        let manifest: Self = match serde_json::from_str(&content) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("ignoring unreadable build manifest: {e}");
                return Self::empty(params_hash);
            }
        };
        if manifest.version != MANIFEST_VERSION {
            return Self::empty(params_hash);
        }
        if manifest.params_hash != params_hash {
            tracing::info!("build parameters changed, rebuilding everything");
            return Self::empty(params_hash);
        }
        manifest
    }

    pub fn save(&self, destination: &Path) -> Result<(), ManifestError> {
        std::fs::create_dir_all(destination)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(manifest_path(destination), json)?;
        Ok(())
    }

    /// Compare a source file against its recorded entry.
    pub fn freshness(
        &self,
        logical_path: &str,
        source: &Path,
        destination: &Path,
    ) -> io::Result<Freshness> {
        let Some(entry) = self.entries.get(logical_path) else {
            return Ok(Freshness::Changed(None));
        };
        let outputs_present = entry
            .outputs
            .iter()
            .all(|output| destination.join(output).exists());
        if !outputs_present {
            return Ok(Freshness::Changed(None));
        }

        let (size, modified_ms) = stat(source)?;
        let recorded = &entry.fingerprint;
        if size == recorded.size && modified_ms == recorded.modified_ms {
            return Ok(Freshness::Unchanged);
        }

        let fresh = Fingerprint {
            size,
            modified_ms,
            hash: hash_file(source)?,
        };
        if fresh.hash == recorded.hash {
            Ok(Freshness::Unchanged)
        } else {
            Ok(Freshness::Changed(Some(fresh)))
        }
    }

    /// Record the outputs of a successfully built source, replacing any
    /// previous entry.
    pub fn insert(&mut self, logical_path: String, fingerprint: Fingerprint, outputs: Vec<String>) {
        self.entries.insert(
            logical_path,
            ManifestEntry {
                fingerprint,
                outputs,
            },
        );
    }

    /// Forget a source whose rebuild failed so the next run retries it.
    pub fn remove(&mut self, logical_path: &str) {
        self.entries.remove(logical_path);
    }

    /// Drop entries for sources that no longer exist.
    pub fn retain_sources(&mut self, live: &BTreeSet<String>) {
        self.entries.retain(|logical, _| live.contains(logical));
    }
}

/// Resolve the manifest path for a destination directory.
pub fn manifest_path(destination: &Path) -> PathBuf {
    destination.join(MANIFEST_FILENAME)
}

/// SHA-256 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hash_bytes(&bytes))
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 over labelled run parameters.
///
/// Labels are hashed alongside values so that moving bytes between two
/// parameters changes the result.
pub fn hash_params(params: &[(&str, &[u8])]) -> String {
    let mut hasher = Sha256::new();
    for (label, value) in params {
        hasher.update(label.as_bytes());
        hasher.update(b"\0");
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value);
    }
    format!("{:x}", hasher.finalize())
}
