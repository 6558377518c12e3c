//! Layered source resolution.
//!
//! First step of every build. Walks the `content` and `static` subtrees of
//! each source directory and merges them into one virtual file set in which
//! every logical path appears once:
//!
//! ```text
//! sources = ["src", "theme"]
//!
//! src/content/index.md        ─┐
//! theme/content/index.md       ├─▶ content/index.md    (from src, priority 0)
//! theme/content/about.md      ─┴─▶ content/about.md    (from theme, priority 1)
//! theme/static/site.css       ───▶ static/site.css     (from theme)
//! ```
//!
//! ## Precedence
//!
//! Every candidate carries the priority of its source (its index in the
//! declared list). The merge keeps the candidate with the lowest priority
//! per logical path, so the outcome does not depend on walk order. Losing
//! candidates are kept aside as *shadowed* so the pipeline's duplicate
//! filter and `strata check` can report them.
//!
//! ## Failure handling
//!
//! - Missing subtree or source directory: contributes nothing.
//! - A directory that cannot be listed: fatal, the file set would be
//!   incomplete.
//! - A single file that cannot be stat'ed (dangling symlink, race with a
//!   delete): logged and dropped.

use crate::config::{ExtensionsConfig, effective_threads};
use crate::types::{SourceDirectory, Subtree, VirtualFile};
use rayon::prelude::*;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("cannot enumerate {path}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[error("cannot start resolver workers: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// The precedence-resolved file set.
#[derive(Debug, Default)]
pub struct SourceSet {
    /// Winning file per logical path.
    pub files: BTreeMap<String, VirtualFile>,
    /// Candidates that lost to a higher-precedence source.
    pub shadowed: Vec<VirtualFile>,
}

impl SourceSet {
    /// Every discovered file, winners first. Shadowed files are included so
    /// the pipeline's duplicate filter can reject them visibly.
    pub fn working_set(&self) -> Vec<VirtualFile> {
        self.files
            .values()
            .cloned()
            .chain(self.shadowed.iter().cloned())
            .collect()
    }

    /// Winning source priority per logical path.
    pub fn winners(&self) -> BTreeMap<String, usize> {
        self.files
            .iter()
            .map(|(path, file)| (path.clone(), file.source))
            .collect()
    }

    pub fn logical_paths(&self) -> BTreeSet<String> {
        self.files.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Keep the lowest-priority candidate per key.
///
/// Returns the winners and every losing candidate. Equal priorities keep
/// the candidate seen first.
pub fn min_by_priority<K: Ord + Clone, T>(
    candidates: impl IntoIterator<Item = (K, usize, T)>,
) -> (BTreeMap<K, (usize, T)>, Vec<(K, usize, T)>) {
    let mut winners: BTreeMap<K, (usize, T)> = BTreeMap::new();
    let mut losers = Vec::new();

    for (key, priority, value) in candidates {
        match winners.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert((priority, value));
            }
            Entry::Occupied(mut slot) => {
                let key = slot.key().clone();
                if slot.get().0 <= priority {
                    losers.push((key, priority, value));
                } else {
                    let (old_priority, old_value) = slot.insert((priority, value));
                    losers.push((key, old_priority, old_value));
                }
            }
        }
    }
    (winners, losers)
}

/// Enumerate the files of one subtree of one source.
///
/// Returns `(path relative to the subtree root, absolute path)` pairs in
/// file-name order. A missing subtree yields an empty list.
pub fn walk_subtree(root: &Path) -> Result<Vec<(String, PathBuf)>, ResolveError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| ResolveError::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((relative, entry.into_path()));
    }
    Ok(files)
}

/// Resolve the content and static files of all sources.
///
/// Directory enumeration is sequential per source; the per-file stat that
/// weeds out unreadable entries runs on a rayon pool bounded by
/// `concurrency`.
pub fn resolve(
    sources: &[SourceDirectory],
    extensions: &ExtensionsConfig,
    concurrency: Option<usize>,
) -> Result<SourceSet, ResolveError> {
    let mut discovered = Vec::new();
    for source in sources {
        for subtree in Subtree::FILES {
            let allow = match subtree {
                Subtree::Content => &extensions.content,
                _ => &extensions.static_files,
            };
            let files = walk_subtree(&source.subtree_root(subtree))?;
            let kept = files
                .into_iter()
                .filter(|(relative, _)| {
                    let name = relative.rsplit('/').next().unwrap_or(relative);
                    ExtensionsConfig::allows(allow, name)
                })
                .map(|(relative, absolute)| {
                    VirtualFile::discovered(format!("{subtree}/{relative}"), source.priority, absolute)
                });
            discovered.extend(kept);
            tracing::debug!("walked {}/{}", source.label(), subtree);
        }
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(effective_threads(concurrency))
        .build()?;
    let readable: Vec<VirtualFile> = pool.install(|| {
        discovered
            .into_par_iter()
            .filter(|file| match std::fs::metadata(&file.absolute_path) {
                Ok(meta) if meta.is_file() => true,
                Ok(_) => false,
                Err(e) => {
                    tracing::warn!("dropping {}: {e}", file.absolute_path.display());
                    false
                }
            })
            .collect()
    });

    let (winners, losers) = min_by_priority(
        readable
            .into_iter()
            .map(|file| (file.logical_path.clone(), file.source, file)),
    );

    let shadowed: Vec<VirtualFile> = losers.into_iter().map(|(_, _, file)| file).collect();
    for file in &shadowed {
        tracing::debug!(
            "{} from source {} is shadowed",
            file.logical_path,
            file.source
        );
    }

    Ok(SourceSet {
        files: winners
            .into_iter()
            .map(|(path, (_, file))| (path, file))
            .collect(),
        shadowed,
    })
}
