//! Staged pipeline executor.
//!
//! The resolved file set flows through an ordered list of stages. Each stage
//! declares which files it touches with a [`PatternSet`] matched against the
//! file's current path; files it does not match pass through untouched.
//!
//! ```text
//!            ┌──────────── stage K ────────────┐
//! files ──▶  │ match? ──yes──▶ engine (≤ N     │ ──▶ files for stage K+1
//!            │   │             in flight)      │
//!            │   no ─────────────────────────▶ │
//!            └─────────────────────────────────┘
//! ```
//!
//! ## Ordering
//!
//! The whole batch advances one stage at a time: stage K+1 starts only
//! after every file of stage K has settled. Within a stage at most
//! `concurrency` engine calls are in flight; their completion order is not
//! observable because the surviving set is re-sorted by path after every
//! stage.
//!
//! ## Outcomes
//!
//! An engine consumes a file and returns one [`Outcome`]:
//!
//! - `Keep`: the (possibly modified) file continues.
//! - `Reject`: the file leaves the working set (filters).
//! - `FanOut`: several files continue, and some may skip straight to the
//!   write queue, which is merged back just before the write stage.
//! - `Written`: the file reached the destination tree.
//!
//! ## Failures
//!
//! An engine error drops that one file, is logged at `warn`, and is
//! recorded in the [`PipelineReport`]. Sibling files are unaffected.

pub mod stages;

use crate::config::SiteConfig;
use crate::external::ExternalError;
use crate::manifest::{BuildManifest, Fingerprint};
use crate::pattern::PatternSet;
use crate::render::{RenderError, Renderer};
use crate::types::VirtualFile;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;

/// Per-file failure inside a stage.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Render(#[from] RenderError),
    #[error("{0}")]
    External(#[from] ExternalError),
    #[error("invalid front matter: {0}")]
    FrontMatter(String),
    #[error("content is not UTF-8")]
    NotUtf8,
    #[error("worker panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What a stage does. Informational: drives logging and reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Filter,
    Read,
    Rename,
    Enrich,
    Render,
    Convert,
    Minify,
    Write,
}

/// A file that reached the destination tree.
#[derive(Debug, Clone)]
pub struct WrittenFile {
    pub logical_path: String,
    /// Destination-relative path.
    pub destination: String,
    pub fingerprint: Option<Fingerprint>,
}

/// Result of applying an engine to one file.
#[derive(Debug)]
pub enum Outcome {
    Keep(VirtualFile),
    Reject(&'static str),
    FanOut {
        /// Continue through the remaining stages.
        next: Vec<VirtualFile>,
        /// Appended to the write queue with `destination_path` already set.
        direct: Vec<VirtualFile>,
    },
    Written(WrittenFile),
}

/// Read-only state shared by all stages of one run.
pub struct StageContext {
    pub config: Arc<SiteConfig>,
    pub destination: PathBuf,
    /// Winning source priority per logical path.
    pub winners: BTreeMap<String, usize>,
    pub manifest: BuildManifest,
    pub renderer: Arc<Renderer>,
    pub base_url: String,
}

/// A stage's transformation.
pub trait Engine: Send + Sync {
    fn apply<'a>(
        &'a self,
        file: VirtualFile,
        ctx: &'a Arc<StageContext>,
    ) -> BoxFuture<'a, Result<Outcome, StageError>>;
}

pub struct Stage {
    pub name: &'static str,
    pub kind: StageKind,
    pub patterns: PatternSet,
    pub engine: Box<dyn Engine>,
}

impl Stage {
    pub fn new(
        name: &'static str,
        kind: StageKind,
        patterns: PatternSet,
        engine: impl Engine + 'static,
    ) -> Self {
        Self {
            name,
            kind,
            patterns,
            engine: Box::new(engine),
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("patterns", &self.patterns.describe())
            .finish()
    }
}

/// A per-file failure, as reported after the run.
#[derive(Debug, Clone)]
pub struct FileFailure {
    pub logical_path: String,
    pub path: String,
    pub stage: &'static str,
    pub error: String,
}

/// What happened to the file set.
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// Files each stage's engine was applied to, in stage order.
    pub entered: Vec<(&'static str, usize)>,
    /// Rejections per reason (`shadowed`, `unchanged`).
    pub rejected: BTreeMap<&'static str, usize>,
    pub failed: Vec<FileFailure>,
    pub written: Vec<WrittenFile>,
}

impl PipelineReport {
    /// How many files entered the named stage. `0` if it did not run.
    pub fn entered(&self, stage: &str) -> usize {
        self.entered
            .iter()
            .filter(|(name, _)| *name == stage)
            .map(|(_, n)| n)
            .sum()
    }

    pub fn rejected(&self, reason: &str) -> usize {
        self.rejected.get(reason).copied().unwrap_or(0)
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} written", self.written.len())?;
        for (reason, count) in &self.rejected {
            write!(f, ", {count} {reason}")?;
        }
        if !self.failed.is_empty() {
            write!(f, ", {} failed", self.failed.len())?;
        }
        Ok(())
    }
}

/// The ordered stage list.
#[derive(Debug)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    /// Per-stage bound on in-flight engine calls. `None` = unbounded.
    pub concurrency: Option<usize>,
}

impl Pipeline {
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name).collect()
    }

    /// Run `files` through every stage in order.
    pub async fn run(&self, files: Vec<VirtualFile>, ctx: Arc<StageContext>) -> PipelineReport {
        let mut report = PipelineReport::default();
        let mut files = files;
        let mut write_queue: Vec<VirtualFile> = Vec::new();
        let limit = self.concurrency.unwrap_or(usize::MAX).max(1);

        for stage in &self.stages {
            if stage.kind == StageKind::Write {
                files.append(&mut write_queue);
            }
            let span = tracing::info_span!("stage", name = stage.name, kind = ?stage.kind);
            files = self
                .run_stage(stage, files, &ctx, limit, &mut write_queue, &mut report)
                .instrument(span)
                .await;
        }

        if !files.is_empty() || !write_queue.is_empty() {
            tracing::debug!(
                "{} files left after the last stage",
                files.len() + write_queue.len()
            );
        }
        report
    }

    async fn run_stage(
        &self,
        stage: &Stage,
        files: Vec<VirtualFile>,
        ctx: &Arc<StageContext>,
        limit: usize,
        write_queue: &mut Vec<VirtualFile>,
        report: &mut PipelineReport,
    ) -> Vec<VirtualFile> {
        let (matching, mut next): (Vec<_>, Vec<_>) = files
            .into_iter()
            .partition(|file| stage.patterns.matches(&file.path));

        report.entered.push((stage.name, matching.len()));
        if matching.is_empty() {
            return next;
        }
        tracing::info!("{} files ({})", matching.len(), stage.patterns.describe());

        let results: Vec<_> = stream::iter(matching)
            .map(|file| {
                let logical_path = file.logical_path.clone();
                let path = file.path.clone();
                async move {
                    let result = stage.engine.apply(file, ctx).await;
                    (logical_path, path, result)
                }
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        for (logical_path, path, result) in results {
            match result {
                Ok(Outcome::Keep(file)) => next.push(file),
                Ok(Outcome::Reject(reason)) => {
                    tracing::debug!("{path}: {reason}");
                    *report.rejected.entry(reason).or_default() += 1;
                }
                Ok(Outcome::FanOut {
                    next: more,
                    direct,
                }) => {
                    next.extend(more);
                    write_queue.extend(direct);
                }
                Ok(Outcome::Written(written)) => {
                    tracing::debug!("wrote {}", written.destination);
                    report.written.push(written);
                }
                Err(e) => {
                    tracing::warn!("{path}: {} failed: {e}", stage.name);
                    report.failed.push(FileFailure {
                        logical_path,
                        path,
                        stage: stage.name,
                        error: e.to_string(),
                    });
                }
            }
        }

        next.sort_by(|a, b| (&a.path, a.source).cmp(&(&b.path, b.source)));
        next
    }
}
