//! Build orchestration.
//!
//! ```text
//! version gate → metadata → [remove] → resolve + assets → params hash
//!              → load manifest → pipeline → update manifest → report
//! ```
//!
//! Anything that fails before the pipeline starts is fatal and returned as
//! a [`BuildError`]. Once the pipeline runs, failures are per file and end
//! up in [`BuildReport::failed`].

use crate::assets::{AssetTable, PluginRegistry};
use crate::config::{ConfigError, ENGINE_VERSION, RunOptions, SiteConfig, check_version};
use crate::manifest::{BuildManifest, Fingerprint, ManifestError, hash_params};
use crate::metadata::layered_metadata;
use crate::paths::base_url;
use crate::pattern::PatternError;
use crate::pipeline::{FileFailure, PipelineReport, StageContext, WrittenFile, stages};
use crate::render::{RenderError, Renderer};
use crate::resolve::{ResolveError, SourceSet, resolve};
use crate::types::SourceDirectory;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::Instrument;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Resolve(#[from] ResolveError),
    #[error("{0}")]
    Render(#[from] RenderError),
    #[error("invalid stage pattern: {0}")]
    Pattern(#[from] PatternError),
    #[error("build manifest: {0}")]
    Manifest(#[from] ManifestError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("worker panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Summary of one build.
#[derive(Debug)]
pub struct BuildReport {
    pub elapsed: Duration,
    /// Distinct logical paths after precedence resolution.
    pub discovered: usize,
    pub shadowed: usize,
    pub unchanged: usize,
    pub failed: Vec<FileFailure>,
    pub written: Vec<WrittenFile>,
    pub pipeline: PipelineReport,
}

/// Resolved view of a site, without building it.
pub struct CheckReport {
    pub sources: Vec<SourceDirectory>,
    pub set: SourceSet,
    pub assets: AssetTable,
}

/// Source directories in precedence order, rooted at `working_dir`.
pub fn source_directories(working_dir: &Path, config: &SiteConfig) -> Vec<SourceDirectory> {
    config
        .sources
        .iter()
        .enumerate()
        .map(|(priority, source)| SourceDirectory::new(priority, working_dir, source))
        .collect()
}

/// Build with the builtin helpers and decorators.
pub async fn build(
    working_dir: &Path,
    config: SiteConfig,
    options: RunOptions,
) -> Result<BuildReport, BuildError> {
    build_with_registry(working_dir, config, options, &PluginRegistry::with_builtins()).await
}

/// Build with a caller-supplied plugin registry.
pub async fn build_with_registry(
    working_dir: &Path,
    mut config: SiteConfig,
    options: RunOptions,
    registry: &PluginRegistry,
) -> Result<BuildReport, BuildError> {
    let started = Instant::now();
    config.validate()?;
    if let Some(required) = &config.version {
        check_version(required, ENGINE_VERSION)?;
    }
    let sources = source_directories(working_dir, &config);
    // Development overrides must see `site_url` from every metadata layer.
    config.metadata = layered_metadata(&sources, &config.metadata);
    if options.development {
        config.apply_development();
    }

    let destination = working_dir.join(&config.destination);
    if options.remove && destination.exists() {
        tracing::info!("removing {}", destination.display());
        tokio::fs::remove_dir_all(&destination).await?;
    }
    tokio::fs::create_dir_all(&destination).await?;

    let (set, assets) = {
        let sources = sources.clone();
        let extensions = config.extensions.clone();
        let concurrency = config.concurrency;
        let registry = registry.clone();
        tokio::task::spawn_blocking(move || -> Result<_, ResolveError> {
            let set = resolve(&sources, &extensions, concurrency)?;
            let assets = AssetTable::load(&sources, &registry)?;
            Ok((set, assets))
        })
        .await??
    };
    tracing::info!(
        "resolved {} files ({} shadowed), {} assets",
        set.len(),
        set.shadowed.len(),
        assets.count()
    );

    let params = params_hash(&config, options, &assets)?;
    let manifest = if options.no_changed {
        BuildManifest::empty(&params)
    } else {
        BuildManifest::load(&destination, &params)
    };

    let renderer = Renderer::new(
        &assets,
        config.transform.markdown.clone(),
        config.metadata.clone(),
    )?;
    let pipeline = stages::assemble(&config, options)?;
    tracing::debug!("stages: {}", pipeline.stage_names().join(" → "));

    let base = base_url(config.site_url());
    let ctx = Arc::new(StageContext {
        config: Arc::new(config),
        destination: destination.clone(),
        winners: set.winners(),
        manifest,
        renderer: Arc::new(renderer),
        base_url: base,
    });

    let report = pipeline
        .run(set.working_set(), Arc::clone(&ctx))
        .instrument(tracing::info_span!("build"))
        .await;

    let mut manifest = ctx.manifest.clone();
    record_outputs(&mut manifest, &set.logical_paths(), &report);
    manifest.save(&destination)?;

    let elapsed = started.elapsed();
    tracing::info!("{report} in {elapsed:.2?}");
    Ok(BuildReport {
        elapsed,
        discovered: set.len(),
        shadowed: report.rejected("shadowed"),
        unchanged: report.rejected("unchanged"),
        failed: report.failed.clone(),
        written: report.written.clone(),
        pipeline: report,
    })
}

/// Resolve sources and assets without running the pipeline.
pub fn check(working_dir: &Path, config: &SiteConfig) -> Result<CheckReport, BuildError> {
    config.validate()?;
    if let Some(required) = &config.version {
        check_version(required, ENGINE_VERSION)?;
    }
    let sources = source_directories(working_dir, config);
    let set = resolve(&sources, &config.extensions, config.concurrency)?;
    let assets = AssetTable::load(&sources, &PluginRegistry::with_builtins())?;
    Ok(CheckReport {
        sources,
        set,
        assets,
    })
}

/// Everything besides the source files that affects the output.
fn params_hash(
    config: &SiteConfig,
    options: RunOptions,
    assets: &AssetTable,
) -> Result<String, BuildError> {
    let config_json = serde_json::to_vec(config)?;
    let flags = [
        options.development,
        options.no_transform_css,
        options.no_transform_js,
        options.no_minify,
    ]
    .map(u8::from);
    let assets_hash = assets.fingerprint();
    Ok(hash_params(&[
        ("engine", ENGINE_VERSION.as_bytes()),
        ("config", config_json.as_slice()),
        ("flags", flags.as_slice()),
        ("assets", assets_hash.as_bytes()),
    ]))
}

/// Fold a run's outputs into the manifest.
///
/// Sources that failed anywhere are forgotten so the next run retries them;
/// sources skipped as unchanged keep their entry.
fn record_outputs(manifest: &mut BuildManifest, live: &BTreeSet<String>, report: &PipelineReport) {
    manifest.retain_sources(live);

    let failed: BTreeSet<&str> = report.failed.iter().map(|f| f.logical_path.as_str()).collect();
    for logical in &failed {
        manifest.remove(logical);
    }

    let mut built: BTreeMap<&str, (Option<&Fingerprint>, Vec<String>)> = BTreeMap::new();
    for written in &report.written {
        let entry = built.entry(written.logical_path.as_str()).or_default();
        if entry.0.is_none() {
            entry.0 = written.fingerprint.as_ref();
        }
        entry.1.push(written.destination.clone());
    }

    for (logical, (fingerprint, mut outputs)) in built {
        if failed.contains(logical) {
            continue;
        }
        let Some(fingerprint) = fingerprint else {
            continue;
        };
        outputs.sort();
        manifest.insert(logical.to_string(), fingerprint.clone(), outputs);
    }
}
