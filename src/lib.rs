//! # Strata
//!
//! A static site builder over layered source directories. A site lists its
//! sources in precedence order; each may hold `content/`, `static/`,
//! `layouts/`, `partials/`, `helpers/`, `decorators/` and a `metadata.json`.
//! The first source that has a file wins, so a site overrides any file of
//! the themes listed after it.
//!
//! # Architecture
//!
//! ```text
//! sources ──resolve──▶ SourceSet ──pipeline──▶ destination/
//!    │                                 ▲
//!    └──assets, metadata──▶ Renderer ──┘
//!                          BuildManifest (skip unchanged files)
//! ```
//!
//! 1. **Resolve** every source's `content/` and `static/` into one file set,
//!    one winner per logical path ([`resolve`]).
//! 2. **Load assets** (layouts, partials, helpers, decorators) with the same
//!    precedence rule, and merge site metadata ([`assets`], [`metadata`]).
//! 3. **Run the pipeline**: a fixed list of pattern-scoped stages, each
//!    applied to the whole batch with bounded concurrency before the next
//!    starts ([`pipeline`]).
//! 4. **Record** what was built in the build manifest so the next run can
//!    skip unchanged sources ([`manifest`]).
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`site`] | Run orchestration: version gate, resolve, pipeline, manifest, report |
//! | [`resolve`] | Layered discovery with precedence resolution |
//! | [`paths`] | Extension resolution, clean-URL renames, page URLs, destination paths |
//! | [`pattern`] | Compiled glob pattern sets scoping each stage |
//! | [`pipeline`] | Stage executor, engines, fan-out and write queue |
//! | [`render`] | Markdown, Tera templates and layouts |
//! | [`assets`] | Layered layouts/partials/helpers/decorators and the plugin registry |
//! | [`external`] | External CSS/JS compiler commands with timeouts |
//! | [`minify`] | HTML/CSS/JS minification |
//! | [`manifest`] | Fingerprints and the build manifest |
//! | [`metadata`] | Layered `metadata.json` merge |
//! | [`config`] | `strata.toml` loading, validation, version gate, run options |
//! | [`types`] | Shared types: `SourceDirectory`, `VirtualFile` |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Explicit Priorities
//!
//! Every source carries its index in the declared list as a priority, and
//! every precedence decision (files, assets, metadata) is a minimum over
//! that priority. Nothing depends on the order in which directories happen
//! to be scanned.
//!
//! ## Batch-at-a-time Stages
//!
//! The whole file set advances one stage at a time. That keeps stage order
//! trivially observable (every file is rendered before any is minified) and
//! makes `concurrency` a simple per-stage bound on in-flight work, which is
//! what keeps external compilers from exhausting process limits.
//!
//! ## Manifest in the Destination
//!
//! The build manifest lives next to the output it describes, so deleting the
//! destination (or `--remove`) always yields a full rebuild.

pub mod assets;
pub mod config;
pub mod external;
pub mod manifest;
pub mod metadata;
pub mod minify;
pub mod output;
pub mod paths;
pub mod pattern;
pub mod pipeline;
pub mod render;
pub mod resolve;
pub mod site;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
