//! CLI output formatting for `build` and `check`.
//!
//! # Output Format
//!
//! ## Build
//!
//! ```text
//! Built 12 files in 0.31s
//!     discovered: 14
//!     shadowed: 1
//!     unchanged: 2
//!     failed: 1
//!         content/broken.md (render): template error: ...
//! ```
//!
//! ## Check
//!
//! ```text
//! Sources
//! 001 src
//! 002 theme
//!
//! Files
//! content/about.md ← src
//!     shadows theme
//! static/site.css ← theme
//!
//! Assets
//! layouts/base ← theme
//!
//! 2 files, 1 shadowed, 1 asset
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::site::{BuildReport, CheckReport};
use crate::types::SourceDirectory;
use std::collections::BTreeMap;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(count: usize, singular: &str) -> String {
    if count == 1 {
        format!("{count} {singular}")
    } else {
        format!("{count} {singular}s")
    }
}

fn source_label(sources: &[SourceDirectory], priority: usize) -> String {
    sources
        .iter()
        .find(|s| s.priority == priority)
        .map(SourceDirectory::label)
        .unwrap_or_else(|| format!("#{priority}"))
}

// ============================================================================
// Build
// ============================================================================

pub fn format_build_output(report: &BuildReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Built {} in {:.2}s",
        plural(report.written.len(), "file"),
        report.elapsed.as_secs_f64()
    )];
    lines.push(format!("{}discovered: {}", indent(1), report.discovered));
    if report.shadowed > 0 {
        lines.push(format!("{}shadowed: {}", indent(1), report.shadowed));
    }
    if report.unchanged > 0 {
        lines.push(format!("{}unchanged: {}", indent(1), report.unchanged));
    }
    if !report.failed.is_empty() {
        lines.push(format!("{}failed: {}", indent(1), report.failed.len()));
        for failure in &report.failed {
            lines.push(format!(
                "{}{} ({}): {}",
                indent(2),
                failure.path,
                failure.stage,
                failure.error
            ));
        }
    }
    lines
}

pub fn print_build_output(report: &BuildReport) {
    for line in format_build_output(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

pub fn format_check_output(report: &CheckReport) -> Vec<String> {
    let mut lines = vec!["Sources".to_string()];
    for source in &report.sources {
        lines.push(format!("{} {}", format_index(source.priority + 1), source.label()));
    }

    let mut shadowed: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for file in &report.set.shadowed {
        shadowed
            .entry(file.logical_path.as_str())
            .or_default()
            .push(file.source);
    }

    lines.push(String::new());
    lines.push("Files".to_string());
    for (logical, file) in &report.set.files {
        lines.push(format!(
            "{} ← {}",
            logical,
            source_label(&report.sources, file.source)
        ));
        if let Some(losers) = shadowed.get(logical.as_str()) {
            let mut losers = losers.clone();
            losers.sort();
            let names: Vec<String> = losers
                .iter()
                .map(|&p| source_label(&report.sources, p))
                .collect();
            lines.push(format!("{}shadows {}", indent(1), names.join(", ")));
        }
    }

    let assets = &report.assets;
    let named: Vec<(String, usize)> = assets
        .layouts
        .iter()
        .map(|(name, a)| (format!("layouts/{name}"), a.source))
        .chain(assets.partials.iter().map(|(name, a)| (format!("partials/{name}"), a.source)))
        .chain(assets.helpers.iter().map(|(name, a)| (format!("helpers/{name}"), a.source)))
        .chain(
            assets
                .decorators
                .iter()
                .map(|(name, a)| (format!("decorators/{name}"), a.source)),
        )
        .collect();
    if !named.is_empty() {
        lines.push(String::new());
        lines.push("Assets".to_string());
        for (name, source) in named {
            lines.push(format!("{} ← {}", name, source_label(&report.sources, source)));
        }
    }

    lines.push(String::new());
    lines.push(format!(
        "{}, {} shadowed, {}",
        plural(report.set.len(), "file"),
        report.set.shadowed.len(),
        plural(assets.count(), "asset")
    ));
    lines
}

pub fn print_check_output(report: &CheckReport) {
    for line in format_check_output(report) {
        println!("{}", line);
    }
}
