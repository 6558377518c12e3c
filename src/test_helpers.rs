//! Shared test utilities for the strata test suite.
//!
//! Builds layered source trees in a temp directory and reads back what a
//! build wrote.
//!
//! # Usage
//!
//! ```ignore
//! use crate::config::ExtensionsConfig;
//! use crate::resolve::resolve;
//! use crate::test_helpers::*;
//!
//! let fixture = SiteFixture::new(&["src", "theme"])
//!     .file("src", "content/index.md", "# Home")
//!     .file("theme", "content/index.md", "# Theme home")
//!     .file("theme", "layouts/base.tera", "{{ content | safe }}");
//!
//! let set = resolve(&fixture.sources(), &ExtensionsConfig::default(), None).unwrap();
//! assert_eq!(set.files["content/index.md"].source, 0);
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::SiteConfig;
use crate::types::SourceDirectory;

// =========================================================================
// Fixture setup
// =========================================================================

/// A working directory with a set of named source directories.
pub struct SiteFixture {
    tmp: TempDir,
    sources: Vec<String>,
}

impl SiteFixture {
    /// Create an empty working directory. Source directories are listed in
    /// precedence order but only created once a file is added to them.
    pub fn new(sources: &[&str]) -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Add a file at `<source>/<path>`.
    pub fn file(self, source: &str, path: &str, content: &str) -> Self {
        self.write(source, path, content);
        self
    }

    /// Write (or overwrite) a file at `<source>/<path>` on an existing fixture.
    pub fn write(&self, source: &str, path: &str, content: &str) {
        let full = self.root().join(source).join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    pub fn sources(&self) -> Vec<SourceDirectory> {
        self.sources
            .iter()
            .enumerate()
            .map(|(priority, s)| SourceDirectory::new(priority, self.root(), s))
            .collect()
    }

    /// Stock config pointed at this fixture's sources.
    pub fn config(&self) -> SiteConfig {
        SiteConfig {
            sources: self.sources.clone(),
            ..SiteConfig::default()
        }
    }

    pub fn destination(&self) -> PathBuf {
        self.root().join("dst")
    }

    /// Read a file from the destination tree.
    pub fn output(&self, path: &str) -> String {
        fs::read_to_string(self.destination().join(path))
            .unwrap_or_else(|e| panic!("missing output {path}: {e}"))
    }

    pub fn has_output(&self, path: &str) -> bool {
        self.destination().join(path).is_file()
    }

    /// Every file under the destination, `/`-separated and sorted, excluding
    /// the build manifest.
    pub fn outputs(&self) -> Vec<String> {
        let dst = self.destination();
        let mut files: Vec<String> = walkdir::WalkDir::new(&dst)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                e.path()
                    .strip_prefix(&dst)
                    .ok()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
            })
            .filter(|p| p != crate::manifest::MANIFEST_FILENAME)
            .collect();
        files.sort();
        files
    }
}
