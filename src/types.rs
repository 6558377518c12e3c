//! Shared types used across the resolver, the path planner and every
//! pipeline stage.
//!
//! A [`VirtualFile`] is created by the resolver in the *discovered* state and
//! is then mutated in place by each stage it matches:
//!
//! ```text
//! discovered → filtered → read → renamed → enriched → rendered
//!            → laid-out → minified → written
//! ```
//!
//! Paths inside the pipeline are always `/`-separated strings that start with
//! the type segment (`content/…` or `static/…`) until the final cleanup stage
//! strips it.

use crate::manifest::Fingerprint;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

/// Front matter data attached to a content page.
pub type FrontMatter = Map<String, Value>;

/// A named subtree inside a source directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subtree {
    Content,
    Static,
    Decorators,
    Helpers,
    Partials,
    Layouts,
}

impl Subtree {
    /// Subtrees whose files flow through the pipeline.
    pub const FILES: [Subtree; 2] = [Subtree::Content, Subtree::Static];

    /// Directory name of the subtree inside a source directory.
    pub fn dir_name(self) -> &'static str {
        match self {
            Subtree::Content => "content",
            Subtree::Static => "static",
            Subtree::Decorators => "decorators",
            Subtree::Helpers => "helpers",
            Subtree::Partials => "partials",
            Subtree::Layouts => "layouts",
        }
    }

    /// Parse the leading type segment of a pipeline path.
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "content" => Some(Subtree::Content),
            "static" => Some(Subtree::Static),
            "decorators" => Some(Subtree::Decorators),
            "helpers" => Some(Subtree::Helpers),
            "partials" => Some(Subtree::Partials),
            "layouts" => Some(Subtree::Layouts),
            _ => None,
        }
    }
}

impl fmt::Display for Subtree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// One entry of the ordered source list.
///
/// `priority` is the index in the declared list: `0` is the highest
/// precedence and wins every override comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDirectory {
    pub priority: usize,
    /// Path as declared in the config, relative to the working directory.
    pub relative_path: PathBuf,
    /// Absolute (working-directory-joined) root of the source.
    pub root: PathBuf,
}

impl SourceDirectory {
    pub fn new(priority: usize, working_dir: &Path, relative_path: impl Into<PathBuf>) -> Self {
        let relative_path = relative_path.into();
        let root = working_dir.join(&relative_path);
        Self {
            priority,
            relative_path,
            root,
        }
    }

    /// Absolute path of one of the source's subtrees.
    pub fn subtree_root(&self, subtree: Subtree) -> PathBuf {
        self.root.join(subtree.dir_name())
    }

    /// Display label used in logs and CLI output.
    pub fn label(&self) -> String {
        self.relative_path.to_string_lossy().replace('\\', "/")
    }
}

/// A file flowing through the pipeline.
#[derive(Debug, Clone)]
pub struct VirtualFile {
    /// Identity used for override comparisons and the build manifest, e.g.
    /// `content/about.md`. Never changes after discovery.
    pub logical_path: String,
    /// Current working path. Starts equal to `logical_path` and is rewritten
    /// by rename/convert stages only.
    pub path: String,
    /// Priority of the source directory this file came from.
    pub source: usize,
    pub absolute_path: PathBuf,
    pub content: Option<Vec<u8>>,
    pub frontmatter: Option<FrontMatter>,
    /// Destination-relative output path, set once by final path cleanup (or
    /// directly by a stage that hands a file to the write queue).
    pub destination_path: Option<String>,
    /// Source fingerprint recorded in the build manifest after a write.
    pub fingerprint: Option<Fingerprint>,
}

impl VirtualFile {
    /// A freshly discovered file: nothing read, nothing planned.
    pub fn discovered(logical_path: String, source: usize, absolute_path: PathBuf) -> Self {
        Self {
            path: logical_path.clone(),
            logical_path,
            source,
            absolute_path,
            content: None,
            frontmatter: None,
            destination_path: None,
            fingerprint: None,
        }
    }

    /// Subtree named by the leading segment of the current path.
    pub fn subtree(&self) -> Option<Subtree> {
        self.path.split('/').next().and_then(Subtree::from_segment)
    }

    /// Last segment of the current path.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Content as UTF-8 text, if it has been read and is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        self.content
            .as_deref()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Derive a sibling output (fan-out) that shares this file's identity but
    /// carries its own path and content.
    pub fn derive(&self, path: String, content: Vec<u8>) -> Self {
        Self {
            logical_path: self.logical_path.clone(),
            path,
            source: self.source,
            absolute_path: self.absolute_path.clone(),
            content: Some(content),
            frontmatter: self.frontmatter.clone(),
            destination_path: None,
            fingerprint: self.fingerprint.clone(),
        }
    }
}
