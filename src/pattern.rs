//! Compiled stage patterns.
//!
//! Every stage declares the files it touches as a list of glob patterns,
//! compiled once when the pipeline is assembled:
//!
//! ```text
//! "content/*.md"      positive: `*` crosses `/`, so nested pages match
//! "!static/*.min.js"  negated: a match excludes the file
//! "!(static/vendor*)" negated, parenthesised form
//! ```
//!
//! Positive patterns are combined by [`MatchMode`]; negated patterns always
//! exclude. A set with no positive patterns matches every path its negations
//! do not exclude, so an empty set matches everything.

use glob::MatchOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("invalid pattern `{pattern}`: {source}")]
    Invalid {
        pattern: String,
        source: glob::PatternError,
    },
}

/// How positive patterns of a set combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// At least one positive pattern must match.
    #[default]
    Any,
    /// Every positive pattern must match.
    All,
}

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// One compiled glob, possibly negated.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    glob: glob::Pattern,
    negated: bool,
}

impl CompiledPattern {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let (negated, body) = match pattern.strip_prefix('!') {
            Some(rest) => {
                let inner = rest
                    .strip_prefix('(')
                    .and_then(|r| r.strip_suffix(')'))
                    .unwrap_or(rest);
                (true, inner)
            }
            None => (false, pattern),
        };
        let glob = glob::Pattern::new(body).map_err(|source| PatternError::Invalid {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            source: pattern.to_string(),
            glob,
            negated,
        })
    }

    /// Whether the glob body matches, ignoring negation.
    fn hits(&self, path: &str) -> bool {
        self.glob.matches_with(path, OPTIONS)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// A stage's compiled pattern list.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<CompiledPattern>,
    mode: MatchMode,
}

impl PatternSet {
    pub fn new<S: AsRef<str>>(patterns: &[S], mode: MatchMode) -> Result<Self, PatternError> {
        let patterns = patterns
            .iter()
            .map(|p| CompiledPattern::compile(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns, mode })
    }

    /// Convenience for the common any-mode case.
    pub fn any<S: AsRef<str>>(patterns: &[S]) -> Result<Self, PatternError> {
        Self::new(patterns, MatchMode::Any)
    }

    /// A set that matches every path.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.patterns.iter().any(|p| p.negated && p.hits(path)) {
            return false;
        }
        let mut positives = self.patterns.iter().filter(|p| !p.negated).peekable();
        if positives.peek().is_none() {
            return true;
        }
        match self.mode {
            MatchMode::Any => positives.any(|p| p.hits(path)),
            MatchMode::All => positives.all(|p| p.hits(path)),
        }
    }

    /// Human-readable form for logs, e.g. `content/*.md, !content/_*`.
    pub fn describe(&self) -> String {
        if self.patterns.is_empty() {
            return "*".to_string();
        }
        let joiner = match self.mode {
            MatchMode::Any => ", ",
            MatchMode::All => " & ",
        };
        self.patterns
            .iter()
            .map(CompiledPattern::as_str)
            .collect::<Vec<_>>()
            .join(joiner)
    }
}
