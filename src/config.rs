//! Site configuration module.
//!
//! Handles loading, validating, and defaulting `strata.toml`. User values are
//! merged over the stock defaults, so a config file only needs the keys it
//! wants to change:
//!
//! ```text
//! site/
//! ├── strata.toml            # Optional, stock defaults if absent
//! ├── theme/                 # Lower-precedence source
//! │   ├── content/
//! │   ├── static/
//! │   └── layouts/base.tera
//! └── src/                   # Higher-precedence source
//!     ├── metadata.json
//!     ├── content/
//!     └── static/
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! version = "1.0.0"          # Minimum strata version this site needs
//! destination = "dst"
//! sources = ["src", "theme"] # Earlier sources override later ones
//! # concurrency = 16         # Per-stage bound, unbounded when absent
//!
//! [metadata]
//! site_url = "https://example.com"
//!
//! [rename]
//! prettify = true            # about.md → about/index.html
//! underscore = false         # _draft.md → draft/index.html when true
//!
//! [transform.js]
//! command = ["esbuild", "--sourcemap"]
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Component, Path};
use thiserror::Error;

/// File name looked up in the working directory when `--config` is absent.
pub const CONFIG_FILENAME: &str = "strata.toml";

/// Version of the running engine, compared against `version` in configs.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error(
        "Build canceled. The configuration requires strata {required} or newer, but this is strata {running}. Upgrade strata, or lower `version` in the configuration."
    )]
    VersionTooOld { required: String, running: String },
    #[error(
        "Build canceled. This is strata {running}, one or more major versions above the {required} the configuration was written for. Raise `version` in the configuration, or downgrade strata."
    )]
    MajorVersionMismatch { required: String, running: String },
}

/// Site configuration loaded from `strata.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Minimum engine version (semver).
    pub version: Option<String>,
    /// Output directory, relative to the working directory.
    pub destination: String,
    /// Source directories in precedence order. A single string is accepted.
    #[serde(deserialize_with = "string_or_list")]
    pub sources: Vec<String>,
    /// Per-stage bound on in-flight files. Unbounded when absent.
    pub concurrency: Option<usize>,
    /// Site-wide values exposed to templates as `site`.
    pub metadata: Map<String, Value>,
    pub rename: RenameConfig,
    pub extensions: ExtensionsConfig,
    pub transform: TransformConfig,
    pub minify: MinifyConfig,
    pub development: DevelopmentConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            version: None,
            destination: "dst".to_string(),
            sources: vec!["src".to_string()],
            concurrency: None,
            metadata: Map::new(),
            rename: RenameConfig::default(),
            extensions: ExtensionsConfig::default(),
            transform: TransformConfig::default(),
            minify: MinifyConfig::default(),
            development: DevelopmentConfig::default(),
        }
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(source) => vec![source],
        OneOrMany::Many(sources) => sources,
    })
}

impl SiteConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::Validation("sources must not be empty".into()));
        }
        for (i, source) in self.sources.iter().enumerate() {
            validate_relative("sources", source)?;
            if self.sources[..i].contains(source) {
                return Err(ConfigError::Validation(format!(
                    "sources lists `{source}` more than once"
                )));
            }
        }
        validate_relative("destination", &self.destination)?;
        if self.sources.contains(&self.destination) {
            return Err(ConfigError::Validation(format!(
                "destination `{}` is also a source",
                self.destination
            )));
        }
        if self.concurrency == Some(0) || self.development.concurrency == Some(0) {
            return Err(ConfigError::Validation(
                "concurrency must be a positive integer".into(),
            ));
        }
        if let Some(version) = &self.version {
            semver::Version::parse(version).map_err(|e| {
                ConfigError::Validation(format!("version `{version}` is not semver: {e}"))
            })?;
        }
        for (name, timeout_secs) in [
            ("css", self.transform.css.timeout_secs),
            ("js", self.transform.js.timeout_secs),
        ] {
            if timeout_secs == 0 {
                return Err(ConfigError::Validation(format!(
                    "transform.{name}.timeout_secs must be positive"
                )));
            }
        }
        let js = &self.transform.js;
        if let Some(suffix) = js.artifacts.iter().find(|s| js.dumps.contains(s)) {
            return Err(ConfigError::Validation(format!(
                "transform.js companion `{suffix}` is both an artifact and a dump"
            )));
        }
        Ok(())
    }

    /// Apply the `[development]` overrides for a development run.
    ///
    /// `development.concurrency` replaces `concurrency`, and an existing
    /// `metadata.site_url` is pointed at the local host and port. Builds
    /// call this after the sources' `metadata.json` layers are merged into
    /// `metadata`.
    pub fn apply_development(&mut self) {
        if let Some(concurrency) = self.development.concurrency {
            self.concurrency = Some(concurrency);
        }
        if self.metadata.contains_key("site_url") {
            let address = format!("{}:{}", self.development.host, self.development.port);
            let url = if address.starts_with("http://") || address.starts_with("https://") {
                address
            } else {
                format!("http://{address}")
            };
            tracing::debug!("development site_url is {url}");
            self.metadata.insert("site_url".into(), Value::String(url));
        }
    }

    /// Configured `metadata.site_url`, if it is a string.
    pub fn site_url(&self) -> Option<&str> {
        self.metadata.get("site_url").and_then(Value::as_str)
    }
}

fn validate_relative(field: &str, path: &str) -> Result<(), ConfigError> {
    let p = Path::new(path);
    if path.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{field} entries must not be empty")));
    }
    if p.is_absolute()
        || p.components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(ConfigError::Validation(format!(
            "{field} `{path}` must be a relative path inside the working directory"
        )));
    }
    Ok(())
}

/// Compare the configured minimum version against the running engine.
///
/// Running older than required, or a different major version, is fatal.
pub fn check_version(required: &str, running: &str) -> Result<(), ConfigError> {
    let parse = |v: &str| {
        semver::Version::parse(v)
            .map_err(|e| ConfigError::Validation(format!("version `{v}` is not semver: {e}")))
    };
    let required_version = parse(required)?;
    let running_version = parse(running)?;

    if running_version < required_version {
        return Err(ConfigError::VersionTooOld {
            required: required.to_string(),
            running: running.to_string(),
        });
    }
    if running_version.major != required_version.major {
        return Err(ConfigError::MajorVersionMismatch {
            required: required.to_string(),
            running: running.to_string(),
        });
    }
    Ok(())
}

/// Content renaming rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenameConfig {
    /// `name.ext` → `name/index.ext` for every page not already an index.
    pub prettify: bool,
    /// Strip one leading `_` from content file names.
    pub underscore: bool,
    /// Extensions that a render engine consumes.
    pub resolvable: Vec<String>,
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self {
            prettify: true,
            underscore: false,
            resolvable: vec!["md".into(), "markdown".into(), "tera".into()],
        }
    }
}

/// Allow-lists of file extensions picked up from `content` and `static`.
/// `"*"` allows every file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtensionsConfig {
    pub content: Vec<String>,
    #[serde(rename = "static")]
    pub static_files: Vec<String>,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            content: ["md", "markdown", "tera", "html", "htm", "txt", "xml", "json"]
                .map(String::from)
                .to_vec(),
            static_files: vec!["*".into()],
        }
    }
}

impl ExtensionsConfig {
    /// Whether a file name passes the allow-list. Compares the last extension.
    pub fn allows(list: &[String], file_name: &str) -> bool {
        if list.iter().any(|e| e == "*") {
            return true;
        }
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => list.iter().any(|e| e.eq_ignore_ascii_case(ext)),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    pub markdown: MarkdownConfig,
    pub css: CommandConfig,
    pub js: ScriptConfig,
}

/// Markdown rendering options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkdownConfig {
    /// Pass raw HTML through. When false it is escaped.
    pub html: bool,
    /// Give headings `id` attributes derived from their text.
    pub anchors: bool,
    pub tables: bool,
    pub footnotes: bool,
    pub strikethrough: bool,
    pub tasklists: bool,
    pub smart_punctuation: bool,
    /// Emit fenced code as `<pre class="hljs"><code class="language-x">` for
    /// a client-side highlighter and its stylesheet.
    pub highlight: bool,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            html: true,
            anchors: true,
            tables: true,
            footnotes: true,
            strikethrough: true,
            tasklists: true,
            smart_punctuation: false,
            highlight: false,
        }
    }
}

/// An external transform command.
///
/// `command` is an argv list. `{input}` and `{output}` are replaced by
/// scratch file paths; without `{input}` the file is piped through
/// stdin/stdout. An empty command disables the stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandConfig {
    pub command: Vec<String>,
    pub patterns: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            patterns: vec!["static/*.css".into()],
            timeout_secs: 30,
        }
    }
}

/// JS/TS transform: an external command plus the companion files it emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptConfig {
    pub command: Vec<String>,
    pub patterns: Vec<String>,
    pub timeout_secs: u64,
    /// Companions (`{output}.<suffix>`) that continue through later stages.
    pub artifacts: Vec<String>,
    /// Companions written as-is, skipping later stages.
    pub dumps: Vec<String>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            patterns: vec!["static/*.js".into(), "static/*.ts".into()],
            timeout_secs: 30,
            artifacts: vec!["map".into()],
            dumps: Vec::new(),
        }
    }
}

impl ScriptConfig {
    pub fn as_command(&self) -> CommandConfig {
        CommandConfig {
            command: self.command.clone(),
            patterns: self.patterns.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MinifyConfig {
    pub html: bool,
    pub css: bool,
    pub js: bool,
    pub keep_comments: bool,
}

impl Default for MinifyConfig {
    fn default() -> Self {
        Self {
            html: true,
            css: true,
            js: true,
            keep_comments: false,
        }
    }
}

/// Overrides applied by `--development`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DevelopmentConfig {
    pub host: String,
    pub port: u16,
    pub concurrency: Option<usize>,
}

impl Default for DevelopmentConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8080,
            concurrency: None,
        }
    }
}

/// Per-run switches, set from the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Skip minification and point `site_url` at the local dev server.
    pub development: bool,
    /// Delete the destination before building.
    pub remove: bool,
    /// Rebuild every file regardless of the build manifest.
    pub no_changed: bool,
    pub no_transform_css: bool,
    pub no_transform_js: bool,
    pub no_minify: bool,
}

impl RunOptions {
    pub fn minify(&self) -> bool {
        !self.development && !self.no_minify
    }
}

/// Resolve the worker-thread count for the resolver's stat pool.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(concurrency: Option<usize>) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    concurrency.map(|n| n.clamp(1, cores)).unwrap_or(cores)
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(SiteConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SiteConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SiteConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from a file, falling back to stock defaults if it is absent.
pub fn load_config(path: &Path) -> Result<SiteConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `strata.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Strata Configuration
# ====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# Minimum strata version this site was written for. A newer major version
# or an older strata refuses to build.
# version = "1.0.0"

# Output directory, relative to the working directory.
destination = "dst"

# Source directories in precedence order. A file present in several sources
# is taken from the first one listed. Each source may contain `content/`,
# `static/`, `layouts/`, `partials/`, `helpers/`, `decorators/` and a
# `metadata.json` file.
sources = ["src"]

# Maximum number of files processed at once within a stage.
# Omit for no limit.
# concurrency = 16

# ---------------------------------------------------------------------------
# Site metadata, available to templates as `site`
# ---------------------------------------------------------------------------
[metadata]
# site_url = "https://example.com"

# ---------------------------------------------------------------------------
# Output paths
# ---------------------------------------------------------------------------
[rename]
# about.md -> about/index.html
prettify = true
# Strip a leading underscore from content file names.
underscore = false
# Extensions consumed by a render engine.
resolvable = ["md", "markdown", "tera"]

# ---------------------------------------------------------------------------
# Files picked up from each source ("*" = everything)
# ---------------------------------------------------------------------------
[extensions]
content = ["md", "markdown", "tera", "html", "htm", "txt", "xml", "json"]
static = ["*"]

# ---------------------------------------------------------------------------
# Transforms
# ---------------------------------------------------------------------------
[transform.markdown]
html = true               # Pass raw HTML through
anchors = true            # id attributes on headings
tables = true
footnotes = true
strikethrough = true
tasklists = true
smart_punctuation = false
highlight = false         # hljs markup on fenced code blocks

# External commands. `{input}`/`{output}` are replaced with file paths;
# without `{input}` the file is piped through stdin/stdout.
[transform.css]
command = []              # e.g. ["lightningcss", "{input}", "-o", "{output}"]
patterns = ["static/*.css"]
timeout_secs = 30

[transform.js]
command = []              # e.g. ["esbuild", "{input}", "--outfile={output}", "--sourcemap"]
patterns = ["static/*.js", "static/*.ts"]
timeout_secs = 30
artifacts = ["map"]       # Companions that are minified and written
dumps = []                # Companions written untouched, e.g. ["ast"]

# ---------------------------------------------------------------------------
# Minification (skipped with --development or --no-minify)
# ---------------------------------------------------------------------------
[minify]
html = true
css = true
js = true
keep_comments = false

# ---------------------------------------------------------------------------
# Development mode (--development)
# ---------------------------------------------------------------------------
[development]
host = "localhost"
port = 8080
# concurrency = 4
"##
}
