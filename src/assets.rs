//! Render-time assets: partials, layouts, helpers and decorators.
//!
//! Each source directory may provide four asset subtrees. They are resolved
//! once per build with the same precedence rule as content files and then
//! handed read-only to the render stages.
//!
//! ```text
//! src/
//! ├── partials/nav.tera        → {% include "partials/nav" %}
//! ├── layouts/base.tera        → wraps every page (front matter `layout`)
//! ├── helpers/year.toml        → {{ year() }}
//! └── decorators/shout.toml    → {{ title | shout }}
//! ```
//!
//! ## Names
//!
//! An asset is named by its path relative to the subtree root with the last
//! extension removed: `partials/blog/card.tera` is `blog/card`.
//!
//! ## Helpers and decorators
//!
//! Executable assets are never loaded from arbitrary code. A descriptor
//! binds a name to a callable registered in a [`PluginRegistry`] at compile
//! time, plus parameters:
//!
//! ```toml
//! # helpers/year.toml
//! builtin = "literal"
//! [params]
//! value = 2024
//! ```
//!
//! Helpers become template functions, decorators become template filters.
//! Bound parameters are merged under the call's own arguments.
//!
//! ## Failure handling
//!
//! An asset that cannot be read or parsed (including partials and layouts
//! with template syntax errors), or names an unregistered builtin, is
//! logged and skipped. The next-highest-precedence definition of the same
//! name is used instead, if any.

use crate::manifest::hash_bytes;
use crate::render::error_chain;
use crate::resolve::{ResolveError, walk_subtree};
use crate::types::{SourceDirectory, Subtree};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid descriptor: {0}")]
    Descriptor(#[from] toml::de::Error),
    #[error("`{0}` is not a registered builtin")]
    UnknownBuiltin(String),
    #[error("asset text is not UTF-8")]
    NotUtf8,
    #[error("{}", error_chain(.0))]
    Template(#[from] tera::Error),
}

/// Template function signature: bound parameters merged with call arguments.
pub type HelperFn = dyn Fn(&HashMap<String, Value>) -> tera::Result<Value> + Send + Sync;
/// Template filter signature: the filtered value plus merged arguments.
pub type DecoratorFn =
    dyn Fn(&Value, &HashMap<String, Value>) -> tera::Result<Value> + Send + Sync;

/// Compile-time table of callables that descriptors may bind to.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    helpers: BTreeMap<String, Arc<HelperFn>>,
    decorators: BTreeMap<String, Arc<DecoratorFn>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("helpers", &self.helpers.keys().collect::<Vec<_>>())
            .field("decorators", &self.decorators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    /// Registry with the stock helpers and decorators.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register_helper("literal", builtins::literal);
        registry.register_helper("concat", builtins::concat);
        registry.register_helper("url", builtins::url);
        registry.register_decorator("upper", builtins::upper);
        registry.register_decorator("lower", builtins::lower);
        registry.register_decorator("trim", builtins::trim);
        registry.register_decorator("prefix", builtins::prefix);
        registry.register_decorator("suffix", builtins::suffix);
        registry.register_decorator("replace", builtins::replace);
        registry
    }

    pub fn register_helper<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&HashMap<String, Value>) -> tera::Result<Value> + Send + Sync + 'static,
    {
        self.helpers.insert(name.to_string(), Arc::new(f));
    }

    pub fn register_decorator<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&Value, &HashMap<String, Value>) -> tera::Result<Value> + Send + Sync + 'static,
    {
        self.decorators.insert(name.to_string(), Arc::new(f));
    }
}

/// Contents of a helper or decorator `.toml` file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Descriptor {
    builtin: String,
    #[serde(default)]
    params: Map<String, Value>,
}

fn merged_args(params: &Map<String, Value>, args: &HashMap<String, Value>) -> HashMap<String, Value> {
    let mut merged: HashMap<String, Value> = params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    merged.extend(args.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// A helper bound to its descriptor parameters.
#[derive(Clone)]
pub struct BoundHelper {
    func: Arc<HelperFn>,
    params: Map<String, Value>,
}

impl tera::Function for BoundHelper {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        (self.func)(&merged_args(&self.params, args))
    }
}

/// A decorator bound to its descriptor parameters.
#[derive(Clone)]
pub struct BoundDecorator {
    func: Arc<DecoratorFn>,
    params: Map<String, Value>,
}

impl tera::Filter for BoundDecorator {
    fn filter(&self, value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
        (self.func)(value, &merged_args(&self.params, args))
    }
}

/// A resolved asset and the source it came from.
#[derive(Clone)]
pub struct Asset<T> {
    pub source: usize,
    pub path: PathBuf,
    /// Raw file bytes, used for the build fingerprint.
    raw: Vec<u8>,
    pub value: T,
}

/// Every asset kind, resolved by precedence.
#[derive(Clone, Default)]
pub struct AssetTable {
    pub partials: BTreeMap<String, Asset<String>>,
    pub layouts: BTreeMap<String, Asset<String>>,
    pub helpers: BTreeMap<String, Asset<BoundHelper>>,
    pub decorators: BTreeMap<String, Asset<BoundDecorator>>,
}

impl AssetTable {
    /// Resolve all asset subtrees of `sources`.
    ///
    /// Only directory enumeration failures are returned as errors; broken
    /// individual assets are skipped.
    pub fn load(sources: &[SourceDirectory], registry: &PluginRegistry) -> Result<Self, ResolveError> {
        let partials = load_kind(sources, Subtree::Partials, &["tera", "html"], load_text)?;
        let layouts = load_kind(sources, Subtree::Layouts, &["tera", "html"], load_text)?;
        let helpers = load_kind(sources, Subtree::Helpers, &["toml"], |raw| {
            let descriptor = parse_descriptor(raw)?;
            let func = registry
                .helpers
                .get(&descriptor.builtin)
                .ok_or_else(|| AssetError::UnknownBuiltin(descriptor.builtin.clone()))?;
            Ok(BoundHelper {
                func: Arc::clone(func),
                params: descriptor.params,
            })
        })?;
        let decorators = load_kind(sources, Subtree::Decorators, &["toml"], |raw| {
            let descriptor = parse_descriptor(raw)?;
            let func = registry
                .decorators
                .get(&descriptor.builtin)
                .ok_or_else(|| AssetError::UnknownBuiltin(descriptor.builtin.clone()))?;
            Ok(BoundDecorator {
                func: Arc::clone(func),
                params: descriptor.params,
            })
        })?;

        Ok(Self {
            partials,
            layouts,
            helpers,
            decorators,
        })
    }

    /// Register every asset with a template engine.
    ///
    /// Partials are named `partials/<name>`, layouts `layouts/<name>`.
    pub fn register(&self, tera: &mut tera::Tera) -> tera::Result<()> {
        let templates = self
            .partials
            .iter()
            .map(|(name, a)| (format!("partials/{name}"), a.value.as_str()))
            .chain(
                self.layouts
                    .iter()
                    .map(|(name, a)| (format!("layouts/{name}"), a.value.as_str())),
            );
        tera.add_raw_templates(templates)?;
        for (name, helper) in &self.helpers {
            tera.register_function(name, helper.value.clone());
        }
        for (name, decorator) in &self.decorators {
            tera.register_filter(name, decorator.value.clone());
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.partials.len() + self.layouts.len() + self.helpers.len() + self.decorators.len()
    }

    /// SHA-256 over every resolved asset, so that editing a layout or partial
    /// invalidates the build manifest.
    pub fn fingerprint(&self) -> String {
        let mut buf = Vec::new();
        let mut add = |kind: &str, name: &str, raw: &[u8]| {
            buf.extend_from_slice(kind.as_bytes());
            buf.push(0);
            buf.extend_from_slice(name.as_bytes());
            buf.push(0);
            buf.extend_from_slice(&(raw.len() as u64).to_le_bytes());
            buf.extend_from_slice(raw);
        };
        for (name, a) in &self.partials {
            add("partials", name, &a.raw);
        }
        for (name, a) in &self.layouts {
            add("layouts", name, &a.raw);
        }
        for (name, a) in &self.helpers {
            add("helpers", name, &a.raw);
        }
        for (name, a) in &self.decorators {
            add("decorators", name, &a.raw);
        }
        hash_bytes(&buf)
    }
}

/// Asset name: subtree-relative path without its last extension.
pub fn asset_name(relative: &str) -> Option<String> {
    let (dir, file) = match relative.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, relative),
    };
    let (stem, _) = file.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(match dir {
        Some(dir) => format!("{dir}/{stem}"),
        None => stem.to_string(),
    })
}

/// Template text that parses on its own. References to other templates are
/// resolved at render time.
fn load_text(raw: &[u8]) -> Result<String, AssetError> {
    let text = String::from_utf8(raw.to_vec()).map_err(|_| AssetError::NotUtf8)?;
    tera::Template::new("asset", None, &text)?;
    Ok(text)
}

fn parse_descriptor(raw: &[u8]) -> Result<Descriptor, AssetError> {
    let text = std::str::from_utf8(raw).map_err(|_| AssetError::NotUtf8)?;
    Ok(toml::from_str(text)?)
}

/// Collect all candidates of one kind and keep, per name, the
/// highest-precedence one that loads.
fn load_kind<T>(
    sources: &[SourceDirectory],
    subtree: Subtree,
    extensions: &[&str],
    load: impl Fn(&[u8]) -> Result<T, AssetError>,
) -> Result<BTreeMap<String, Asset<T>>, ResolveError> {
    let mut candidates: BTreeMap<String, Vec<(usize, PathBuf)>> = BTreeMap::new();
    for source in sources {
        for (relative, absolute) in walk_subtree(&source.subtree_root(subtree))? {
            let has_extension = relative
                .rsplit_once('.')
                .is_some_and(|(_, ext)| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)));
            if !has_extension {
                tracing::debug!("ignoring {}: not one of {:?}", absolute.display(), extensions);
                continue;
            }
            if let Some(name) = asset_name(&relative) {
                candidates.entry(name).or_default().push((source.priority, absolute));
            }
        }
    }

    let mut table = BTreeMap::new();
    for (name, mut entries) in candidates {
        entries.sort_by_key(|(priority, _)| *priority);
        for (priority, path) in entries {
            let loaded = std::fs::read(&path)
                .map_err(AssetError::from)
                .and_then(|raw| load(&raw).map(|value| (raw, value)));
            match loaded {
                Ok((raw, value)) => {
                    tracing::debug!("{subtree} `{name}` from {}", path.display());
                    table.insert(
                        name,
                        Asset {
                            source: priority,
                            path,
                            raw,
                            value,
                        },
                    );
                    break;
                }
                Err(e) => tracing::warn!("skipping {subtree} {}: {e}", path.display()),
            }
        }
    }
    Ok(table)
}

/// Stock callables available to descriptors.
mod builtins {
    use serde_json::Value;
    use std::collections::HashMap;

    fn text_arg<'a>(args: &'a HashMap<String, Value>, key: &str) -> tera::Result<&'a str> {
        args.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg(format!("missing string argument `{key}`")))
    }

    fn as_text(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Returns `value` unchanged.
    pub fn literal(args: &HashMap<String, Value>) -> tera::Result<Value> {
        args.get("value")
            .cloned()
            .ok_or_else(|| tera::Error::msg("missing argument `value`"))
    }

    /// Joins `items` with `separator` (default empty).
    pub fn concat(args: &HashMap<String, Value>) -> tera::Result<Value> {
        let items = args
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| tera::Error::msg("missing array argument `items`"))?;
        let separator = args.get("separator").and_then(Value::as_str).unwrap_or("");
        let parts: Vec<String> = items.iter().map(as_text).collect();
        Ok(Value::String(parts.join(separator)))
    }

    /// Joins `base` and `path` with exactly one `/`.
    pub fn url(args: &HashMap<String, Value>) -> tera::Result<Value> {
        let base = args.get("base").and_then(Value::as_str).unwrap_or("/");
        let path = text_arg(args, "path")?;
        Ok(Value::String(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )))
    }

    pub fn upper(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
        Ok(Value::String(as_text(value).to_uppercase()))
    }

    pub fn lower(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
        Ok(Value::String(as_text(value).to_lowercase()))
    }

    pub fn trim(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
        Ok(Value::String(as_text(value).trim().to_string()))
    }

    pub fn prefix(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
        Ok(Value::String(format!("{}{}", text_arg(args, "text")?, as_text(value))))
    }

    pub fn suffix(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
        Ok(Value::String(format!("{}{}", as_text(value), text_arg(args, "text")?)))
    }

    pub fn replace(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let from = text_arg(args, "from")?;
        let to = args.get("to").and_then(Value::as_str).unwrap_or("");
        Ok(Value::String(as_text(value).replace(from, to)))
    }
}
