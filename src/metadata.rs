//! Layered site metadata.
//!
//! Templates see one `site` object assembled from two places:
//!
//! ## Source files (read at run start)
//!
//! - **`metadata.json`** at the root of each source directory. A theme can
//!   ship defaults (`title`, `nav`) that a site source overrides key by key.
//!
//! ## Configuration
//!
//! - **`[metadata]`** in `strata.toml`, merged last.
//!
//! ## Resolution priority
//!
//! Objects are merged recursively; any other value replaces what came before:
//!
//! ```text
//! theme/metadata.json  →  src/metadata.json  →  [metadata]
//! (lowest)                                     (highest)
//! ```
//!
//! A missing file contributes nothing. An unreadable or malformed file is
//! logged and skipped; the build continues without it.

use crate::types::SourceDirectory;
use serde_json::{Map, Value};
use std::path::Path;

/// File name looked up at the root of every source directory.
pub const METADATA_FILENAME: &str = "metadata.json";

/// Recursively merge `overlay` into `base`.
///
/// - Objects are merged key-by-key (overlay keys override base keys).
/// - Non-object values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_val) => merge_json(base_val, overlay_val),
                    None => {
                        base_map.insert(key, overlay_val);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Read one source's `metadata.json`.
///
/// Returns `None` if the file is absent, unreadable, or not a JSON object.
pub fn load_source_metadata(root: &Path) -> Option<Map<String, Value>> {
    let path = root.join(METADATA_FILENAME);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("ignoring {}: {e}", path.display());
            return None;
        }
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            tracing::warn!("ignoring {}: not a JSON object", path.display());
            None
        }
        Err(e) => {
            tracing::warn!("ignoring {}: {e}", path.display());
            None
        }
    }
}

/// Merge every source's `metadata.json` (lowest precedence first) and then
/// the configured metadata on top.
pub fn layered_metadata(
    sources: &[SourceDirectory],
    configured: &Map<String, Value>,
) -> Map<String, Value> {
    let mut merged = Value::Object(Map::new());

    let mut ordered: Vec<&SourceDirectory> = sources.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
    for source in ordered {
        if let Some(layer) = load_source_metadata(&source.root) {
            tracing::debug!("merging {} from {}", METADATA_FILENAME, source.label());
            merge_json(&mut merged, Value::Object(layer));
        }
    }
    merge_json(&mut merged, Value::Object(configured.clone()));

    match merged {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
