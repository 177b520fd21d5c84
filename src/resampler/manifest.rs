//! YAML sidecar manifest for external resamplers.
//!
//! A resampler executable may ship a `.yaml` file next to it declaring
//! which expression flags it honors. When present and `expression_filter`
//! is set, flags with unknown abbreviations are dropped before they reach
//! the command line (and before hashing, so the cache key stays honest).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResamplerManifest {
    /// Only meaningful when `expression_filter` is true.
    pub expression_filter: bool,
    /// Honored expressions keyed by abbreviation, e.g. `gen`, `bre`.
    pub expressions: BTreeMap<String, ExpressionDef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionDef {
    /// Flag key as it appears on the command line, e.g. `g`.
    pub flag: String,
    pub min: i32,
    pub max: i32,
    pub default: i32,
}

impl ResamplerManifest {
    pub fn load(path: &Path) -> Result<Self, serde_yaml::Error> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| {
                <serde_yaml::Error as serde::de::Error>::custom(format!(
                    "{}: {e}",
                    path.display()
                ))
            })?;
        serde_yaml::from_str(&text)
    }

    /// Load the manifest sitting next to `tool_path` (same stem, `.yaml`).
    /// Absent or malformed manifests fall back to the permissive default;
    /// a resampler must stay usable even with a broken sidecar.
    pub fn for_tool(tool_path: &Path) -> Self {
        let manifest_path = tool_path.with_extension("yaml");
        if !manifest_path.exists() {
            return Self::default();
        }
        match Self::load(&manifest_path) {
            Ok(manifest) => manifest,
            Err(e) => {
                log::error!(
                    "failed to load resampler manifest {}: {e}",
                    manifest_path.display()
                );
                Self::default()
            }
        }
    }

    pub fn supports(&self, abbr: &str) -> bool {
        !self.expression_filter || self.expressions.contains_key(abbr)
    }
}
