//! Resampler backends.
//!
//! A resampler turns one [`RenderItem`](crate::item::RenderItem) into a
//! decoded mono waveform (or a cached wav file). The set of backends is
//! closed: the in-process native engine and external executables
//! discovered in a tools directory. Selection happens at configuration
//! time through the [`crate::context::RenderContext`] registry.

pub mod exe;
pub mod manifest;
pub mod native;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::item::RenderItem;

pub use exe::ExeResampler;
pub use manifest::ResamplerManifest;
pub use native::{NativeResampler, NATIVE_NAME};

/// Capability contract shared by all backends.
pub trait Resampler {
    fn name(&self) -> &str;
    /// Decoded mono samples; empty when the job failed (backend missing,
    /// subprocess failure, undecodable output).
    fn render(&self, item: &RenderItem) -> Vec<f32>;
    /// Render into the item's cache path; `None` when no file was produced.
    fn render_to_file(&self, item: &RenderItem) -> Option<PathBuf>;
    fn supports_flag(&self, abbr: &str) -> bool;
    /// Repair whatever is needed to invoke the backend (executable bit on
    /// unix-like systems). No-op for in-process backends.
    fn check_permissions(&self);
}

pub enum ResamplerBackend {
    Native(NativeResampler),
    Exe(ExeResampler),
}

impl Resampler for ResamplerBackend {
    fn name(&self) -> &str {
        match self {
            Self::Native(_) => NATIVE_NAME,
            Self::Exe(exe) => exe.name(),
        }
    }

    fn render(&self, item: &RenderItem) -> Vec<f32> {
        match self {
            Self::Native(native) => native.render(item),
            Self::Exe(exe) => exe.render(item),
        }
    }

    fn render_to_file(&self, item: &RenderItem) -> Option<PathBuf> {
        match self {
            Self::Native(native) => native.render_to_file(item),
            Self::Exe(exe) => exe.render_to_file(item),
        }
    }

    fn supports_flag(&self, abbr: &str) -> bool {
        match self {
            Self::Native(native) => native.supports_flag(abbr),
            Self::Exe(exe) => exe.supports_flag(abbr),
        }
    }

    fn check_permissions(&self) {
        match self {
            Self::Native(_) => {}
            Self::Exe(exe) => exe.check_permissions(),
        }
    }
}

/// True when the file name looks like a tool we can invoke on this OS.
pub(crate) fn is_tool_candidate(path: &Path) -> bool {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    if cfg!(windows) {
        matches!(ext.as_deref(), Some("exe") | Some("bat"))
    } else {
        matches!(ext.as_deref(), Some("sh") | None)
    }
}

/// Scan a tools directory for external resamplers and register them under
/// their path relative to the root. The native backend is always present;
/// with no tools directory configured it is the only one.
pub fn discover(tools_dir: Option<&Path>) -> HashMap<String, ResamplerBackend> {
    let mut backends = HashMap::new();
    backends.insert(
        NATIVE_NAME.to_string(),
        ResamplerBackend::Native(NativeResampler),
    );
    if let Some(dir) = tools_dir {
        if let Err(e) = scan_dir(dir, dir, &mut backends) {
            log::warn!("resampler search in {} failed: {e}", dir.display());
        }
    }
    backends
}

fn scan_dir(
    dir: &Path,
    base: &Path,
    backends: &mut HashMap<String, ResamplerBackend>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            scan_dir(&path, base, backends)?;
        } else if is_tool_candidate(&path) {
            if let Some(exe) = ExeResampler::new(&path, base) {
                log::info!("found resampler {}", exe.name());
                backends.insert(exe.name().to_string(), ResamplerBackend::Exe(exe));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discovery_always_includes_native() {
        let dir = tempfile::tempdir().unwrap();
        let backends = discover(Some(dir.path()));
        assert!(backends.contains_key(NATIVE_NAME));
    }

    #[test]
    fn no_tools_dir_yields_native_without_scanning() {
        let backends = discover(None);
        assert_eq!(backends.len(), 1);
        assert!(backends.contains_key(NATIVE_NAME));
    }

    #[test]
    fn discovery_finds_nested_tools_and_skips_data_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("fresamp");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("fresamp.sh"), "#!/bin/sh\n").unwrap();
        fs::write(nested.join("readme.txt"), "not a tool").unwrap();
        fs::write(nested.join("fresamp.yaml"), "expression_filter: false").unwrap();

        let backends = discover(Some(dir.path()));
        assert!(backends.contains_key("fresamp/fresamp.sh"));
        assert!(!backends.keys().any(|k| k.contains("readme")));
        assert!(!backends.keys().any(|k| k.ends_with(".yaml")));
    }

    #[test]
    fn missing_tools_dir_still_yields_native() {
        let backends = discover(Some(Path::new("/nonexistent/tools")));
        assert_eq!(backends.len(), 1);
    }
}
