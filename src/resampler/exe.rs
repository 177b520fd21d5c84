//! External executable resampler backend.
//!
//! Drives a classic UTAU resampler through its positional command line and
//! decodes the wav it produces. Every failure mode here (missing
//! executable, nonzero exit, timeout, undecodable output) degrades to an
//! empty segment: one broken voice sample must not abort the phrase.

use std::path::{Path, PathBuf};

use crate::item::RenderItem;
use crate::process::{self, RunOutcome};
use crate::protocol;
use crate::wav;

use super::manifest::ResamplerManifest;

pub struct ExeResampler {
    path: PathBuf,
    name: String,
    manifest: ResamplerManifest,
}

impl ExeResampler {
    /// Wrap an executable found under `base_path`. The backend name is the
    /// path relative to the tools root, matching how users refer to it.
    pub fn new(path: &Path, base_path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let name = path
            .strip_prefix(base_path)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        let manifest = ResamplerManifest::for_tool(path);
        Some(Self {
            path: path.to_path_buf(),
            name,
            manifest,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn supports_flag(&self, abbr: &str) -> bool {
        self.manifest.supports(abbr)
    }

    /// Render and decode to mono samples. Empty on any failure.
    pub fn render(&self, item: &RenderItem) -> Vec<f32> {
        match self.render_to_file(item) {
            Some(path) => wav::read_mono(&path).unwrap_or_else(|e| {
                log::error!("failed to decode resampler output {}: {e}", path.display());
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    /// Invoke the executable; the output lands at `item.output_file`.
    /// Returns `None` when no usable file was produced.
    pub fn render_to_file(&self, item: &RenderItem) -> Option<PathBuf> {
        if !self.path.exists() {
            log::warn!(
                "resampler {} missing at {}, rendering \"{}\" as silence",
                self.name,
                self.path.display(),
                item.phoneme
            );
            return None;
        }
        let args = protocol::resampler_args(item);
        match process::run(&self.path, &args, None, process::DEFAULT_TIMEOUT) {
            Ok(RunOutcome::Exited(status)) if status.success() => {}
            Ok(RunOutcome::Exited(status)) => {
                log::error!(
                    "resampler {} exited with {status} for \"{}\"",
                    self.name,
                    item.phoneme
                );
                return None;
            }
            Ok(RunOutcome::TimedOut) => {
                log::error!("resampler {} timed out for \"{}\"", self.name, item.phoneme);
                return None;
            }
            Err(e) => {
                log::error!("failed to spawn resampler {}: {e}", self.name);
                return None;
            }
        }
        if item.output_file.exists() {
            Some(item.output_file.clone())
        } else {
            log::error!(
                "resampler {} reported success but wrote no file for \"{}\"",
                self.name,
                item.phoneme
            );
            None
        }
    }

    /// File-based tools fetched from archives routinely lose their
    /// executable bit; restore it so spawning does not fail with EACCES.
    pub fn check_permissions(&self) {
        ensure_executable(&self.path);
    }
}

#[cfg(unix)]
pub(crate) fn ensure_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        let mut perms = meta.permissions();
        if perms.mode() & 0o111 == 0 {
            perms.set_mode(0o755);
            if let Err(e) = std::fs::set_permissions(path, perms) {
                log::warn!("could not set executable bit on {}: {e}", path.display());
            }
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn ensure_executable(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_executable_renders_silence() {
        let (_dir, item) = crate::item::tests_support::sample_item();
        let backend = ExeResampler {
            path: PathBuf::from("/nonexistent/resamp"),
            name: "resamp".into(),
            manifest: ResamplerManifest::default(),
        };
        assert!(backend.render_to_file(&item).is_none());
        assert!(backend.render(&item).is_empty());
    }

    #[test]
    fn failing_tool_renders_silence() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("failer.sh");
        fs::write(&tool, "#!/bin/sh\nexit 1\n").unwrap();
        let backend = ExeResampler::new(&tool, dir.path()).unwrap();
        backend.check_permissions();

        let (_cache_dir, item) = crate::item::tests_support::sample_item();
        assert!(backend.render_to_file(&item).is_none());
    }

    #[test]
    fn fake_tool_output_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let (_cache_dir, item) = crate::item::tests_support::sample_item();

        // A stand-in resampler that writes a fixed wav to its second arg.
        let canned = dir.path().join("canned.wav");
        crate::wav::write_mono(&canned, &[0.25f32; 441]).unwrap();
        let tool = dir.path().join("fake-resamp.sh");
        fs::write(
            &tool,
            format!("#!/bin/sh\ncp \"{}\" \"$2\"\n", canned.display()),
        )
        .unwrap();

        let backend = ExeResampler::new(&tool, dir.path()).unwrap();
        backend.check_permissions();
        let samples = backend.render(&item);
        assert_eq!(samples.len(), 441);
        assert!((samples[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn name_is_relative_to_tools_root() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("moresampler");
        fs::create_dir_all(&sub).unwrap();
        let tool = sub.join("resamp.sh");
        fs::write(&tool, "#!/bin/sh\n").unwrap();
        let backend = ExeResampler::new(&tool, dir.path()).unwrap();
        assert_eq!(backend.name(), "moresampler/resamp.sh");
    }
}
