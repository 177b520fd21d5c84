//! External wavtool driven through a generated shell script.
//!
//! Classic wavtools are invoked once per phone, accumulating into a shared
//! output file; the generated script feeds them through a small helper so
//! segments that were not resampled yet get resampled first. The tool
//! writes the output as a header/data pair which is merged afterwards.
//! Script generation and execution are serialized per cache directory
//! through the cache lock table.

use std::fs;
use std::path::{Path, PathBuf};

use xxhash_rust::xxh64::xxh64;

use crate::cache::RenderCache;
use crate::item::RenderItem;
use crate::process::{self, RunOutcome};
use crate::protocol::{self, HELPER_NAME, SCRIPT_NAME};
use crate::resampler;
use crate::wav;

pub struct ScriptWavtool {
    path: PathBuf,
    name: String,
}

impl ScriptWavtool {
    pub fn new(path: &Path, base_path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let name = path
            .strip_prefix(base_path)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        Some(Self {
            path: path.to_path_buf(),
            name,
        })
    }

    /// Scan a directory (recursively) for wavtool executables.
    pub fn discover(dir: &Path) -> Vec<ScriptWavtool> {
        let mut tools = Vec::new();
        if let Err(e) = scan_dir(dir, dir, &mut tools) {
            log::warn!("wavtool search in {} failed: {e}", dir.display());
        }
        tools
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drive the external tool over all items and decode the merged result.
    /// Empty on any failure; the caller treats that as a silent phrase.
    pub fn concatenate(
        &self,
        items: &[RenderItem],
        cache: &RenderCache,
        resolve_resampler: &dyn Fn(&str) -> String,
    ) -> Vec<f32> {
        if items.is_empty() {
            return Vec::new();
        }
        if let Err(e) = self.prepare_helper(cache) {
            log::error!("cannot write wavtool helper: {e}");
            return Vec::new();
        }

        let output = cache.root().join(output_name(items));
        let item_refs: Vec<&RenderItem> = items.iter().collect();
        let script = protocol::wavtool_script(
            &item_refs,
            &self.path,
            &output,
            cache.root(),
            resolve_resampler,
        );

        // One generated script file per cache dir; hold the lock across the
        // run so a concurrent phrase does not overwrite it mid-flight.
        let lock = cache.lock(SCRIPT_NAME);
        let _guard = lock.lock().unwrap();
        let script_path = cache.root().join(SCRIPT_NAME);
        if let Err(e) = fs::write(&script_path, script) {
            log::error!("cannot write wavtool script: {e}");
            return Vec::new();
        }
        match process::run(
            Path::new("/bin/sh"),
            &[SCRIPT_NAME.to_string()],
            Some(cache.root()),
            process::DEFAULT_TIMEOUT,
        ) {
            Ok(RunOutcome::Exited(status)) if status.success() => {}
            Ok(RunOutcome::Exited(status)) => {
                log::error!("wavtool {} exited with {status}", self.name);
                return Vec::new();
            }
            Ok(RunOutcome::TimedOut) => {
                log::error!("wavtool {} timed out", self.name);
                return Vec::new();
            }
            Err(e) => {
                log::error!("failed to run wavtool {}: {e}", self.name);
                return Vec::new();
            }
        }

        if let Err(e) = merge_header_data(&output) {
            log::error!("cannot merge wavtool output halves: {e}");
        }
        if !output.exists() {
            log::error!("wavtool {} produced no output", self.name);
            return Vec::new();
        }
        let samples = wav::read_mono(&output).unwrap_or_else(|e| {
            log::error!("cannot decode wavtool output {}: {e}", output.display());
            Vec::new()
        });
        let _ = fs::remove_file(&output);
        samples
    }

    fn prepare_helper(&self, cache: &RenderCache) -> std::io::Result<()> {
        let lock = cache.lock(HELPER_NAME);
        let _guard = lock.lock().unwrap();
        let path = cache.root().join(HELPER_NAME);
        if !path.exists() {
            fs::write(&path, protocol::helper_script())?;
        }
        Ok(())
    }

    pub fn check_permissions(&self) {
        resampler::exe::ensure_executable(&self.path);
    }
}

/// Classic wavtools append a `.whd` RIFF header and a `.dat` sample body
/// next to the output path; the real wav is their concatenation.
fn merge_header_data(output: &Path) -> std::io::Result<()> {
    let whd = output.with_extension("wav.whd");
    let dat = output.with_extension("wav.dat");
    if !whd.exists() || !dat.exists() {
        return Ok(());
    }
    let mut bytes = fs::read(&whd)?;
    bytes.extend(fs::read(&dat)?);
    fs::write(output, bytes)?;
    fs::remove_file(&whd)?;
    fs::remove_file(&dat)?;
    Ok(())
}

/// Per-phrase output name derived from the item hashes, so concurrent
/// phrases sharing one cache directory never collide.
fn output_name(items: &[RenderItem]) -> String {
    let mut buf = Vec::with_capacity(items.len() * 8);
    for item in items {
        buf.extend_from_slice(&item.hash.to_le_bytes());
    }
    format!("phrase-{:016x}.wav", xxh64(&buf, 0))
}

fn scan_dir(dir: &Path, base: &Path, tools: &mut Vec<ScriptWavtool>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            scan_dir(&path, base, tools)?;
        } else if resampler::is_tool_candidate(&path) {
            if let Some(tool) = ScriptWavtool::new(&path, base) {
                log::info!("found wavtool {}", tool.name());
                tools.push(tool);
            }
        }
    }
    Ok(())
}
