//! Content-addressed render cache.
//!
//! Every expensive artifact (per-phone resampler output, source temp copy)
//! lives in one flat cache directory under a name derived from xxHash
//! digests of its contributing inputs, so identical jobs hit the same file
//! across runs. A process-wide lock registry keyed by file name serializes
//! concurrent writers of the same artifact; the age-based sweep takes the
//! same locks so it cannot race an in-flight writer.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use xxhash_rust::xxh32::xxh32;

use crate::error::RenderError;

/// Sidecar extensions that classic resamplers read or write next to the
/// source sample (frequency maps and other precomputed analysis). They are
/// copied to the temp location before rendering and copied back after, so
/// analysis produced by one run is kept for the next.
const META_SUFFIXES: &[&str] = &[
    ".llsm", ".uspec", ".dio", ".star", ".platinum", ".frc", ".pmk", ".vs4ufrq",
];

pub struct RenderCache {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RenderCache {
    /// Open (creating if needed) the cache directory. Fails early if the
    /// directory cannot be written, since nothing downstream can work then.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, RenderError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let probe = root.join(".probe");
        if fs::write(&probe, b"").is_err() {
            return Err(RenderError::CacheDirUnwritable(root));
        }
        let _ = fs::remove_file(&probe);
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mutual-exclusion handle for one cache key. At most one caller works
    /// on a given artifact at a time; everyone else blocks on the same Arc.
    pub fn lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Cache path of a rendered phone: `res-<singer>-<item hash>.wav`.
    pub fn resampler_output_path(&self, singer_id: &str, item_hash: u64) -> PathBuf {
        self.root.join(format!(
            "res-{:08x}-{:016x}.wav",
            xxh32(singer_id.as_bytes(), 0),
            item_hash
        ))
    }

    /// Cache path of the writable source copy handed to external
    /// resamplers: `src-<singer>-<oto set>-<file>.<ext>`.
    pub fn source_temp_path(&self, singer_id: &str, oto_set: &str, file: &Path) -> PathBuf {
        let ext = file
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        self.root.join(format!(
            "src-{:08x}-{:08x}-{:08x}{}",
            xxh32(singer_id.as_bytes(), 0),
            xxh32(oto_set.as_bytes(), 0),
            xxh32(file.to_string_lossy().as_bytes(), 0),
            ext
        ))
    }

    /// Copy the source sample and its analysis sidecars to the temp
    /// location, write-once under the temp file's lock.
    pub fn copy_source_temp(&self, source: &Path, temp: &Path) -> std::io::Result<()> {
        let guard = self.lock(&key_of(temp));
        let _held = guard.lock().unwrap();
        copy_if_missing(source, temp)?;
        for (src, dst) in meta_files(source, temp) {
            if src.exists() {
                copy_if_missing(&src, &dst)?;
            }
        }
        Ok(())
    }

    /// Copy back sidecars an external resampler generated next to the temp
    /// copy, so the analysis survives the next sweep of the cache.
    pub fn copy_back_meta(&self, source: &Path, temp: &Path) -> std::io::Result<()> {
        let guard = self.lock(&key_of(temp));
        let _held = guard.lock().unwrap();
        for (src, dst) in meta_files(source, temp) {
            if dst.exists() {
                copy_if_missing(&dst, &src)?;
            }
        }
        Ok(())
    }

    /// Delete cache artifacts older than `max_age`. Returns the number of
    /// files removed. Each file is removed under its own lock, so a writer
    /// holding the lock finishes before the sweep can touch its file.
    pub fn sweep(&self, max_age: Duration) -> std::io::Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("res-") && !name.starts_with("src-") {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            let age = meta
                .modified()
                .ok()
                .and_then(|t| now.duration_since(t).ok());
            if age.map(|a| a > max_age).unwrap_or(false) {
                let guard = self.lock(&name);
                let _held = guard.lock().unwrap();
                if fs::remove_file(entry.path()).is_ok() {
                    log::debug!("swept stale cache file {name}");
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

fn key_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn copy_if_missing(source: &Path, dest: &Path) -> std::io::Result<()> {
    if !dest.exists() {
        log::trace!("copy {} -> {}", source.display(), dest.display());
        fs::copy(source, dest)?;
    }
    Ok(())
}

/// Pairs of (original, temp) sidecar paths for one source sample. The frq
/// map uses the flattened-extension convention: `a.wav` -> `a_wav.frq`.
fn meta_files(source: &Path, temp: &Path) -> Vec<(PathBuf, PathBuf)> {
    let mut pairs = Vec::new();
    let frq = |p: &Path| -> Option<PathBuf> {
        let ext = p.extension()?.to_string_lossy().into_owned();
        let stem = p.with_extension("");
        Some(PathBuf::from(format!("{}_{}.frq", stem.display(), ext)))
    };
    if let (Some(a), Some(b)) = (frq(source), frq(temp)) {
        pairs.push((a, b));
    }
    for suffix in META_SUFFIXES {
        pairs.push((
            append_suffix(source, suffix),
            append_suffix(temp, suffix),
        ));
    }
    pairs
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{}", path.display(), suffix))
}
