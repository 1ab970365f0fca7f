// src/testgen/cache.rs
//
// On-disk archive cache shared by every worker for the whole run (and
// across runs). Entries are append-only and never evicted.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use walkdir::WalkDir;

/// Registry coordinates of one published archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Coordinates {
    #[serde(rename = "g")]
    pub group: String,
    #[serde(rename = "a")]
    pub artifact: String,
    #[serde(rename = "v")]
    pub version: String,
}

impl Coordinates {
    pub fn new(group: impl Into<String>, artifact: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
            version: version.into(),
        }
    }

    /// Cache identity: `<artifact>-<version>.jar`
    pub fn file_name(&self) -> String {
        format!("{}-{}.jar", self.artifact, self.version)
    }
}

#[derive(Debug)]
pub struct DependencyCache {
    dir: PathBuf,
    // file name -> writer lock, so two workers never stage the same entry at once
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    staging_seq: AtomicU64,
}

impl DependencyCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writers: Mutex::new(HashMap::new()),
            staging_seq: AtomicU64::new(0),
        }
    }

    /// Creates the cache directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let cache = Self::new(dir);
        fs::create_dir_all(&cache.dir)?;
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, coords: &Coordinates) -> PathBuf {
        self.dir.join(coords.file_name())
    }

    pub fn lookup(&self, coords: &Coordinates) -> Option<PathBuf> {
        let path = self.path_for(coords);
        path.is_file().then_some(path)
    }

    /// Every archive currently in the cache, sorted for a stable classpath.
    pub fn archives(&self) -> Vec<PathBuf> {
        if !self.dir.is_dir() {
            return Vec::new();
        }

        let mut out: Vec<PathBuf> = WalkDir::new(&self.dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jar"))
            .collect();

        out.sort();
        out
    }

    /// Returns the cached entry, or runs `fetch` into a private staging file
    /// and renames it into place. A failed fetch leaves no file behind.
    pub fn install<E, F>(&self, coords: &Coordinates, fetch: F) -> Result<PathBuf, E>
    where
        F: FnOnce(&Path) -> Result<(), E>,
        E: From<io::Error>,
    {
        let name = coords.file_name();
        let lock = self.writer_lock(&name);
        let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());

        // someone else may have finished while we waited
        let final_path = self.dir.join(&name);
        if final_path.is_file() {
            return Ok(final_path);
        }

        fs::create_dir_all(&self.dir)?;

        let seq = self.staging_seq.fetch_add(1, Ordering::Relaxed);
        let staging = self
            .dir
            .join(format!(".{name}.{}-{seq}.part", std::process::id()));

        if let Err(e) = fetch(&staging) {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }

        if let Err(e) = fs::rename(&staging, &final_path) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }

        Ok(final_path)
    }

    fn writer_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut map = self.writers.lock().unwrap_or_else(|p| p.into_inner());
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
