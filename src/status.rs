//! Status publication for external monitors
//!
//! The dispatcher writes detector state (timer state, target image, time
//! remaining, shutter, controlling pid) into a key/value snapshot persisted
//! under the configured status directory. Beamline tooling watches this file;
//! the connection supervisor reads it back when it reclaims control so cached
//! settings survive a controller change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const STATUS_FILE: &str = "status.json";

/// Persistent key/value status snapshot.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StatusStore {
    #[serde(skip)]
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl StatusStore {
    /// Open the store in `dir`, creating the directory and loading any
    /// previous snapshot.
    pub fn open(dir: &Path) -> io::Result<StatusStore> {
        fs::create_dir_all(dir)?;
        let path = dir.join(STATUS_FILE);
        let mut store = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => StatusStore::default(),
            Err(e) => return Err(e),
        };
        store.path = path;
        Ok(store)
    }

    /// In-memory store that never touches disk, for tests
    pub fn in_memory() -> StatusStore {
        StatusStore::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Set one key and write the snapshot through
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries.insert(key.to_string(), value.into());
        self.save();
    }

    pub fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.save();
        }
    }

    /// One-line `key=value` summary, sorted by key
    pub fn summary(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn save(&self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        let text = match serde_json::to_string_pretty(self) {
            Ok(t) => t,
            Err(_) => return,
        };
        if let Err(e) = fs::write(&self.path, text) {
            eprintln!("*** status store write failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_roundtrip() {
        let mut s = StatusStore::in_memory();
        s.set("state", "exposing");
        s.set("target", "/data/x.img");
        assert_eq!(s.get("state"), Some("exposing"));
        assert_eq!(s.get("missing"), None);
    }

    #[test]
    fn test_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut s = StatusStore::open(dir.path()).unwrap();
            s.set("exposure_time", "2.500000");
            s.set("state", "idle");
        }
        let s = StatusStore::open(dir.path()).unwrap();
        assert_eq!(s.get("exposure_time"), Some("2.500000"));
        assert_eq!(s.get("state"), Some("idle"));
    }

    #[test]
    fn test_remove_and_summary() {
        let mut s = StatusStore::in_memory();
        s.set("b", "2");
        s.set("a", "1");
        assert_eq!(s.summary(), "a=1 b=2");
        s.remove("a");
        assert_eq!(s.summary(), "b=2");
    }

    #[test]
    fn test_corrupt_snapshot_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(STATUS_FILE), b"not json").unwrap();
        let s = StatusStore::open(dir.path()).unwrap();
        assert_eq!(s.get("state"), None);
    }
}
