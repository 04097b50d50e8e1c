// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable client storage: a small key/value namespace of JSON documents.
//!
//! The file backend keeps one `<key>.json` document per key under the state
//! directory and replaces it atomically (write tmp + rename), so a reader in
//! this or a later process sees either the previous document or the new one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::Value;

/// Key/value persistence used by the token store and the session snapshot.
pub trait Storage: Send + Sync {
    /// Read the document stored under `key`, if any.
    fn load(&self, key: &str) -> anyhow::Result<Option<Value>>;
    /// Replace the document stored under `key`.
    fn save(&self, key: &str, value: &Value) -> anyhow::Result<()>;
    /// Delete the document stored under `key`. Missing keys are not an error.
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// JSON-file storage rooted at a state directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Storage for FileStorage {
    fn load(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let path = self.path(key);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = serde_json::from_str(&contents)?;
        Ok(Some(value))
    }

    fn save(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        write_atomic(&self.path(key), value)
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        match std::fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write a JSON document atomically (write tmp + rename).
///
/// Uses a unique temp filename (PID + counter) so concurrent saves of the
/// same key never share a `.tmp` file.
fn write_atomic(path: &Path, value: &Value) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let json = serde_json::to_string_pretty(value)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Process-local storage. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    docs: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn load(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.docs.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        self.docs.lock().insert(key.to_owned(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.docs.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
