//! Byte store seam.
//!
//! The topology core never touches files directly. Every read and write
//! goes through a [`ByteStore`] keyed by a normalized relative path such
//! as `phonebook/unpacked/alice`. Calls may block for arbitrary time;
//! callers never hold a lock across them.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::{Result, TopologyError};

/// Keyed byte storage.
pub trait ByteStore: Send + Sync {
    fn exists(&self, key: &str) -> Result<bool>;

    fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Replace the value at `key`, creating parent directories as needed.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Names stored directly under `dir`, sorted.
    fn list(&self, dir: &str) -> Result<Vec<String>>;
}

/// Join path components into a normalized store key.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|part| part.split('/'))
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn io_error(key: &str, source: io::Error) -> TopologyError {
    TopologyError::Io {
        key: key.to_string(),
        source,
    }
}

/// Store rooted at a directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for seg in join_key(&[key]).split('/').filter(|s| !s.is_empty()) {
            path.push(seg);
        }
        path
    }
}

impl ByteStore for FsStore {
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path(key).exists())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        fs::read(self.path(key)).map_err(|e| io_error(key, e))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(key, e))?;
        }
        // Write-then-rename so readers never see a torn file.
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, bytes).map_err(|e| io_error(key, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error(key, e))
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let path = self.path(dir);
        if !path.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for item in fs::read_dir(&path).map_err(|e| io_error(dir, e))? {
            let item = item.map_err(|e| io_error(dir, e))?;
            if item.file_type().map_err(|e| io_error(dir, e))?.is_file() {
                if let Some(name) = item.file_name().to_str() {
                    if !name.ends_with(".tmp") {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// In-memory store, for tests and for staging snapshots.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }
}

impl ByteStore for MemoryStore {
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.files.read().contains_key(&join_key(&[key])))
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .get(&join_key(&[key]))
            .cloned()
            .ok_or_else(|| io_error(key, io::Error::from(io::ErrorKind::NotFound)))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.files.write().insert(join_key(&[key]), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.files.write().remove(&join_key(&[key]));
        Ok(())
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", join_key(&[dir]));
        Ok(self
            .files
            .read()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn ByteStore) {
        assert!(!store.exists("phonebook/unpacked/a").expect("exists"));
        store.write("phonebook/unpacked/a", b"{}").expect("write");
        store.write("phonebook/unpacked/b", b"[]").expect("write");
        store.write("phonebook/packed.json", b"{}").expect("write");
        assert!(store.exists("phonebook//unpacked/a").expect("exists"));
        assert_eq!(store.read("phonebook/unpacked/b").expect("read"), b"[]");
        assert_eq!(store.list("phonebook/unpacked").expect("list"), ["a", "b"]);
        assert_eq!(store.list("phonebook").expect("list"), ["packed.json"]);
        store.remove("phonebook/unpacked/a").expect("remove");
        store.remove("phonebook/unpacked/a").expect("remove twice");
        assert!(store.read("phonebook/unpacked/a").is_err());
        assert!(store.list("missing").expect("list").is_empty());
    }

    #[test]
    fn test_join_key() {
        assert_eq!(join_key(&["phonebook/", "/unpacked", "a"]), "phonebook/unpacked/a");
        assert_eq!(join_key(&["./global.json"]), "global.json");
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_fs_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        exercise(&FsStore::new(dir.path()));
    }
}
