// src/store/mod.rs

//! Single-file blob store for OpenSPM
//!
//! All persistent state (repositories, package index, installed records)
//! lives in one gzip-compressed tar archive. Each tar entry is a named blob.
//!
//! Every mutation reads the whole archive into memory, applies the change
//! and rewrites the archive to a temporary sibling file which is then
//! renamed over the original. Mutations on one `BlobStore` are serialized
//! by an internal writer lock; the store is NOT safe to share between
//! processes.

use crate::error::{Error, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Upper bound on buffer pre-allocation from a tar header's size field
const MAX_PREALLOC: u64 = 1 << 20;

/// Keyed blob storage backed by one compressed archive on disk
#[derive(Debug)]
pub struct BlobStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl BlobStore {
    /// Create a handle to the store at `path`
    ///
    /// Nothing is touched on disk until the first read or write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    /// Path of the backing archive
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an empty archive (and parent directories) if none exists
    ///
    /// This is idempotent - calling it on an existing store is a no-op.
    pub fn ensure_created(&self) -> Result<()> {
        let _guard = self.writer.lock();

        if self.path.exists() {
            debug!("Store already exists at: {}", self.path.display());
            return Ok(());
        }

        self.write_entries(&BTreeMap::new())?;
        info!("Created data store at {}", self.path.display());
        Ok(())
    }

    /// Read the blob stored under `name`
    ///
    /// # Arguments
    ///
    /// * `name` - Blob name
    ///
    /// # Returns
    ///
    /// * `Result<Vec<u8>>` - Exact bytes last stored, or `NotFound`
    pub fn get(&self, name: &str) -> Result<Vec<u8>> {
        validate_name(name)?;

        if !self.path.exists() {
            return Err(Error::NotFound(format!(
                "blob '{}' (store {} does not exist)",
                name,
                self.path.display()
            )));
        }

        let mut archive = self.open_archive()?;
        for entry in archive.entries().map_err(|e| self.corrupt(e))? {
            let mut entry = entry.map_err(|e| self.corrupt(e))?;
            if entry_name(&entry)? == name {
                return read_entry(&mut entry, name);
            }
        }

        Err(Error::NotFound(format!("blob '{}'", name)))
    }

    /// List all blob names; a store that does not exist yet is empty
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut archive = self.open_archive()?;
        let mut names = Vec::new();
        for entry in archive.entries().map_err(|e| self.corrupt(e))? {
            let entry = entry.map_err(|e| self.corrupt(e))?;
            names.push(entry_name(&entry)?);
        }
        Ok(names)
    }

    /// Insert or overwrite the blob `name`, preserving every other blob
    pub fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        validate_name(name)?;
        let _guard = self.writer.lock();

        let mut entries = self.read_entries()?;
        entries.insert(name.to_string(), data.to_vec());
        self.write_entries(&entries)?;

        debug!("Stored blob '{}' ({} bytes)", name, data.len());
        Ok(())
    }

    /// Remove the blob `name`; fails with `NotFound` if it is absent
    pub fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let _guard = self.writer.lock();

        let mut entries = self.read_entries()?;
        if entries.remove(name).is_none() {
            return Err(Error::NotFound(format!("blob '{}'", name)));
        }
        self.write_entries(&entries)?;

        debug!("Deleted blob '{}'", name);
        Ok(())
    }

    /// Read and deserialize a YAML blob
    pub fn get_yaml<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let data = self.get(name)?;
        parse_yaml(name, &data)
    }

    /// Serialize `value` as YAML and store it under `name`
    pub fn put_yaml<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let data = serde_yaml::to_string(value)?;
        self.put(name, data.as_bytes())
    }

    /// Read, modify and rewrite a YAML blob under the writer lock
    ///
    /// A missing blob starts out as `T::default()`. Nothing is written when
    /// `update` fails, and no other writer on this store can interleave
    /// between the read and the rewrite.
    ///
    /// # Returns
    ///
    /// * `Result<R>` - Whatever `update` returned
    pub fn update_yaml<T, R, F>(&self, name: &str, update: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> Result<R>,
    {
        validate_name(name)?;
        let _guard = self.writer.lock();

        let mut entries = self.read_entries()?;
        let mut value: T = match entries.get(name) {
            Some(data) => parse_yaml(name, data)?,
            None => T::default(),
        };

        let result = update(&mut value)?;

        let data = serde_yaml::to_string(&value)?.into_bytes();
        debug!("Updated blob '{}' ({} bytes)", name, data.len());
        entries.insert(name.to_string(), data);
        self.write_entries(&entries)?;
        Ok(result)
    }

    /// Load every entry into memory (empty map when the archive is absent)
    fn read_entries(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut entries = BTreeMap::new();
        if !self.path.exists() {
            return Ok(entries);
        }

        let mut archive = self.open_archive()?;
        for entry in archive.entries().map_err(|e| self.corrupt(e))? {
            let mut entry = entry.map_err(|e| self.corrupt(e))?;
            let name = entry_name(&entry)?;
            let data = read_entry(&mut entry, &name)?;
            entries.insert(name, data);
        }
        Ok(entries)
    }

    /// Rewrite the whole archive from `entries` via temp file + rename
    fn write_entries(&self, entries: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|e| {
            Error::IoError(format!(
                "Failed to create store directory {}: {}",
                parent.display(),
                e
            ))
        })?;

        let temp = NamedTempFile::new_in(parent)?;
        {
            let encoder = GzEncoder::new(BufWriter::new(temp.as_file()), Compression::default());
            let mut builder = Builder::new(encoder);

            for (name, data) in entries {
                let mut header = Header::new_gnu();
                header.set_entry_type(EntryType::Regular);
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_mtime(0);
                builder
                    .append_data(&mut header, name, data.as_slice())
                    .map_err(|e| Error::IoError(format!("Failed to write blob '{}': {}", name, e)))?;
            }

            let encoder = builder.into_inner()?;
            let mut writer = encoder.finish()?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;

        temp.persist(&self.path).map_err(|e| {
            Error::IoError(format!(
                "Failed to replace store {}: {}",
                self.path.display(),
                e.error
            ))
        })?;

        Ok(())
    }

    fn open_archive(&self) -> Result<Archive<GzDecoder<BufReader<File>>>> {
        let file = File::open(&self.path).map_err(|e| {
            Error::IoError(format!("Failed to open store {}: {}", self.path.display(), e))
        })?;
        Ok(Archive::new(GzDecoder::new(BufReader::new(file))))
    }

    fn corrupt(&self, err: std::io::Error) -> Error {
        Error::Invalid(format!("corrupt store archive {}: {}", self.path.display(), err))
    }
}

/// Blob names are relative, normalized, `/`-separated paths
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('/')
        && name
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..");

    if valid {
        Ok(())
    } else {
        Err(Error::Invalid(format!("Invalid blob name '{}'", name)))
    }
}

fn parse_yaml<T: DeserializeOwned>(name: &str, data: &[u8]) -> Result<T> {
    serde_yaml::from_slice(data)
        .map_err(|e| Error::Invalid(format!("blob '{}' is not valid YAML: {}", name, e)))
}

fn entry_name<R: Read>(entry: &tar::Entry<R>) -> Result<String> {
    let path = entry
        .path()
        .map_err(|e| Error::Invalid(format!("Failed to read blob name: {}", e)))?;
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| Error::Invalid(format!("Blob name is not UTF-8: {}", path.display())))
}

fn read_entry<R: Read>(entry: &mut tar::Entry<R>, name: &str) -> Result<Vec<u8>> {
    let declared = entry
        .header()
        .size()
        .map_err(|e| Error::Invalid(format!("Bad header for blob '{}': {}", name, e)))?;

    // The header size is untrusted until the bytes are actually read
    let mut data = Vec::with_capacity(declared.min(MAX_PREALLOC) as usize);
    entry
        .read_to_end(&mut data)
        .map_err(|e| Error::Invalid(format!("Failed to read blob '{}': {}", name, e)))?;

    if data.len() as u64 != declared {
        return Err(Error::Invalid(format!(
            "Blob '{}' is truncated: declared {} bytes, read {}",
            name,
            declared,
            data.len()
        )));
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, BlobStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(temp_dir.path().join("data.bin"));
        (temp_dir, store)
    }

    #[test]
    fn test_put_get_roundtrip_with_zero_bytes() {
        let (_temp, store) = create_test_store();
        let payload = vec![0u8, 1, 0, 255, 0, 0, 42];

        store.put("blob", &payload).unwrap();

        assert_eq!(store.get("blob").unwrap(), payload);
    }

    #[test]
    fn test_empty_payload() {
        let (_temp, store) = create_test_store();
        store.put("empty", b"").unwrap();
        assert!(store.get("empty").unwrap().is_empty());
    }

    #[test]
    fn test_overwrite_preserves_other_entries() {
        let (_temp, store) = create_test_store();

        store.put("a", b"first").unwrap();
        store.put("b", b"other").unwrap();
        store.put("a", b"second").unwrap();

        assert_eq!(store.get("a").unwrap(), b"second");
        assert_eq!(store.get("b").unwrap(), b"other");

        let mut names = store.list().unwrap();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_delete_missing_is_not_found_and_store_unchanged() {
        let (_temp, store) = create_test_store();
        store.put("keep", b"value").unwrap();

        let result = store.delete("missing");
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(store.list().unwrap(), vec!["keep".to_string()]);
        assert_eq!(store.get("keep").unwrap(), b"value");
    }

    #[test]
    fn test_delete_removes_entry() {
        let (_temp, store) = create_test_store();
        store.put("a", b"1").unwrap();
        store.put("b", b"2").unwrap();

        store.delete("a").unwrap();

        assert!(store.get("a").unwrap_err().is_not_found());
        assert_eq!(store.get("b").unwrap(), b"2");
    }

    #[test]
    fn test_get_from_missing_store() {
        let (_temp, store) = create_test_store();

        let result = store.get("anything");
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(store.list().unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_ensure_created_is_idempotent_and_creates_parents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(temp_dir.path().join("nested/dir/data.bin"));

        store.ensure_created().unwrap();
        assert!(store.path().exists());
        assert!(store.list().unwrap().is_empty());

        store.put("x", b"y").unwrap();
        store.ensure_created().unwrap();
        assert_eq!(store.get("x").unwrap(), b"y");
    }

    #[test]
    fn test_long_names_roundtrip() {
        let (_temp, store) = create_test_store();
        let name = format!("deep/{}", "n".repeat(180));

        store.put(&name, b"long").unwrap();

        assert_eq!(store.get(&name).unwrap(), b"long");
        assert_eq!(store.list().unwrap(), vec![name]);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let (_temp, store) = create_test_store();
        for name in ["", "/abs", "a/../b", "a//b", "./a"] {
            assert!(
                matches!(store.put(name, b"x"), Err(Error::Invalid(_))),
                "name {:?} should be rejected",
                name
            );
        }
        assert!(!store.path().exists());
    }

    #[test]
    fn test_corrupt_archive_is_invalid() {
        let (_temp, store) = create_test_store();
        fs::write(store.path(), b"definitely not gzip").unwrap();

        assert!(matches!(store.list(), Err(Error::Invalid(_))));
        assert!(matches!(store.put("a", b"b"), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_huge_declared_size_is_invalid() {
        let (_temp, store) = create_test_store();

        let mut header = Header::new_gnu();
        header.as_gnu_mut().unwrap().name[..8].copy_from_slice(b"packages");
        header.set_size(1 << 62);
        header.set_mode(0o644);
        header.set_cksum();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(header.as_bytes()).unwrap();
        encoder.write_all(&[0u8; 1024]).unwrap();
        fs::write(store.path(), encoder.finish().unwrap()).unwrap();

        assert!(matches!(store.get("packages"), Err(Error::Invalid(_))));
        assert!(matches!(store.put("a", b"b"), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_update_yaml() {
        let (_temp, store) = create_test_store();

        let len = store
            .update_yaml("list", |items: &mut Vec<String>| {
                items.push("one".to_string());
                Ok(items.len())
            })
            .unwrap();
        assert_eq!(len, 1);

        store
            .update_yaml("list", |items: &mut Vec<String>| {
                items.push("two".to_string());
                Ok(())
            })
            .unwrap();
        let loaded: Vec<String> = store.get_yaml("list").unwrap();
        assert_eq!(loaded, vec!["one", "two"]);

        let result = store.update_yaml("list", |items: &mut Vec<String>| {
            items.clear();
            Err::<(), _>(Error::Invalid("rejected".to_string()))
        });
        assert!(matches!(result, Err(Error::Invalid(_))));
        let loaded: Vec<String> = store.get_yaml("list").unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_concurrent_updates_of_one_blob_are_not_lost() {
        let (_temp, store) = create_test_store();
        let barrier = Barrier::new(8);

        thread::scope(|scope| {
            for i in 0..8 {
                let store = &store;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    store
                        .update_yaml("counters", |map: &mut BTreeMap<String, u32>| {
                            map.insert(format!("key-{}", i), i);
                            Ok(())
                        })
                        .unwrap();
                });
            }
        });

        let map: BTreeMap<String, u32> = store.get_yaml("counters").unwrap();
        assert_eq!(map.len(), 8);
    }

    #[test]
    fn test_yaml_helpers() {
        let (_temp, store) = create_test_store();
        let mut value = BTreeMap::new();
        value.insert("key".to_string(), vec!["one".to_string(), "two".to_string()]);

        store.put_yaml("doc", &value).unwrap();
        let loaded: BTreeMap<String, Vec<String>> = store.get_yaml("doc").unwrap();
        assert_eq!(loaded, value);

        store.put("broken", b"key: [unclosed").unwrap();
        let result: Result<BTreeMap<String, String>> = store.get_yaml("broken");
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[test]
    fn test_concurrent_writers_are_serialized() {
        let (_temp, store) = create_test_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store.put(&format!("key-{}", i), format!("value-{}", i).as_bytes())
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        for i in 0..8 {
            assert_eq!(
                store.get(&format!("key-{}", i)).unwrap(),
                format!("value-{}", i).as_bytes()
            );
        }
    }
}
