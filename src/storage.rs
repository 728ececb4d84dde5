//! Tagged blob storage.
//!
//! A tag names a dataset made of one or more blobs; a blob is a list of
//! records. Jobs read tags through [`crate::source::TagSource`], one shard per
//! blob, so how a dataset was chunked on load decides the map parallelism.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::utils::byte_lines;
use crate::Record;

/// The storage contract the engine consumes.
pub trait TagStore: Send + Sync {
    /// Whether `tag` holds any data.
    fn exists(&self, tag: &str) -> Result<bool>;

    /// Append one blob of records to `tag`, creating the tag if needed.
    fn put(&self, tag: &str, records: Vec<Record>) -> Result<()>;

    /// Append one blob per local file, read line by line.
    fn put_files(&self, tag: &str, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            let records = read_lines(path)?;
            self.put(tag, records)?;
        }
        Ok(())
    }

    /// The number of blobs under `tag`. Errors if the tag does not exist.
    fn blob_count(&self, tag: &str) -> Result<usize>;

    /// The records of blob `index` of `tag`.
    fn get_blob(&self, tag: &str, index: usize) -> Result<Vec<Record>>;

    /// All records of `tag`, blob after blob.
    fn get(&self, tag: &str) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for index in 0..self.blob_count(tag)? {
            records.extend(self.get_blob(tag, index)?);
        }
        Ok(records)
    }

    /// Remove `tag` and all of its blobs. Deleting a missing tag is a no-op.
    fn delete(&self, tag: &str) -> Result<()>;
}

/// Read a text file into one record per line, without line terminators.
/// Lines are kept as raw bytes and need not be UTF-8.
pub fn read_lines(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for line in byte_lines(BufReader::new(file)) {
        records.push(line.with_context(|| format!("failed to read {}", path.display()))?);
    }
    Ok(records)
}

/// Load a local text file into `tag`, replacing whatever the tag held.
///
/// The file is cut into blobs of at most `chunk_records` lines. Returns the
/// number of blobs written. The old data is only removed once the file has
/// been read.
pub fn load(store: &dyn TagStore, tag: &str, path: &Path, chunk_records: usize) -> Result<usize> {
    if chunk_records == 0 {
        bail!("chunk size must be at least one record");
    }
    let records = read_lines(path)?;

    if store.exists(tag)? {
        warn!(tag, "overwriting existing tag");
        store.delete(tag)?;
    }
    let mut blobs = 0;
    for chunk in records.chunks(chunk_records) {
        store.put(tag, chunk.to_vec())?;
        blobs += 1;
    }
    info!(tag, file = %path.display(), records = records.len(), blobs, "loaded file into tag");
    Ok(blobs)
}

/////////////////////////////////////////////////////////////////////////////
// In-memory store
/////////////////////////////////////////////////////////////////////////////

/// A [`TagStore`] kept in memory. Cheap to clone; clones share data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tags: Arc<DashMap<String, Vec<Arc<Vec<Record>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TagStore for MemoryStore {
    fn exists(&self, tag: &str) -> Result<bool> {
        Ok(self.tags.contains_key(tag))
    }

    fn put(&self, tag: &str, records: Vec<Record>) -> Result<()> {
        #[allow(clippy::unwrap_or_default)]
        self.tags
            .entry(tag.to_string())
            .or_insert(Vec::new())
            .push(Arc::new(records));
        Ok(())
    }

    fn blob_count(&self, tag: &str) -> Result<usize> {
        self.tags
            .get(tag)
            .map(|blobs| blobs.len())
            .ok_or_else(|| anyhow!("tag `{tag}` does not exist"))
    }

    fn get_blob(&self, tag: &str, index: usize) -> Result<Vec<Record>> {
        let blobs = self
            .tags
            .get(tag)
            .ok_or_else(|| anyhow!("tag `{tag}` does not exist"))?;
        let blob = blobs
            .get(index)
            .ok_or_else(|| anyhow!("tag `{tag}` has no blob {index}"))?;
        Ok(blob.as_ref().clone())
    }

    fn delete(&self, tag: &str) -> Result<()> {
        self.tags.remove(tag);
        Ok(())
    }
}

/////////////////////////////////////////////////////////////////////////////
// Directory store
/////////////////////////////////////////////////////////////////////////////

/// A [`TagStore`] backed by a local directory: `<root>/<tag>/blob-NNNNNN`,
/// one record per line.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create store at {}", root.display()))?;
        Ok(Self { root })
    }

    fn tag_dir(&self, tag: &str) -> Result<PathBuf> {
        if tag.is_empty() || tag == "." || tag == ".." || tag.contains(|c: char| c == '/' || c == '\\') {
            bail!("invalid tag name `{tag}`");
        }
        Ok(self.root.join(tag))
    }

    /// Blob files of `tag`, ordered by their numeric index.
    fn blobs(&self, tag: &str) -> Result<Vec<PathBuf>> {
        let dir = self.tag_dir(tag)?;
        if !dir.is_dir() {
            bail!("tag `{tag}` does not exist");
        }
        let mut blobs = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let index = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix("blob-"))
                .and_then(|n| n.parse::<usize>().ok());
            if let Some(index) = index {
                blobs.push((index, path));
            }
        }
        blobs.sort_by_key(|(index, _)| *index);
        Ok(blobs.into_iter().map(|(_, path)| path).collect())
    }
}

impl TagStore for DirStore {
    fn exists(&self, tag: &str) -> Result<bool> {
        Ok(self.tag_dir(tag)?.is_dir())
    }

    fn put(&self, tag: &str, records: Vec<Record>) -> Result<()> {
        if records.iter().any(|record| record.contains(&b'\n')) {
            bail!("record contains a newline and cannot be stored line by line");
        }
        let dir = self.tag_dir(tag)?;
        fs::create_dir_all(&dir)?;
        let index = self.blobs(tag)?.len();
        let path = dir.join(format!("blob-{index:06}"));

        let mut writer = BufWriter::new(File::create(&path)?);
        for record in records {
            writer.write_all(&record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    fn blob_count(&self, tag: &str) -> Result<usize> {
        Ok(self.blobs(tag)?.len())
    }

    fn get_blob(&self, tag: &str, index: usize) -> Result<Vec<Record>> {
        let blobs = self.blobs(tag)?;
        let path = blobs
            .get(index)
            .ok_or_else(|| anyhow!("tag `{tag}` has no blob {index}"))?;
        read_lines(path)
    }

    fn delete(&self, tag: &str) -> Result<()> {
        let dir = self.tag_dir(tag)?;
        if dir.is_dir() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("failed to delete tag `{tag}`"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ScratchDir;


    fn records(lines: &[&str]) -> Vec<Record> {
        lines.iter().map(|l| Bytes::from(l.to_string())).collect()
    }

    fn exercise(store: &dyn TagStore) {
        assert!(!store.exists("data:sort").unwrap());
        assert!(store.blob_count("data:sort").is_err());

        store.put("data:sort", records(&["b", "a"])).unwrap();
        store.put("data:sort", records(&["b", "c"])).unwrap();

        assert!(store.exists("data:sort").unwrap());
        assert_eq!(store.blob_count("data:sort").unwrap(), 2);
        assert_eq!(store.get_blob("data:sort", 1).unwrap(), records(&["b", "c"]));
        assert_eq!(store.get("data:sort").unwrap(), records(&["b", "a", "b", "c"]));
        assert!(store.get_blob("data:sort", 2).is_err());

        store.delete("data:sort").unwrap();
        assert!(!store.exists("data:sort").unwrap());
        store.delete("data:sort").unwrap();
    }

    #[test]
    fn memory_store_round_trip() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn dir_store_round_trip() {
        let scratch = ScratchDir::new("round-trip");
        let store = DirStore::open(scratch.path()).unwrap();
        exercise(&store);
    }

    #[test]
    fn dir_store_rejects_path_like_tags() {
        let scratch = ScratchDir::new("names");
        let store = DirStore::open(scratch.path()).unwrap();
        assert!(store.put("../escape", records(&["x"])).is_err());
        assert!(store.exists("").is_err());
    }

    #[test]
    fn load_chunks_and_overwrites() {
        let scratch = ScratchDir::new("load");
        let dir = scratch.path();
        let input = dir.join("input.txt");
        fs::write(&input, "the cat sat\r\nthe dog sat\nsat\n").unwrap();

        let store = MemoryStore::new();
        store.put("data:count_words", records(&["stale"])).unwrap();

        let blobs = load(&store, "data:count_words", &input, 2).unwrap();
        assert_eq!(blobs, 2);
        assert_eq!(store.blob_count("data:count_words").unwrap(), 2);
        assert_eq!(
            store.get("data:count_words").unwrap(),
            records(&["the cat sat", "the dog sat", "sat"])
        );

        assert!(load(&store, "data:count_words", &input, 0).is_err());
    }

    #[test]
    fn failed_load_keeps_the_old_tag() {
        let scratch = ScratchDir::new("failed-load");
        let store = DirStore::open(scratch.path().join("store")).unwrap();
        store.put("data:keep", records(&["precious"])).unwrap();

        assert!(load(&store, "data:keep", &scratch.path().join("missing.txt"), 10).is_err());
        assert!(store.exists("data:keep").unwrap());
        assert_eq!(store.get("data:keep").unwrap(), records(&["precious"]));
    }

    #[test]
    fn non_utf8_records_round_trip() {
        let scratch = ScratchDir::new("latin1");
        let input = scratch.path().join("latin1.txt");
        fs::write(&input, b"caf\xe9\nna\xefve\n").unwrap();

        let store = DirStore::open(scratch.path().join("store")).unwrap();
        load(&store, "data:latin1", &input, 10).unwrap();
        assert_eq!(
            store.get("data:latin1").unwrap(),
            vec![Bytes::from_static(b"caf\xe9"), Bytes::from_static(b"na\xefve")]
        );
    }

    #[test]
    fn blobs_are_ordered_by_index_not_name() {
        let scratch = ScratchDir::new("blob-order");
        let store = DirStore::open(scratch.path()).unwrap();
        let dir = scratch.path().join("data:many");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("blob-1000000"), "later\n").unwrap();
        fs::write(dir.join("blob-999999"), "earlier\n").unwrap();
        fs::write(dir.join("notes.txt"), "ignored\n").unwrap();

        assert_eq!(store.blob_count("data:many").unwrap(), 2);
        assert_eq!(store.get_blob("data:many", 0).unwrap(), records(&["earlier"]));
        assert_eq!(store.get_blob("data:many", 1).unwrap(), records(&["later"]));
    }

    #[test]
    fn put_files_stores_one_blob_per_file() {
        let scratch = ScratchDir::new("files");
        let dir = scratch.path();
        let a = dir.join("a.txt");
        let b = dir.join("b.txt");
        fs::write(&a, "one\ntwo\n").unwrap();
        fs::write(&b, "three\n").unwrap();

        let store = DirStore::open(dir.join("store")).unwrap();
        store.put_files("data:files", &[a, b]).unwrap();
        assert_eq!(store.blob_count("data:files").unwrap(), 2);
        assert_eq!(store.get_blob("data:files", 1).unwrap(), records(&["three"]));
    }
}
