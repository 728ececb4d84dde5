//! Record sources: where map tasks read their input from.
//!
//! A source is split into shards, one map task each. Shards must be
//! restartable: opening a shard a second time (for a retried task) yields the
//! same records in the same order.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use glob::glob;

use crate::storage::TagStore;
use crate::utils::byte_lines;
use crate::Record;

/// A lazy stream of records.
pub type Records<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

pub trait RecordSource: Send + Sync {
    /// The number of shards (and therefore map tasks).
    fn num_shards(&self) -> usize;

    /// A human readable name for `shard`, used in logs.
    fn shard_name(&self, shard: usize) -> String {
        format!("shard-{shard}")
    }

    /// Open `shard` from its first record.
    fn open(&self, shard: usize) -> Result<Records<'_>>;
}

/////////////////////////////////////////////////////////////////////////////
// In-memory source
/////////////////////////////////////////////////////////////////////////////

/// Records held in memory, already split into shards.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    shards: Vec<Arc<Vec<Record>>>,
}

impl MemorySource {
    /// One shard per inner vector.
    pub fn new<I, S, R>(shards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: IntoIterator<Item = R>,
        R: Into<Record>,
    {
        Self {
            shards: shards
                .into_iter()
                .map(|shard| Arc::new(shard.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    /// Split `records` into shards of at most `chunk_records` records each.
    pub fn chunked<I, R>(records: I, chunk_records: usize) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Record>,
    {
        let records: Vec<Record> = records.into_iter().map(Into::into).collect();
        let chunk_records = chunk_records.max(1);
        Self {
            shards: records
                .chunks(chunk_records)
                .map(|chunk| Arc::new(chunk.to_vec()))
                .collect(),
        }
    }
}

impl RecordSource for MemorySource {
    fn num_shards(&self) -> usize {
        self.shards.len()
    }

    fn open(&self, shard: usize) -> Result<Records<'_>> {
        match self.shards.get(shard) {
            Some(records) => Ok(Box::new(records.iter().cloned().map(Ok))),
            None => bail!("no shard {shard}"),
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
// Local files
/////////////////////////////////////////////////////////////////////////////

/// Local text files matching a glob, one shard per file, one record per line.
/// Lines are raw bytes; no encoding is assumed.
#[derive(Debug, Clone)]
pub struct FileSource {
    files: Vec<PathBuf>,
}

impl FileSource {
    /// Resolve `pattern` now. Files are sorted by path so shard numbers are
    /// stable across runs.
    pub fn new(pattern: &str) -> Result<Self> {
        let mut files = Vec::new();
        for entry in glob(pattern).with_context(|| format!("invalid input glob `{pattern}`"))? {
            let path = entry?;
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(Self { files })
    }
}

impl RecordSource for FileSource {
    fn num_shards(&self) -> usize {
        self.files.len()
    }

    fn shard_name(&self, shard: usize) -> String {
        match self.files.get(shard) {
            Some(path) => path.display().to_string(),
            None => format!("shard-{shard}"),
        }
    }

    fn open(&self, shard: usize) -> Result<Records<'_>> {
        let Some(path) = self.files.get(shard) else {
            bail!("no shard {shard}");
        };
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let lines = byte_lines(BufReader::new(file))
            .map(move |line| line.with_context(|| format!("failed to read {}", path.display())));
        Ok(Box::new(lines))
    }
}

/////////////////////////////////////////////////////////////////////////////
// Tagged storage
/////////////////////////////////////////////////////////////////////////////

/// The blobs of one or more tags, one shard per blob.
pub struct TagSource {
    store: Arc<dyn TagStore>,
    shards: Vec<(String, usize)>,
}

impl TagSource {
    /// Snapshot the blob list of `tags`. Every tag must exist.
    pub fn new<S: AsRef<str>>(store: Arc<dyn TagStore>, tags: &[S]) -> Result<Self> {
        let mut shards = Vec::new();
        for tag in tags {
            let tag = tag.as_ref();
            if !store.exists(tag)? {
                bail!("tag `{tag}` does not exist");
            }
            for blob in 0..store.blob_count(tag)? {
                shards.push((tag.to_string(), blob));
            }
        }
        Ok(Self { store, shards })
    }
}

impl RecordSource for TagSource {
    fn num_shards(&self) -> usize {
        self.shards.len()
    }

    fn shard_name(&self, shard: usize) -> String {
        match self.shards.get(shard) {
            Some((tag, blob)) => format!("{tag}#{blob}"),
            None => format!("shard-{shard}"),
        }
    }

    fn open(&self, shard: usize) -> Result<Records<'_>> {
        let Some((tag, blob)) = self.shards.get(shard) else {
            bail!("no shard {shard}");
        };
        let records = self.store.get_blob(tag, *blob)?;
        Ok(Box::new(records.into_iter().map(Ok)))
    }
}
