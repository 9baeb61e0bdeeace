//! Chunk store: O(1) record lookup over `chunks.jsonl`.
//!
//! The file is memory-mapped once; a line-offset array built at load maps
//! `chunk_id` (which equals the line number) to a byte range. Parsed
//! records go through a small LRU so repeated hits on hot chunks skip
//! the JSON decode.

use crate::bundle::ChunkRecord;
use anyhow::{bail, Context, Result};
use lru::LruCache;
use memmap2::Mmap;
use std::fs::File;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const CACHE_SIZE: usize = 1024;

pub struct ChunkStore {
    path: PathBuf,
    mmap: Mmap,
    /// Byte offset of the start of each line; one entry per chunk.
    line_offsets: Vec<u64>,
    cache: Mutex<LruCache<u32, Arc<ChunkRecord>>>,
}

impl ChunkStore {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open chunk store {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to mmap chunk store {}", path.display()))?;

        let mut line_offsets = Vec::new();
        let mut at_line_start = true;
        for (i, &byte) in mmap.iter().enumerate() {
            if at_line_start {
                line_offsets.push(i as u64);
                at_line_start = false;
            }
            if byte == b'\n' {
                at_line_start = true;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            line_offsets,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_SIZE).unwrap())),
        })
    }

    /// Number of chunks in the store.
    pub fn len(&self) -> usize {
        self.line_offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.line_offsets.is_empty()
    }

    /// Fetch a chunk record by id.
    pub fn get(&self, chunk_id: u32) -> Result<Arc<ChunkRecord>> {
        if let Some(hit) = self.cache.lock().unwrap().get(&chunk_id) {
            return Ok(Arc::clone(hit));
        }

        let idx = chunk_id as usize;
        if idx >= self.line_offsets.len() {
            bail!(
                "chunk id {chunk_id} out of range (store has {} chunks)",
                self.line_offsets.len()
            );
        }
        let start = self.line_offsets[idx] as usize;
        let end = self
            .line_offsets
            .get(idx + 1)
            .map(|&o| o as usize)
            .unwrap_or(self.mmap.len());
        let line = std::str::from_utf8(&self.mmap[start..end])
            .with_context(|| format!("Chunk store {} is not UTF-8", self.path.display()))?;

        let record: ChunkRecord = serde_json::from_str(line.trim_end())
            .with_context(|| format!("Malformed chunk record at id {chunk_id}"))?;
        if record.chunk_id != chunk_id {
            bail!(
                "chunk store line {chunk_id} carries id {}; file is out of order",
                record.chunk_id
            );
        }

        let record = Arc::new(record);
        self.cache.lock().unwrap().put(chunk_id, Arc::clone(&record));
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn store_with(records: &[ChunkRecord], name: &str) -> ChunkStore {
        let dir = std::env::temp_dir().join(format!("pocketwiki_store_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        for record in records {
            writeln!(file, "{}", serde_json::to_string(record).unwrap()).unwrap();
        }
        ChunkStore::open(&path).unwrap()
    }

    fn record(chunk_id: u32, text: &str) -> ChunkRecord {
        ChunkRecord {
            chunk_id,
            page_id: 100 + chunk_id as u64,
            page_title: format!("Page {chunk_id}"),
            text: text.to_string(),
            token_count: text.split_whitespace().count() as u32,
        }
    }

    #[test]
    fn test_get_by_id() {
        let store = store_with(
            &[record(0, "first"), record(1, "second"), record(2, "third")],
            "basic.jsonl",
        );
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(1).unwrap().text, "second");
        assert_eq!(store.get(2).unwrap().page_id, 102);
        // Cached path returns the same record
        assert_eq!(store.get(1).unwrap().text, "second");
    }

    #[test]
    fn test_out_of_range() {
        let store = store_with(&[record(0, "only")], "range.jsonl");
        assert!(store.get(1).is_err());
    }

    #[test]
    fn test_mismatched_ids_rejected() {
        let store = store_with(&[record(5, "wrong slot")], "mismatch.jsonl");
        assert!(store.get(0).is_err());
    }

    #[test]
    fn test_empty_store() {
        let store = store_with(&[], "empty.jsonl");
        assert!(store.is_empty());
        assert!(store.get(0).is_err());
    }
}
