use crate::error::IndexError;
use crate::index::{Bm25Params, HEADER_LEN, INDEX_MAGIC, INDEX_VERSION};
use crate::utils::{decode_varint, PostingsCursor};
use ahash::{AHashMap, AHashSet};
use anyhow::{Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Dictionary entry for one term.
#[derive(Debug, Clone)]
pub struct DictEntry {
    pub term: String,
    pub doc_freq: u32,
    /// Byte offset into the postings region.
    pub offset: u64,
    /// Byte length of the posting list.
    pub len: u64,
}

/// Memory-mapped BM25 index reader.
///
/// Immutable after open; the mmap is read-only, so a single reader can
/// serve concurrent queries without synchronization.
#[derive(Debug)]
pub struct IndexReader {
    path: PathBuf,
    mmap: Mmap,
    params: Bm25Params,
    doc_count: u64,
    sum_lengths: u64,
    doc_lengths_off: usize,
    postings_off: usize,
    dict: Vec<DictEntry>,
}

impl IndexReader {
    /// Open and validate an index file.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_params(path, Bm25Params::default())
    }

    pub fn open_with_params(path: &Path, params: Bm25Params) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open index file {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to mmap index file {}", path.display()))?;

        let corrupt = |msg: &str| IndexError::corrupt(path, msg);

        if mmap.len() < HEADER_LEN {
            return Err(corrupt("file shorter than header").into());
        }
        if &mmap[0..4] != INDEX_MAGIC {
            return Err(corrupt("bad magic number").into());
        }
        let version = u32::from_le_bytes(mmap[4..8].try_into().unwrap());
        if version != INDEX_VERSION {
            return Err(corrupt(&format!("unsupported version {version}")).into());
        }

        let read_u64 = |at: usize| u64::from_le_bytes(mmap[at..at + 8].try_into().unwrap());
        let doc_count = read_u64(8);
        let sum_lengths = read_u64(16);
        let doc_lengths_off = read_u64(24) as usize;
        let dict_off = read_u64(32) as usize;
        let dict_bytes = read_u64(40) as usize;
        let postings_off = read_u64(48) as usize;
        let postings_len = read_u64(56) as usize;

        let file_len = mmap.len();
        let lengths_end = (doc_count as usize)
            .checked_mul(4)
            .and_then(|bytes| doc_lengths_off.checked_add(bytes))
            .filter(|&end| end <= file_len)
            .ok_or_else(|| corrupt("doc_lengths region out of bounds"))?;
        if lengths_end > dict_off
            || dict_off.checked_add(dict_bytes).map_or(true, |end| end > file_len)
            || postings_off
                .checked_add(postings_len)
                .map_or(true, |end| end > file_len)
        {
            return Err(corrupt("region offsets out of bounds").into());
        }

        let dict = scan_dictionary(&mmap[dict_off..dict_off + dict_bytes], postings_len, path)?;

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            params,
            doc_count,
            sum_lengths,
            doc_lengths_off,
            postings_off,
            dict,
        })
    }

    /// Number of indexed documents.
    pub fn doc_count(&self) -> u64 {
        self.doc_count
    }

    /// Number of distinct terms in the dictionary.
    pub fn term_count(&self) -> usize {
        self.dict.len()
    }

    /// Mean document length in tokens.
    pub fn avgdl(&self) -> f32 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.sum_lengths as f32 / self.doc_count as f32
        }
    }

    /// Token count of a document at index time.
    pub fn doc_length(&self, chunk_id: u32) -> u32 {
        let at = self.doc_lengths_off + chunk_id as usize * 4;
        u32::from_le_bytes(self.mmap[at..at + 4].try_into().unwrap())
    }

    /// Look up a term in the sorted dictionary.
    pub fn lookup(&self, term: &str) -> Option<&DictEntry> {
        self.dict
            .binary_search_by(|e| e.term.as_str().cmp(term))
            .ok()
            .map(|i| &self.dict[i])
    }

    /// Lazy cursor over a term's posting list.
    pub fn postings(&self, entry: &DictEntry) -> PostingsCursor<'_> {
        let start = self.postings_off + entry.offset as usize;
        let end = start + entry.len as usize;
        PostingsCursor::new(&self.mmap[start..end])
    }

    /// Score query terms against the corpus and return the top `top_k`
    /// documents, ranked by descending BM25 score with ascending
    /// chunk_id breaking ties.
    ///
    /// Repeated query terms are deduplicated; unknown terms contribute
    /// nothing. Returns fewer than `top_k` entries when fewer documents
    /// match.
    pub fn search(&self, terms: &[String], top_k: usize) -> Result<Vec<(u32, f32)>> {
        if top_k == 0 || self.doc_count == 0 {
            return Ok(Vec::new());
        }

        let k1 = self.params.k1;
        let b = self.params.b;
        let n = self.doc_count as f32;
        let avgdl = self.avgdl();

        let mut seen: AHashSet<&str> = AHashSet::with_capacity(terms.len());
        let mut scores: AHashMap<u32, f32> = AHashMap::new();

        for term in terms {
            if !seen.insert(term.as_str()) {
                continue;
            }
            let Some(entry) = self.lookup(term) else {
                continue;
            };

            let df = entry.doc_freq as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for posting in self.postings(entry) {
                let (doc_id, tf) = posting.with_context(|| {
                    format!("Corrupt posting list for term {term:?} in {}", self.path.display())
                })?;
                if doc_id as u64 >= self.doc_count {
                    return Err(
                        IndexError::corrupt(&self.path, "posting doc id out of range").into()
                    );
                }
                let tf = tf as f32;
                let dl = self.doc_length(doc_id) as f32;
                let norm = tf + k1 * (1.0 - b + b * dl / avgdl);
                *scores.entry(doc_id).or_insert(0.0) += idf * tf * (k1 + 1.0) / norm;
            }
        }

        let mut ranked: Vec<(u32, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(top_k);
        Ok(ranked)
    }
}

/// Decode the dictionary region into a sorted entry vector.
fn scan_dictionary(buf: &[u8], postings_len: usize, path: &Path) -> Result<Vec<DictEntry>> {
    let mut entries: Vec<DictEntry> = Vec::new();
    let mut pos = 0usize;

    while pos < buf.len() {
        let (term_len, next) = decode_varint(buf, pos)?;
        let term_end = next
            .checked_add(term_len as usize)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| IndexError::corrupt(path, "dictionary term out of bounds"))?;
        let term = std::str::from_utf8(&buf[next..term_end])
            .map_err(|_| IndexError::corrupt(path, "dictionary term is not UTF-8"))?
            .to_string();

        let (doc_freq, next) = decode_varint(buf, term_end)?;
        let (offset, next) = decode_varint(buf, next)?;
        let (len, next) = decode_varint(buf, next)?;

        if offset
            .checked_add(len)
            .map_or(true, |end| end as usize > postings_len)
        {
            return Err(IndexError::corrupt(path, "posting list out of bounds").into());
        }
        if let Some(prev) = entries.last() {
            if prev.term >= term {
                return Err(IndexError::corrupt(path, "dictionary terms not sorted").into());
            }
        }

        entries.push(DictEntry {
            term,
            doc_freq: doc_freq as u32,
            offset,
            len,
        });
        pos = next;
    }

    Ok(entries)
}
