use crate::index::{HEADER_LEN, INDEX_MAGIC, INDEX_VERSION};
use crate::utils::{encode_postings, encode_varint, tokenize};
use ahash::AHashMap;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Streaming BM25 index builder.
///
/// Documents arrive as `(chunk_id, text)` with dense, strictly increasing
/// ids; each term's posting vector is therefore sorted by construction
/// and never needs a per-term sort. Feeding ids out of order is a
/// programmer error and panics.
pub struct IndexBuilder {
    postings: AHashMap<String, Vec<(u32, u32)>>,
    doc_lengths: Vec<u32>,
    sum_lengths: u64,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self {
            postings: AHashMap::new(),
            doc_lengths: Vec::new(),
            sum_lengths: 0,
        }
    }

    /// Number of documents added so far.
    pub fn doc_count(&self) -> usize {
        self.doc_lengths.len()
    }

    /// Tokenize and add one document.
    pub fn add_document(&mut self, chunk_id: u32, text: &str) {
        assert_eq!(
            chunk_id as usize,
            self.doc_lengths.len(),
            "chunk ids must be dense and strictly increasing"
        );

        let terms = tokenize(text);
        self.doc_lengths.push(terms.len() as u32);
        self.sum_lengths += terms.len() as u64;

        let mut counts: AHashMap<String, u32> = AHashMap::with_capacity(terms.len());
        for term in terms {
            *counts.entry(term).or_insert(0) += 1;
        }

        for (term, tf) in counts {
            self.postings.entry(term).or_default().push((chunk_id, tf));
        }
    }

    /// Serialize the index. Writes `<path>.tmp` and renames on success;
    /// a failed build leaves no partial file behind.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = tmp_path(path);
        match self.write_to(&tmp) {
            Ok(()) => {
                fs::rename(&tmp, path)
                    .with_context(|| format!("Failed to move index into place at {}", path.display()))?;
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(e)
            }
        }
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        // Lexicographic term order fixes on-disk iteration order
        // regardless of hash-map iteration.
        let mut terms: Vec<&String> = self.postings.keys().collect();
        terms.par_sort_unstable();

        // Postings region first; dictionary entries reference offsets
        // relative to its start.
        let mut postings_buf = Vec::new();
        let mut dict_buf = Vec::new();
        for term in &terms {
            let list = &self.postings[*term];
            let offset = postings_buf.len() as u64;
            encode_postings(list, &mut postings_buf);
            let len = postings_buf.len() as u64 - offset;

            encode_varint(term.len() as u64, &mut dict_buf);
            dict_buf.extend_from_slice(term.as_bytes());
            encode_varint(list.len() as u64, &mut dict_buf);
            encode_varint(offset, &mut dict_buf);
            encode_varint(len, &mut dict_buf);
        }

        let n = self.doc_lengths.len() as u64;
        let doc_lengths_off = HEADER_LEN as u64;
        let dict_off = doc_lengths_off + n * 4;
        let postings_off = dict_off + dict_buf.len() as u64;

        let file = File::create(path)
            .with_context(|| format!("Failed to create index file {}", path.display()))?;
        let mut out = BufWriter::with_capacity(65536, file);

        out.write_all(INDEX_MAGIC)?;
        out.write_all(&INDEX_VERSION.to_le_bytes())?;
        out.write_all(&n.to_le_bytes())?;
        out.write_all(&self.sum_lengths.to_le_bytes())?;
        out.write_all(&doc_lengths_off.to_le_bytes())?;
        out.write_all(&dict_off.to_le_bytes())?;
        out.write_all(&(dict_buf.len() as u64).to_le_bytes())?;
        out.write_all(&postings_off.to_le_bytes())?;
        out.write_all(&(postings_buf.len() as u64).to_le_bytes())?;

        for &len in &self.doc_lengths {
            out.write_all(&len.to_le_bytes())?;
        }
        out.write_all(&dict_buf)?;
        out.write_all(&postings_buf)?;

        out.flush()?;
        out.into_inner()
            .map_err(|e| e.into_error())
            .context("Failed to flush index file")?
            .sync_all()
            .context("Failed to fsync index file")?;
        Ok(())
    }
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn tmp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    std::path::PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_lengths_accumulate() {
        let mut builder = IndexBuilder::new();
        builder.add_document(0, "the quick brown fox");
        builder.add_document(1, "lazy dog");
        assert_eq!(builder.doc_count(), 2);
        assert_eq!(builder.doc_lengths, vec![4, 2]);
        assert_eq!(builder.sum_lengths, 6);
    }

    #[test]
    #[should_panic(expected = "dense and strictly increasing")]
    fn test_duplicate_chunk_id_panics() {
        let mut builder = IndexBuilder::new();
        builder.add_document(0, "a");
        builder.add_document(0, "b");
    }

    #[test]
    fn test_term_frequencies_counted() {
        let mut builder = IndexBuilder::new();
        builder.add_document(0, "cat cat cat dog");
        let cat = &builder.postings["cat"];
        assert_eq!(cat, &vec![(0, 3)]);
        let dog = &builder.postings["dog"];
        assert_eq!(dog, &vec![(0, 1)]);
    }
}
