//! Hybrid retrieval: BM25 + dense ANN fused with reciprocal rank fusion,
//! resolved against the chunk store into citable context.

pub mod fusion;
pub mod store;

pub use fusion::{rrf_fuse, DEFAULT_RRF_K};
pub use store::ChunkStore;

use crate::bundle::{Bundle, ChunkRecord};
use crate::config::RetrievalConfig;
use crate::index::IndexReader;
use crate::pipeline::Embedder;
use crate::utils::tokenize;
use anyhow::{Context, Result};
use std::sync::Arc;

/// External dense nearest-neighbor index capability.
pub trait DenseIndex {
    /// Top-k nearest chunk ids for a query vector, best first.
    fn search(&self, vector: &[f32], k: usize) -> Result<Vec<(u32, f32)>>;
}

/// A chunk surviving fusion, resolved to its text and provenance.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: u32,
    pub page_id: u64,
    pub page_title: String,
    pub text: String,
    pub fused_score: f32,
}

/// Query-side assembler over one opened bundle.
///
/// The dense half is optional; without it the fused ranking degrades to
/// the sparse list, mirroring a bundle built without embeddings.
pub struct HybridRetriever {
    sparse: IndexReader,
    store: ChunkStore,
    dense: Option<Box<dyn DenseIndex>>,
    embedder: Option<Box<dyn Embedder>>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    /// Open the sparse-only retrieval surface of a bundle.
    pub fn open(bundle: &Bundle, config: RetrievalConfig) -> Result<Self> {
        let sparse = IndexReader::open(&bundle.sparse_index_path())
            .context("Failed to open sparse index")?;
        let store = ChunkStore::open(&bundle.chunks_path())?;
        Ok(Self {
            sparse,
            store,
            dense: None,
            embedder: None,
            config,
        })
    }

    /// Attach the external dense index and its query embedder.
    pub fn with_dense(mut self, dense: Box<dyn DenseIndex>, embedder: Box<dyn Embedder>) -> Self {
        self.dense = Some(dense);
        self.embedder = Some(embedder);
        self
    }

    /// Retrieve the fused top chunks for a query.
    pub fn query(&self, q: &str) -> Result<Vec<RetrievedChunk>> {
        let terms = tokenize(q);
        let sparse_hits = self.sparse.search(&terms, self.config.sparse_k)?;
        let sparse_ids: Vec<u32> = sparse_hits.iter().map(|&(id, _)| id).collect();

        let dense_ids: Vec<u32> = match (&self.dense, &self.embedder) {
            (Some(dense), Some(embedder)) => {
                let vectors = embedder
                    .embed(&[q])
                    .context("Query embedding failed")?;
                let vector = vectors
                    .into_iter()
                    .next()
                    .context("Embedder returned no vector for the query")?;
                dense
                    .search(&vector, self.config.dense_k)
                    .context("Dense index search failed")?
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect()
            }
            _ => Vec::new(),
        };

        let fused = rrf_fuse(
            &dense_ids,
            &sparse_ids,
            self.config.rrf_k,
            self.config.fused_k,
        );

        let mut results = Vec::with_capacity(fused.len());
        let mut seen_pages = ahash::AHashSet::new();
        for (chunk_id, fused_score) in fused {
            let record: Arc<ChunkRecord> = self.store.get(chunk_id)?;
            if self.config.dedup_by_page && !seen_pages.insert(record.page_id) {
                continue;
            }
            results.push(RetrievedChunk {
                chunk_id,
                page_id: record.page_id,
                page_title: record.page_title.clone(),
                text: record.text.clone(),
                fused_score,
            });
        }
        Ok(results)
    }

    /// Concatenate retrieved chunks into a cited context block, keeping
    /// whole chunks within the character budget (~4 chars per token).
    pub fn assemble_context(&self, chunks: &[RetrievedChunk]) -> String {
        let budget = self.config.max_context_tokens * 4;
        let mut context = String::new();
        for chunk in chunks {
            let formatted = format!("[{}]\n{}\n\n", chunk.page_title, chunk.text);
            if context.len() + formatted.len() > budget {
                break;
            }
            context.push_str(&formatted);
        }
        context
    }
}
