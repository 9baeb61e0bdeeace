//! # PocketWiki - offline Wikipedia RAG bundles
//!
//! PocketWiki streams a multi-gigabyte MediaWiki XML dump over HTTP,
//! parses it incrementally under tight memory, and packages the result
//! into a portable bundle that can answer hybrid (lexical + semantic)
//! retrieval queries fully offline.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`ingest`] - Resumable byte source, streaming XML parser, checkpoints
//! - [`pipeline`] - Staged batch processor with input-hash skip/resume
//! - [`index`] - BM25 inverted index (builder + mmap reader)
//! - [`retrieval`] - RRF fusion, chunk store, hybrid query assembly
//! - [`bundle`] - Bundle manifest and layout
//! - [`utils`] - Varint codec, tokenizer, progress shims
//!
//! ## Build flow
//!
//! ```text
//! byte source -> xml parser -> chunker -> filter -> [embed -> dense index]
//!                                               \-> bm25 build -> package
//! ```
//!
//! Every stage reads from and writes to disk; a killed build resumes
//! from its checkpoints and completed-stage state, producing a bundle
//! byte-identical to an uninterrupted run.
//!
//! ## Query flow
//!
//! ```ignore
//! use pocketwiki::bundle::Bundle;
//! use pocketwiki::config::RetrievalConfig;
//! use pocketwiki::retrieval::HybridRetriever;
//!
//! let bundle = Bundle::open(std::path::Path::new("/bundles/wiki"))?;
//! let retriever = HybridRetriever::open(&bundle, RetrievalConfig::default())?;
//! for hit in retriever.query("okapi bm25")? {
//!     println!("{}: {:.4}", hit.page_title, hit.fused_score);
//! }
//! # anyhow::Ok(())
//! ```

pub mod bundle;
pub mod config;
pub mod error;
pub mod index;
pub mod ingest;
pub mod pipeline;
pub mod retrieval;
pub mod utils;

pub use bundle::{Bundle, ChunkRecord, Manifest};
pub use error::{IndexError, IngestError};
pub use index::{IndexBuilder, IndexReader};
pub use retrieval::{HybridRetriever, RetrievedChunk};
