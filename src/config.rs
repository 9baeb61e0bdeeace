//! Configuration records for the build pipeline and the retrieval path.
//!
//! Every stage takes an immutable config struct; the serialized JSON form
//! feeds the stage input hash, so adding a field invalidates prior stage
//! state on upgrade, which is the desired behavior.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the streaming dump parser stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamParseConfig {
    /// Dump URL: `http(s)://` or `file://`.
    pub source_url: String,
    /// Destination for the parsed `articles.jsonl`.
    pub output_file: PathBuf,

    // Checkpointing
    pub checkpoint_every_pages: u64,
    pub checkpoint_every_bytes: u64,
    pub checkpoint_every_seconds: u64,

    // HTTP streaming
    pub http_chunk_size: usize,
    pub http_timeout_secs: u64,
    pub max_retries: usize,
    pub retry_backoff_secs: u64,

    // Parsing
    pub skip_redirects: bool,
    pub skip_disambiguation: bool,
    pub allowed_namespaces: Vec<i64>,

    // Resume behavior
    pub force_restart: bool,
    pub validate_source_unchanged: bool,
}

impl StreamParseConfig {
    pub fn new(source_url: impl Into<String>, output_file: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            output_file: output_file.into(),
            checkpoint_every_pages: 1000,
            checkpoint_every_bytes: 100 * 1024 * 1024,
            checkpoint_every_seconds: 60,
            http_chunk_size: 1024 * 1024,
            http_timeout_secs: 300,
            max_retries: 5,
            retry_backoff_secs: 10,
            skip_redirects: true,
            skip_disambiguation: false,
            allowed_namespaces: vec![0],
            force_restart: false,
            validate_source_unchanged: true,
        }
    }
}

/// Configuration for the chunking stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    /// Window size in whitespace tokens.
    pub max_chunk_tokens: usize,
    /// Tokens shared between consecutive windows of one article.
    pub overlap_tokens: usize,
}

impl ChunkConfig {
    pub fn new(input_file: impl Into<PathBuf>, output_file: impl Into<PathBuf>) -> Self {
        Self {
            input_file: input_file.into(),
            output_file: output_file.into(),
            max_chunk_tokens: 512,
            overlap_tokens: 50,
        }
    }
}

/// Configuration for the length-filter stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    pub min_chunk_length: usize,
    pub max_chunk_length: usize,
}

impl FilterConfig {
    pub fn new(input_file: impl Into<PathBuf>, output_file: impl Into<PathBuf>) -> Self {
        Self {
            input_file: input_file.into(),
            output_file: output_file.into(),
            min_chunk_length: 100,
            max_chunk_length: 10_000,
        }
    }
}

/// Configuration for the embedding stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    pub model_name: String,
    pub batch_size: usize,
}

impl EmbedConfig {
    pub fn new(input_file: impl Into<PathBuf>, output_file: impl Into<PathBuf>) -> Self {
        Self {
            input_file: input_file.into(),
            output_file: output_file.into(),
            model_name: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            batch_size: 32,
        }
    }
}

/// Configuration for the hybrid retrieval path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub dense_k: usize,
    pub sparse_k: usize,
    pub fused_k: usize,
    /// RRF rank constant.
    pub rrf_k: f32,
    /// Collapse results to one chunk per page.
    pub dedup_by_page: bool,
    /// Context budget; chars are estimated at four per token.
    pub max_context_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            dense_k: 10,
            sparse_k: 10,
            fused_k: 10,
            rrf_k: crate::retrieval::fusion::DEFAULT_RRF_K,
            dedup_by_page: false,
            max_context_tokens: 4000,
        }
    }
}

/// Top-level pipeline configuration assembled by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory for inter-stage artifacts, checkpoints, and stage state.
    pub work_dir: PathBuf,
    /// Final bundle directory.
    pub bundle_dir: PathBuf,
    pub stream: StreamParseConfig,
    pub chunk: ChunkConfig,
    pub filter: FilterConfig,
    pub embed: EmbedConfig,
}

impl PipelineConfig {
    /// Wire up the conventional work-directory layout for a bundle build.
    pub fn new(source_url: &str, bundle_dir: impl Into<PathBuf>) -> Self {
        let bundle_dir = bundle_dir.into();
        let work_dir = bundle_dir.join("work");
        let articles = work_dir.join("parsed").join("articles.jsonl");
        let chunks = work_dir.join("chunks").join("chunks.jsonl");
        let filtered = work_dir.join("filtered").join("filtered.jsonl");
        let embeddings = work_dir.join("embeddings").join("embeddings.bin");

        Self {
            stream: StreamParseConfig::new(source_url, &articles),
            chunk: ChunkConfig::new(&articles, &chunks),
            filter: FilterConfig::new(&chunks, &filtered),
            embed: EmbedConfig::new(&filtered, &embeddings),
            work_dir,
            bundle_dir,
        }
    }
}
