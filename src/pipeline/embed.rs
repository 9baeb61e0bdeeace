//! Embed and dense-index stages.
//!
//! Both are thin shells around external capabilities: the sentence
//! embedder and the ANN index builder live outside this crate and are
//! injected as trait objects. The stages own only the file discipline:
//! chunk order in, row order out, `chunk_id` equals row index.

use crate::bundle::ChunkRecord;
use crate::config::EmbedConfig;
use crate::pipeline::Stage;
use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Sentence embedder capability. Deterministic and stateless after load.
pub trait Embedder {
    /// Identifier recorded in `dense.meta.json`.
    fn model_id(&self) -> &str;

    /// Output vector dimension.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    fn embed(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// External ANN index builder: consumes the embeddings file and owns the
/// format of `dense.faiss` and `dense.meta.json`.
pub trait DenseIndexBuilder {
    fn build(&self, embeddings: &Path, index_out: &Path, meta_out: &Path) -> Result<()>;
}

/// Embeddings file: magic, dimension (u32), row count (u64), then
/// `count * dimension` f32 values, all little-endian, in chunk_id order.
pub const EMBEDDINGS_MAGIC: &[u8; 4] = b"PWE1";

pub struct EmbedStage<'a> {
    config: EmbedConfig,
    embedder: &'a dyn Embedder,
}

impl<'a> EmbedStage<'a> {
    pub fn new(config: EmbedConfig, embedder: &'a dyn Embedder) -> Self {
        Self { config, embedder }
    }

    fn write_batch(
        &self,
        out: &mut BufWriter<File>,
        batch: &mut Vec<ChunkRecord>,
        rows: &mut u64,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .with_context(|| format!("Embedder failed on batch starting at chunk {}", rows))?;
        if vectors.len() != batch.len() {
            bail!(
                "embedder returned {} vectors for {} inputs",
                vectors.len(),
                batch.len()
            );
        }
        for vector in vectors {
            if vector.len() != self.embedder.dimension() {
                bail!(
                    "embedder returned dimension {} (expected {})",
                    vector.len(),
                    self.embedder.dimension()
                );
            }
            for value in vector {
                out.write_all(&value.to_le_bytes())?;
            }
            *rows += 1;
        }
        batch.clear();
        Ok(())
    }
}

impl Stage for EmbedStage<'_> {
    fn name(&self) -> &'static str {
        "embed"
    }

    fn config_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.config)?)
    }

    fn input_files(&self) -> Vec<PathBuf> {
        vec![self.config.input_file.clone()]
    }

    fn output_files(&self) -> Vec<PathBuf> {
        vec![self.config.output_file.clone()]
    }

    fn run(&mut self) -> Result<()> {
        if let Some(parent) = self.config.output_file.parent() {
            fs::create_dir_all(parent)?;
        }

        let input = File::open(&self.config.input_file).with_context(|| {
            format!("Failed to open chunks file {}", self.config.input_file.display())
        })?;
        let mut out = BufWriter::with_capacity(65536, File::create(&self.config.output_file)?);

        // Header; the row count is patched in at the end.
        out.write_all(EMBEDDINGS_MAGIC)?;
        out.write_all(&(self.embedder.dimension() as u32).to_le_bytes())?;
        out.write_all(&0u64.to_le_bytes())?;

        let mut rows: u64 = 0;
        let mut batch: Vec<ChunkRecord> = Vec::with_capacity(self.config.batch_size);
        let mut expected_id: u32 = 0;
        for line in BufReader::new(input).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let record: ChunkRecord =
                serde_json::from_str(&line).context("Malformed chunk record")?;
            // chunk_id must equal the dense row index or the two indices
            // would disagree about which text a vector belongs to.
            if record.chunk_id != expected_id {
                bail!(
                    "chunk ids out of order: found {} where {} was expected",
                    record.chunk_id,
                    expected_id
                );
            }
            expected_id += 1;

            batch.push(record);
            if batch.len() == self.config.batch_size {
                self.write_batch(&mut out, &mut batch, &mut rows)?;
            }
        }
        self.write_batch(&mut out, &mut batch, &mut rows)?;

        out.flush()?;
        let mut file = out.into_inner().map_err(|e| e.into_error())?;
        use std::io::Seek;
        file.seek(std::io::SeekFrom::Start(8))?;
        file.write_all(&rows.to_le_bytes())?;
        file.sync_all()?;

        println!("  embedded {rows} chunks ({})", self.embedder.model_id());
        Ok(())
    }
}

pub struct DenseIndexStage<'a> {
    embeddings_file: PathBuf,
    index_dir: PathBuf,
    builder: &'a dyn DenseIndexBuilder,
}

impl<'a> DenseIndexStage<'a> {
    pub fn new(
        embeddings_file: PathBuf,
        index_dir: PathBuf,
        builder: &'a dyn DenseIndexBuilder,
    ) -> Self {
        Self {
            embeddings_file,
            index_dir,
            builder,
        }
    }

    fn index_path(&self) -> PathBuf {
        self.index_dir.join("dense.faiss")
    }

    fn meta_path(&self) -> PathBuf {
        self.index_dir.join("dense.meta.json")
    }
}

impl Stage for DenseIndexStage<'_> {
    fn name(&self) -> &'static str {
        "dense_index"
    }

    fn config_json(&self) -> Result<String> {
        Ok(serde_json::json!({ "embeddings_file": self.embeddings_file }).to_string())
    }

    fn input_files(&self) -> Vec<PathBuf> {
        vec![self.embeddings_file.clone()]
    }

    fn output_files(&self) -> Vec<PathBuf> {
        vec![self.index_path(), self.meta_path()]
    }

    fn run(&mut self) -> Result<()> {
        fs::create_dir_all(&self.index_dir)?;
        self.builder
            .build(&self.embeddings_file, &self.index_path(), &self.meta_path())
            .context("External dense index builder failed")
    }
}
