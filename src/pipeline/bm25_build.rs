//! BM25 build stage: filtered chunks -> `sparse.idx`.

use crate::bundle::ChunkRecord;
use crate::index::IndexBuilder;
use crate::pipeline::Stage;
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

pub struct Bm25BuildStage {
    input_file: PathBuf,
    output_file: PathBuf,
}

impl Bm25BuildStage {
    pub fn new(input_file: PathBuf, output_file: PathBuf) -> Self {
        Self {
            input_file,
            output_file,
        }
    }
}

impl Stage for Bm25BuildStage {
    fn name(&self) -> &'static str {
        "bm25_build"
    }

    fn config_json(&self) -> Result<String> {
        Ok(serde_json::json!({
            "input_file": self.input_file,
            "output_file": self.output_file,
        })
        .to_string())
    }

    fn input_files(&self) -> Vec<PathBuf> {
        vec![self.input_file.clone()]
    }

    fn output_files(&self) -> Vec<PathBuf> {
        vec![self.output_file.clone()]
    }

    fn run(&mut self) -> Result<()> {
        let input = File::open(&self.input_file).with_context(|| {
            format!("Failed to open chunks file {}", self.input_file.display())
        })?;

        let mut builder = IndexBuilder::new();
        for line in BufReader::new(input).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let record: ChunkRecord =
                serde_json::from_str(&line).context("Malformed chunk record")?;
            if record.chunk_id as usize != builder.doc_count() {
                bail!(
                    "chunk ids out of order: found {} where {} was expected",
                    record.chunk_id,
                    builder.doc_count()
                );
            }
            builder.add_document(record.chunk_id, &record.text);
        }

        let docs = builder.doc_count();
        builder.write(&self.output_file)?;
        println!("  indexed {docs} chunks into {}", self.output_file.display());
        Ok(())
    }
}
