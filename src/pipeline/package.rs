//! Package stage: assemble the final bundle directory.

use crate::bundle::Manifest;
use crate::config::PipelineConfig;
use crate::index::IndexReader;
use crate::pipeline::Stage;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

pub struct PackageStage {
    config: PipelineConfig,
    sparse_index: PathBuf,
    index_dir: PathBuf,
}

impl PackageStage {
    pub fn new(config: PipelineConfig, sparse_index: PathBuf, index_dir: PathBuf) -> Self {
        Self {
            config,
            sparse_index,
            index_dir,
        }
    }
}

impl Stage for PackageStage {
    fn name(&self) -> &'static str {
        "package"
    }

    fn config_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.config)?)
    }

    fn input_files(&self) -> Vec<PathBuf> {
        vec![self.config.filter.output_file.clone(), self.sparse_index.clone()]
    }

    fn output_files(&self) -> Vec<PathBuf> {
        vec![self.config.bundle_dir.join("manifest.json")]
    }

    fn run(&mut self) -> Result<()> {
        let bundle_dir = &self.config.bundle_dir;
        fs::create_dir_all(bundle_dir)?;

        fs::copy(&self.config.filter.output_file, bundle_dir.join("chunks.jsonl"))
            .context("Failed to copy chunk store into bundle")?;
        fs::copy(&self.sparse_index, bundle_dir.join("sparse.idx"))
            .context("Failed to copy sparse index into bundle")?;

        // Dense artifacts exist only when the embed stages ran.
        for name in ["dense.faiss", "dense.meta.json"] {
            let src = self.index_dir.join(name);
            if src.exists() {
                fs::copy(&src, bundle_dir.join(name))
                    .with_context(|| format!("Failed to copy {name} into bundle"))?;
            }
        }

        // Counts and avgdl come from the artifacts themselves, not from
        // anything tracked during the build.
        let reader = IndexReader::open(&bundle_dir.join("sparse.idx"))?;
        let manifest = Manifest::new(
            reader.doc_count(),
            reader.avgdl(),
            serde_json::to_value(&self.config)?,
        );

        let manifest_path = bundle_dir.join("manifest.json");
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
            .with_context(|| format!("Failed to write {}", manifest_path.display()))?;

        println!("  bundle created at {}", bundle_dir.display());
        Ok(())
    }
}
