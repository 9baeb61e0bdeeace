//! Pipeline stage framework and driver.
//!
//! Stages communicate through files only; each persists a completion
//! record keyed by a hash of its config, its input file digests, and the
//! tool version. A rerun with unchanged inputs skips the stage, which is
//! what makes arbitrary mid-run termination recoverable: partially
//! finished stages never write state and simply run again.

pub mod bm25_build;
pub mod chunk;
pub mod embed;
pub mod filter;
pub mod package;
pub mod stream_parse;

pub use bm25_build::Bm25BuildStage;
pub use chunk::ChunkStage;
pub use embed::{DenseIndexBuilder, DenseIndexStage, EmbedStage, Embedder};
pub use filter::FilterStage;
pub use package::PackageStage;
pub use stream_parse::StreamParseStage;

use crate::config::PipelineConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// A pipeline stage with idempotent skip/resume semantics.
pub trait Stage {
    /// Snake-case stage name; also names the state file.
    fn name(&self) -> &'static str;

    /// Serialized config, hashed into the input hash.
    fn config_json(&self) -> Result<String>;

    /// Input files whose content digests feed the input hash.
    fn input_files(&self) -> Vec<PathBuf>;

    /// Outputs that must exist for the stage to be skippable.
    fn output_files(&self) -> Vec<PathBuf>;

    fn run(&mut self) -> Result<()>;
}

/// State persisted after a successful stage run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageState {
    pub stage_name: String,
    pub input_hash: String,
    pub completed: bool,
    /// Unix seconds.
    pub completed_at: u64,
    pub output_files: Vec<String>,
}

/// First 16 hex chars of sha256 over a serializable config.
pub fn hash_config<T: Serialize>(config: &T) -> Result<String> {
    let json = serde_json::to_string(config).context("Failed to serialize config for hashing")?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(hex::encode(hasher.finalize())[..16].to_string())
}

/// Streaming sha256 digest of a file, hex-encoded and truncated.
fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("Failed to open stage input {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 65536];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize())[..16].to_string())
}

/// Deterministic hash over config + input digests + tool version.
fn input_hash(stage: &dyn Stage) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(stage.config_json()?.as_bytes());
    for input in stage.input_files() {
        if input.exists() {
            hasher.update(hash_file(&input)?.as_bytes());
        } else {
            hasher.update(b"absent");
        }
    }
    hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
    Ok(hex::encode(hasher.finalize())[..16].to_string())
}

fn state_file(work_dir: &Path, stage_name: &str) -> PathBuf {
    work_dir.join("state").join(format!("{stage_name}.state.json"))
}

fn load_state(path: &Path) -> Option<StageState> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Run one stage unless its prior completion still holds.
/// Returns true when the stage actually ran.
pub fn execute(stage: &mut dyn Stage, work_dir: &Path) -> Result<bool> {
    let state_path = state_file(work_dir, stage.name());
    let hash = input_hash(stage)?;

    if let Some(state) = load_state(&state_path) {
        if state.completed
            && state.input_hash == hash
            && stage.output_files().iter().all(|f| f.exists())
        {
            println!("  skipping {} (already completed)", stage.name());
            return Ok(false);
        }
        if state.completed && state.input_hash != hash {
            log::info!("{}: input hash changed, re-running", stage.name());
        }
    }

    println!("  running {}...", stage.name());
    stage
        .run()
        .with_context(|| format!("Stage {} failed", stage.name()))?;

    let state = StageState {
        stage_name: stage.name().to_string(),
        input_hash: hash,
        completed: true,
        completed_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
        output_files: stage
            .output_files()
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
    };
    write_state(&state_path, &state)?;
    println!("  {} completed", stage.name());
    Ok(true)
}

fn write_state(path: &Path, state: &StageState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let result = (|| -> Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(serde_json::to_string_pretty(state)?.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result.with_context(|| format!("Failed to persist stage state {}", path.display()))
}

/// Execute the full build pipeline in its fixed order.
///
/// The embed and dense-index stages run only when their external
/// capabilities are supplied; without them the bundle is sparse-only.
pub fn run_pipeline(
    config: &PipelineConfig,
    embedder: Option<&dyn Embedder>,
    dense_builder: Option<&dyn DenseIndexBuilder>,
) -> Result<()> {
    fs::create_dir_all(&config.work_dir)?;

    println!("=== Stage 1/7: stream_parse ===");
    let mut stream = StreamParseStage::new(config.stream.clone(), &config.work_dir);
    execute(&mut stream, &config.work_dir)?;

    println!("=== Stage 2/7: chunk ===");
    let mut chunk = ChunkStage::new(config.chunk.clone());
    execute(&mut chunk, &config.work_dir)?;

    println!("=== Stage 3/7: filter ===");
    let mut filter = FilterStage::new(config.filter.clone());
    execute(&mut filter, &config.work_dir)?;

    let index_dir = config.work_dir.join("indexes");
    match (embedder, dense_builder) {
        (Some(embedder), Some(dense_builder)) => {
            println!("=== Stage 4/7: embed ===");
            let mut embed = EmbedStage::new(config.embed.clone(), embedder);
            execute(&mut embed, &config.work_dir)?;

            println!("=== Stage 5/7: dense_index ===");
            let mut dense = DenseIndexStage::new(
                config.embed.output_file.clone(),
                index_dir.clone(),
                dense_builder,
            );
            execute(&mut dense, &config.work_dir)?;
        }
        _ => {
            println!("=== Stages 4-5/7: embed + dense_index (no embedder wired; skipping) ===");
        }
    }

    println!("=== Stage 6/7: bm25_build ===");
    let sparse_path = index_dir.join("sparse.idx");
    let mut bm25 = Bm25BuildStage::new(config.filter.output_file.clone(), sparse_path.clone());
    execute(&mut bm25, &config.work_dir)?;

    println!("=== Stage 7/7: package ===");
    let mut package = PackageStage::new(config.clone(), sparse_path, index_dir);
    execute(&mut package, &config.work_dir)?;

    Ok(())
}
