//! Bundle manifest and loader.
//!
//! A bundle is a directory:
//!
//! ```text
//! manifest.json     versions, stage configs, chunk count, avgdl
//! chunks.jsonl      one chunk record per line, ordered by chunk_id
//! sparse.idx        BM25 index
//! dense.faiss       opaque ANN index (optional, external)
//! dense.meta.json   embedding model id, dimension, metric (optional)
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// One line of `chunks.jsonl`: the atomic indexable unit.
///
/// `chunk_id` is dense (0..N-1), assigned in chunking order after
/// filtering, and keys both the dense vector row and every posting-list
/// reference. It is stable for the life of the bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: u32,
    pub page_id: u64,
    pub page_title: String,
    pub text: String,
    pub token_count: u32,
}

/// Bundle manifest stored in manifest.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub bundle_version: u32,
    pub builder_version: String,
    /// Unix seconds.
    pub created_at: u64,
    pub chunk_count: u64,
    pub avgdl: f32,
    /// Snapshot of the stage configs that produced this bundle.
    pub stages: serde_json::Value,
}

impl Manifest {
    pub fn new(chunk_count: u64, avgdl: f32, stages: serde_json::Value) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            bundle_version: 1,
            builder_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at,
            chunk_count,
            avgdl,
            stages,
        }
    }
}

/// Sidecar metadata describing the dense index, written by the external
/// ANN builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseMeta {
    pub model: String,
    pub dimension: usize,
    pub metric: String,
}

/// An opened, validated bundle directory.
pub struct Bundle {
    dir: PathBuf,
    manifest: Manifest,
}

impl Bundle {
    /// Open a bundle, verifying the files retrieval depends on.
    pub fn open(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join("manifest.json");
        if !manifest_path.exists() {
            bail!("Not a bundle: {} has no manifest.json", dir.display());
        }
        let manifest: Manifest = serde_json::from_str(
            &std::fs::read_to_string(&manifest_path)
                .with_context(|| format!("Failed to read {}", manifest_path.display()))?,
        )
        .with_context(|| format!("Failed to parse {}", manifest_path.display()))?;

        let bundle = Self {
            dir: dir.to_path_buf(),
            manifest,
        };
        for required in [bundle.chunks_path(), bundle.sparse_index_path()] {
            if !required.exists() {
                bail!("Incomplete bundle: missing {}", required.display());
            }
        }
        Ok(bundle)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn chunks_path(&self) -> PathBuf {
        self.dir.join("chunks.jsonl")
    }

    pub fn sparse_index_path(&self) -> PathBuf {
        self.dir.join("sparse.idx")
    }

    pub fn dense_index_path(&self) -> PathBuf {
        self.dir.join("dense.faiss")
    }

    pub fn dense_meta_path(&self) -> PathBuf {
        self.dir.join("dense.meta.json")
    }

    /// Parse dense.meta.json when the bundle carries a dense index.
    pub fn dense_meta(&self) -> Result<Option<DenseMeta>> {
        let path = self.dense_meta_path();
        if !path.exists() {
            return Ok(None);
        }
        let meta = serde_json::from_str(&std::fs::read_to_string(&path)?)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("pocketwiki_bundle_{}", std::process::id()))
            .join(name);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_open_rejects_missing_manifest() {
        let dir = scratch("no_manifest");
        assert!(Bundle::open(&dir).is_err());
    }

    #[test]
    fn test_open_requires_core_files() {
        let dir = scratch("partial");
        let manifest = Manifest::new(0, 0.0, serde_json::json!({}));
        std::fs::write(
            dir.join("manifest.json"),
            serde_json::to_string_pretty(&manifest).unwrap(),
        )
        .unwrap();
        // chunks.jsonl and sparse.idx still missing
        assert!(Bundle::open(&dir).is_err());

        std::fs::write(dir.join("chunks.jsonl"), "").unwrap();
        std::fs::write(dir.join("sparse.idx"), "").unwrap();
        let bundle = Bundle::open(&dir).unwrap();
        assert_eq!(bundle.manifest().chunk_count, 0);
        assert!(bundle.dense_meta().unwrap().is_none());
    }
}
