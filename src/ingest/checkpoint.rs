//! Atomic checkpointing for the streaming parse stage.
//!
//! A checkpoint is one JSON record describing a consistent cut through
//! the stream: the compressed offset it is safe to reopen the source at,
//! the output size that corresponds to it, and the last page made
//! durable. The record is never allowed to run ahead of the output file;
//! it is written before any fatal error propagates.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub const CHECKPOINT_VERSION: u32 = 1;

/// Durable progress record for one streaming stage.
///
/// Unknown keys are ignored on read; missing keys take defaults, so
/// records survive schema evolution in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Checkpoint {
    pub source_url: String,
    pub source_etag: Option<String>,
    /// Advances only as compressed input is fully consumed.
    pub compressed_bytes_read: u64,
    /// Count of page records emitted to the output file.
    pub pages_processed: u64,
    pub last_page_id: Option<u64>,
    pub last_page_title: Option<String>,
    pub output_file: String,
    pub output_bytes_written: u64,
    /// Unix seconds of the last write.
    pub last_checkpoint_time: u64,
    pub checkpoint_version: u32,
    pub config_hash: Option<String>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            source_url: String::new(),
            source_etag: None,
            compressed_bytes_read: 0,
            pages_processed: 0,
            last_page_id: None,
            last_page_title: None,
            output_file: String::new(),
            output_bytes_written: 0,
            last_checkpoint_time: 0,
            checkpoint_version: CHECKPOINT_VERSION,
            config_hash: None,
        }
    }
}

/// Owns the checkpoint file and decides when to write it.
pub struct CheckpointManager {
    path: PathBuf,
    config_hash: String,
    every_pages: u64,
    every_bytes: u64,
    every: Duration,
    pages_at_last: u64,
    bytes_at_last: u64,
    time_of_last: Instant,
}

impl CheckpointManager {
    pub fn new(
        path: impl Into<PathBuf>,
        config_hash: String,
        every_pages: u64,
        every_bytes: u64,
        every_seconds: u64,
    ) -> Self {
        Self {
            path: path.into(),
            config_hash,
            every_pages,
            every_bytes,
            every: Duration::from_secs(every_seconds),
            pages_at_last: 0,
            bytes_at_last: 0,
            time_of_last: Instant::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    /// Load the stored checkpoint. A missing or unparsable file is
    /// simply no checkpoint.
    pub fn load(&self) -> Option<Checkpoint> {
        let text = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&text) {
            Ok(cp) => Some(cp),
            Err(e) => {
                log::warn!("discarding corrupt checkpoint {}: {e}", self.path.display());
                None
            }
        }
    }

    /// True when any trigger (pages, bytes, wall time) has fired since
    /// the last save.
    pub fn should_checkpoint(&self, pages_processed: u64, output_bytes: u64) -> bool {
        pages_processed - self.pages_at_last >= self.every_pages
            || output_bytes - self.bytes_at_last >= self.every_bytes
            || self.time_of_last.elapsed() >= self.every
    }

    /// Persist a checkpoint: write `<path>.tmp`, fsync, rename over the
    /// final name. Resets the trigger counters on success.
    pub fn save(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        let mut checkpoint = checkpoint.clone();
        checkpoint.checkpoint_version = CHECKPOINT_VERSION;
        checkpoint.config_hash = Some(self.config_hash.clone());
        checkpoint.last_checkpoint_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let result = (|| -> Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(serde_json::to_string_pretty(&checkpoint)?.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result.with_context(|| format!("Failed to save checkpoint {}", self.path.display()))?;

        self.pages_at_last = checkpoint.pages_processed;
        self.bytes_at_last = checkpoint.output_bytes_written;
        self.time_of_last = Instant::now();
        Ok(())
    }

    /// Remove the checkpoint (force restart, or invalidated resume).
    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to delete {}", self.path.display()))
            }
        }
    }
}
