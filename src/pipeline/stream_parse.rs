//! StreamParse stage: byte source -> page parser -> `articles.jsonl`,
//! with checkpointed, deduplicated resume.

use crate::config::StreamParseConfig;
use crate::error::IngestError;
use crate::ingest::{fetch_etag, ByteSource, Checkpoint, CheckpointManager, PageStream, SourceConfig};
use crate::ingest::xml::{is_disambiguation, is_redirect_text};
use crate::pipeline::{hash_config, Stage};
use crate::utils::progress::ProgressBar;
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct StreamParseStage {
    config: StreamParseConfig,
    checkpoint_file: PathBuf,
}

impl StreamParseStage {
    pub fn new(config: StreamParseConfig, work_dir: &Path) -> Self {
        let checkpoint_file = work_dir
            .join("checkpoints")
            .join("stream_parse.checkpoint.json");
        Self {
            config,
            checkpoint_file,
        }
    }

    fn source_config(&self) -> SourceConfig {
        SourceConfig {
            chunk_size: self.config.http_chunk_size,
            timeout: Duration::from_secs(self.config.http_timeout_secs),
            max_retries: self.config.max_retries,
            retry_backoff: Duration::from_secs(self.config.retry_backoff_secs),
        }
    }

    fn manager(&self) -> Result<CheckpointManager> {
        Ok(CheckpointManager::new(
            &self.checkpoint_file,
            hash_config(&self.config)?,
            self.config.checkpoint_every_pages,
            self.config.checkpoint_every_bytes,
            self.config.checkpoint_every_seconds,
        ))
    }

    /// Evaluate the resume conditions in order; any failure means a
    /// fresh start with the checkpoint discarded.
    fn resumable(&self, mgr: &CheckpointManager, current_etag: Option<&str>) -> Option<Checkpoint> {
        let cp = mgr.load()?;

        if cp.source_url != self.config.source_url {
            log::info!("checkpoint source URL changed; starting fresh");
            return None;
        }
        if self.config.validate_source_unchanged && cp.source_etag.as_deref() != current_etag {
            log::info!(
                "source ETag changed ({:?} -> {:?}); starting fresh",
                cp.source_etag,
                current_etag
            );
            return None;
        }
        let Ok(meta) = fs::metadata(&self.config.output_file) else {
            log::info!("checkpoint exists but output file does not; starting fresh");
            return None;
        };
        if meta.len() < cp.output_bytes_written {
            log::info!("output file shorter than checkpoint records; starting fresh");
            return None;
        }
        if cp.config_hash.as_deref() != Some(mgr.config_hash()) {
            log::info!("stage config changed; starting fresh");
            return None;
        }
        Some(cp)
    }

    fn run_streaming(&self) -> Result<()> {
        let mut mgr = self.manager()?;

        if self.config.force_restart {
            mgr.delete()?;
        }

        let current_etag = if self.config.validate_source_unchanged {
            match fetch_etag(
                &self.config.source_url,
                Duration::from_secs(self.config.http_timeout_secs.min(30)),
            ) {
                Ok(etag) => etag,
                Err(e) => {
                    log::warn!("could not fetch source ETag: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        if !self.config.force_restart {
            if let Some(cp) = self.resumable(&mgr, current_etag.as_deref()) {
                println!(
                    "  resuming from checkpoint: {} pages, compressed offset {}",
                    cp.pages_processed, cp.compressed_bytes_read
                );
                match self.parse_from(&mut mgr, cp, true) {
                    Err(e)
                        if e.downcast_ref::<IngestError>()
                            .is_some_and(|e| matches!(e, IngestError::RangeNotHonored)) =>
                    {
                        log::warn!("server does not honor range requests; restarting from zero");
                    }
                    other => return other,
                }
            }
        }

        // Fresh start: drop any stale checkpoint and output.
        mgr.delete()?;
        let fresh = Checkpoint {
            source_url: self.config.source_url.clone(),
            source_etag: current_etag,
            output_file: self.config.output_file.display().to_string(),
            ..Checkpoint::default()
        };
        self.parse_from(&mut mgr, fresh, false)
    }

    /// Stream pages from `checkpoint.compressed_bytes_read`, appending to
    /// the output (resume) or rewriting it (fresh).
    fn parse_from(
        &self,
        mgr: &mut CheckpointManager,
        checkpoint: Checkpoint,
        resume: bool,
    ) -> Result<()> {
        if let Some(parent) = self.config.output_file.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = if resume {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&self.config.output_file)?;
            // Drop any trailing partial record past the durable cut.
            file.set_len(checkpoint.output_bytes_written)?;
            file.seek(SeekFrom::End(0))?;
            file
        } else {
            File::create(&self.config.output_file)?
        };
        let mut out = BufWriter::with_capacity(65536, file);

        let source = ByteSource::open(
            &self.config.source_url,
            checkpoint.compressed_bytes_read,
            self.source_config(),
        )?;

        let mut pages_processed = checkpoint.pages_processed;
        let mut bytes_written = checkpoint.output_bytes_written;
        let mut last_page_id = checkpoint.last_page_id;
        let mut last_page_title = checkpoint.last_page_title.clone();
        // The parser may re-emit pages whose bytes straddle the resume
        // point; everything at or below this id is already durable.
        let dedup_floor = if resume { checkpoint.last_page_id } else { None };

        let mut stream = PageStream::new(source);
        // Parser position just past the last fully handled page; the
        // only positions safe to derive a resume offset from.
        let mut safe_consumed = 0u64;

        let pb = ProgressBar::new_spinner();
        pb.enable_steady_tick(Duration::from_millis(200));

        let result = (|| -> Result<()> {
            while let Some(next) = stream.next() {
                let page = next?;
                safe_consumed = stream.consumed();

                if dedup_floor.is_some_and(|floor| page.page_id <= floor) {
                    continue;
                }
                if !self.config.allowed_namespaces.contains(&page.namespace) {
                    continue;
                }
                if self.config.skip_redirects
                    && (page.is_redirect || is_redirect_text(&page.text))
                {
                    continue;
                }
                if self.config.skip_disambiguation && is_disambiguation(&page.title, &page.text) {
                    continue;
                }

                let mut line = serde_json::to_string(&page)?;
                line.push('\n');
                out.write_all(line.as_bytes())?;
                bytes_written += line.len() as u64;
                pages_processed += 1;
                last_page_id = Some(page.page_id);
                last_page_title = Some(page.title);

                pb.set_message(format!("parsed {pages_processed} pages"));

                if mgr.should_checkpoint(pages_processed, bytes_written) {
                    out.flush()?;
                    out.get_ref().sync_all()?;
                    mgr.save(&Checkpoint {
                        source_url: self.config.source_url.clone(),
                        source_etag: checkpoint.source_etag.clone(),
                        compressed_bytes_read: stream.inner().safe_offset(safe_consumed),
                        pages_processed,
                        last_page_id,
                        last_page_title: last_page_title.clone(),
                        output_file: self.config.output_file.display().to_string(),
                        output_bytes_written: bytes_written,
                        ..Checkpoint::default()
                    })?;
                }
            }
            out.flush()?;
            out.get_ref().sync_all()?;
            Ok(())
        })();

        pb.finish_and_clear();

        if let Err(e) = result {
            // Flush a final checkpoint before surfacing the failure so
            // the next run resumes instead of restarting. If the output
            // cannot be made durable the previous checkpoint (which
            // described an earlier consistent cut) stays authoritative.
            let flushed = out.flush().is_ok() && out.get_ref().sync_all().is_ok();
            if flushed {
                if let Err(save_err) = mgr.save(&Checkpoint {
                    source_url: self.config.source_url.clone(),
                    source_etag: checkpoint.source_etag.clone(),
                    compressed_bytes_read: stream.inner().safe_offset(safe_consumed),
                    pages_processed,
                    last_page_id,
                    last_page_title,
                    output_file: self.config.output_file.display().to_string(),
                    output_bytes_written: bytes_written,
                    ..Checkpoint::default()
                }) {
                    log::error!("failed to write checkpoint while failing: {save_err:#}");
                }
            } else {
                log::warn!("output not durable at failure; keeping previous checkpoint");
            }
            return Err(e).with_context(|| {
                format!(
                    "streaming parse of {} failed after {pages_processed} pages",
                    self.config.source_url
                )
            });
        }

        println!("  parsed {pages_processed} pages total");
        // Stage success: progress is captured by stage state from here on.
        mgr.delete()?;
        Ok(())
    }
}

impl Stage for StreamParseStage {
    fn name(&self) -> &'static str {
        "stream_parse"
    }

    fn config_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.config)?)
    }

    fn input_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn output_files(&self) -> Vec<PathBuf> {
        vec![self.config.output_file.clone()]
    }

    fn run(&mut self) -> Result<()> {
        self.run_streaming()
    }
}
