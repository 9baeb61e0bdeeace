//! Chunk stage: split articles into overlapping token windows.

use crate::bundle::ChunkRecord;
use crate::config::ChunkConfig;
use crate::ingest::Page;
use crate::pipeline::Stage;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

pub struct ChunkStage {
    config: ChunkConfig,
}

impl ChunkStage {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }
}

/// Split article text into windows of at most `max_tokens` whitespace
/// tokens, consecutive windows sharing `overlap` tokens.
pub fn chunk_text(text: &str, max_tokens: usize, overlap: usize) -> Vec<(String, usize)> {
    assert!(max_tokens > 0, "max_chunk_tokens must be positive");
    let overlap = overlap.min(max_tokens - 1);

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let stride = max_tokens - overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + max_tokens).min(words.len());
        chunks.push((words[start..end].join(" "), end - start));
        if end == words.len() {
            break;
        }
        start += stride;
    }
    chunks
}

impl Stage for ChunkStage {
    fn name(&self) -> &'static str {
        "chunk"
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
            format!("Failed to open articles file {}", self.config.input_file.display())
        })?;
        let mut out = BufWriter::with_capacity(65536, File::create(&self.config.output_file)?);

        // Ids here are provisional; the filter stage assigns the final
        // dense ids once short and oversized chunks are gone.
        let mut next_id: u32 = 0;
        for line in BufReader::new(input).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let page: Page = serde_json::from_str(&line)
                .with_context(|| format!("Malformed article record at chunk id {next_id}"))?;

            for (text, token_count) in chunk_text(
                &page.text,
                self.config.max_chunk_tokens,
                self.config.overlap_tokens,
            ) {
                let record = ChunkRecord {
                    chunk_id: next_id,
                    page_id: page.page_id,
                    page_title: page.title.clone(),
                    text,
                    token_count: token_count as u32,
                };
                serde_json::to_writer(&mut out, &record)?;
                out.write_all(b"\n")?;
                next_id += 1;
            }
        }

        out.flush()?;
        println!("  wrote {next_id} chunks");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = chunk_text("one two three", 512, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], ("one two three".to_string(), 3));
    }

    #[test]
    fn test_windows_respect_max_tokens() {
        let words: Vec<String> = (0..25).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");
        let chunks = chunk_text(&text, 10, 0);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|(_, n)| *n <= 10));
        assert_eq!(chunks[2].1, 5);
    }

    #[test]
    fn test_overlap_repeats_tail_tokens() {
        let text = "a b c d e f g h";
        let chunks = chunk_text(text, 4, 2);
        assert_eq!(chunks[0].0, "a b c d");
        assert_eq!(chunks[1].0, "c d e f");
        assert_eq!(chunks[2].0, "e f g h");
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(chunk_text("", 512, 50).is_empty());
        assert!(chunk_text("   \n\t ", 512, 50).is_empty());
    }

    #[test]
    fn test_overlap_clamped_below_window() {
        // overlap >= max_tokens would never advance
        let chunks = chunk_text("a b c d e", 2, 5);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.last().unwrap().0, "d e");
    }
}
