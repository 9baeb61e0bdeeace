//! Filter stage: drop out-of-range chunks and assign final dense ids.

use crate::bundle::ChunkRecord;
use crate::config::FilterConfig;
use crate::pipeline::Stage;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

pub struct FilterStage {
    config: FilterConfig,
}

impl FilterStage {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }
}

impl Stage for FilterStage {
    fn name(&self) -> &'static str {
        "filter"
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

        let mut kept: u32 = 0;
        let mut dropped: u64 = 0;
        for line in BufReader::new(input).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let mut record: ChunkRecord =
                serde_json::from_str(&line).context("Malformed chunk record")?;

            // Length bounds are in characters, not bytes
            let len = record.text.chars().count();
            if len < self.config.min_chunk_length || len > self.config.max_chunk_length {
                dropped += 1;
                continue;
            }

            // Survivors are renumbered densely in arrival order; both
            // indices key off these ids, so this is the final numbering.
            record.chunk_id = kept;
            serde_json::to_writer(&mut out, &record)?;
            out.write_all(b"\n")?;
            kept += 1;
        }

        out.flush()?;
        println!("  kept {kept} chunks, dropped {dropped}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pocketwiki_filter_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn write_chunks(path: &Path, texts: &[&str]) {
        let mut out = String::new();
        for (i, text) in texts.iter().enumerate() {
            let record = ChunkRecord {
                chunk_id: i as u32,
                page_id: 1,
                page_title: "T".into(),
                text: text.to_string(),
                token_count: text.split_whitespace().count() as u32,
            };
            out.push_str(&serde_json::to_string(&record).unwrap());
            out.push('\n');
        }
        fs::write(path, out).unwrap();
    }

    #[test]
    fn test_renumbers_survivors_densely() {
        let input = scratch("in.jsonl");
        let output = scratch("out.jsonl");
        write_chunks(
            &input,
            &[
                "tiny",
                "this chunk is long enough to survive the filter",
                "x",
                "another chunk that clears the minimum length bar",
            ],
        );

        let mut config = FilterConfig::new(&input, &output);
        config.min_chunk_length = 20;
        config.max_chunk_length = 1000;
        FilterStage::new(config).run().unwrap();

        let kept: Vec<ChunkRecord> = fs::read_to_string(&output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].chunk_id, 0);
        assert_eq!(kept[1].chunk_id, 1);
        assert!(kept[0].text.starts_with("this chunk"));
    }

    #[test]
    fn test_bounds_count_characters_not_bytes() {
        let input = scratch("chars_in.jsonl");
        let output = scratch("chars_out.jsonl");
        // 25 two-byte characters: 25 chars but 50 bytes. With a minimum
        // of 30 this must be dropped; a byte count would keep it.
        let accented = "é".repeat(25);
        let survivor = "a".repeat(40);
        write_chunks(&input, &[accented.as_str(), survivor.as_str()]);

        let mut config = FilterConfig::new(&input, &output);
        config.min_chunk_length = 30;
        config.max_chunk_length = 1000;
        FilterStage::new(config).run().unwrap();

        let kept: Vec<ChunkRecord> = fs::read_to_string(&output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, survivor);
    }
}
