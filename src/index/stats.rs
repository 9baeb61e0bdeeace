use crate::bundle::Bundle;
use crate::index::IndexReader;
use anyhow::Result;
use std::path::Path;

/// Display statistics for a bundle's sparse index.
pub fn show_stats(bundle_dir: &Path) -> Result<()> {
    let bundle = Bundle::open(bundle_dir)?;
    let reader = IndexReader::open(&bundle.sparse_index_path())?;
    let manifest = bundle.manifest();

    println!("Bundle Statistics");
    println!("=================");
    println!();
    println!("Bundle path:      {}", bundle_dir.display());
    println!("Created:          {}", manifest.created_at);
    println!("Builder version:  {}", manifest.builder_version);
    println!();
    println!("Documents (N):    {}", reader.doc_count());
    println!("Distinct terms:   {}", reader.term_count());
    println!("Average doc len:  {:.2} tokens", reader.avgdl());
    println!("Chunks:           {}", manifest.chunk_count);

    if let Ok(meta) = std::fs::metadata(bundle.sparse_index_path()) {
        println!("Sparse index:     {}", human_bytes(meta.len()));
    }
    if let Ok(meta) = std::fs::metadata(bundle.chunks_path()) {
        println!("Chunk store:      {}", human_bytes(meta.len()));
    }
    match std::fs::metadata(bundle.dense_index_path()) {
        Ok(meta) => println!("Dense index:      {}", human_bytes(meta.len())),
        Err(_) => println!("Dense index:      (absent; sparse-only bundle)"),
    }

    Ok(())
}

/// Render a byte count with a binary-unit suffix. Bundle artifacts run
/// from a few KiB (tests) to tens of GiB (full dumps), so one decimal
/// place is enough.
fn human_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_bytes_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1023), "1023 B");
        assert_eq!(human_bytes(1024), "1.0 KiB");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(human_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }
}
