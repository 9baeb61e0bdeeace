//! Index build and query benchmarks over a synthetic corpus.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pocketwiki::index::{IndexBuilder, IndexReader};
use pocketwiki::utils::tokenize;
use std::path::PathBuf;

const VOCAB: &[&str] = &[
    "okapi", "zebra", "giraffe", "stripe", "savanna", "forest", "mammal", "africa", "browse",
    "herbivore", "acacia", "congo", "equine", "coat", "pattern", "evolution", "habitat",
    "population", "conservation", "species",
];

/// Deterministic pseudo-text: no RNG so runs are comparable.
fn synthetic_doc(seed: usize, words: usize) -> String {
    let mut state = seed.wrapping_mul(2654435761) | 1;
    let mut text = String::with_capacity(words * 8);
    for _ in 0..words {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let word = VOCAB[(state >> 33) % VOCAB.len()];
        text.push_str(word);
        text.push(' ');
    }
    text
}

fn index_path() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pocketwiki_bench_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("bench.idx")
}

fn bench_build(c: &mut Criterion) {
    let docs: Vec<String> = (0..2000).map(|i| synthetic_doc(i, 200)).collect();

    c.bench_function("build_2k_docs", |b| {
        b.iter(|| {
            let mut builder = IndexBuilder::new();
            for (i, doc) in docs.iter().enumerate() {
                builder.add_document(i as u32, doc);
            }
            builder.write(black_box(&index_path())).unwrap();
        })
    });
}

fn bench_search(c: &mut Criterion) {
    let path = index_path();
    let mut builder = IndexBuilder::new();
    for i in 0..2000 {
        builder.add_document(i as u32, &synthetic_doc(i as usize, 200));
    }
    builder.write(&path).unwrap();
    let reader = IndexReader::open(&path).unwrap();
    let query = tokenize("okapi stripe conservation");

    c.bench_function("search_top10", |b| {
        b.iter(|| reader.search(black_box(&query), 10).unwrap())
    });
}

criterion_group!(benches, bench_build, bench_search);
criterion_main!(benches);
