//! End-to-end pipeline tests: synthetic dump -> bundle -> queries.

use pocketwiki::bundle::Bundle;
use pocketwiki::config::{PipelineConfig, RetrievalConfig};
use pocketwiki::index::IndexReader;
use pocketwiki::pipeline::run_pipeline;
use pocketwiki::retrieval::HybridRetriever;
use pocketwiki::utils::tokenize;
use std::fs;
use std::path::{Path, PathBuf};

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir()
        .join(format!("pocketwiki_e2e_{}", std::process::id()))
        .join(name);
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn file_url(path: &Path) -> String {
    url::Url::from_file_path(path.canonicalize().unwrap())
        .unwrap()
        .to_string()
}

const TOPICS: &[(&str, &str)] = &[
    (
        "Okapi",
        "The okapi is a giraffid artiodactyl mammal that lives in the northeast \
         of the Democratic Republic of the Congo. Its striped hindquarters resemble \
         a zebra, although it is most closely related to the giraffe.",
    ),
    (
        "Zebra",
        "Zebras are African equines recognizable by their distinctive black and \
         white striped coats. Several theories exist for the function of the \
         stripes, with most evidence supporting insect deterrence.",
    ),
    (
        "Giraffe",
        "The giraffe is a large African hoofed mammal and the tallest living \
         terrestrial animal. Giraffes browse on leaves and twigs of acacia trees \
         far above the reach of other herbivores.",
    ),
    (
        "Bzip2",
        "bzip2 is a free and open-source file compression program that uses the \
         Burrows-Wheeler algorithm. It compresses single files and is often used \
         for distributing large database dumps.",
    ),
];

fn write_dump(dir: &Path) -> String {
    let mut xml =
        String::from("<mediawiki xmlns=\"http://www.mediawiki.org/xml/export-0.10/\">\n");
    for (i, (title, text)) in TOPICS.iter().enumerate() {
        xml.push_str(&format!(
            "  <page>\n    <title>{title}</title>\n    <ns>0</ns>\n    <id>{}</id>\n    \
             <revision>\n      <text>{text}</text>\n    </revision>\n  </page>\n",
            i + 1
        ));
    }
    xml.push_str("</mediawiki>\n");

    let dump = dir.join("dump.xml");
    fs::write(&dump, xml).unwrap();
    file_url(&dump)
}

fn build_bundle(name: &str) -> PathBuf {
    let dir = scratch(name);
    let url = write_dump(&dir);
    let bundle_dir = dir.join("bundle");

    let mut config = PipelineConfig::new(&url, &bundle_dir);
    config.stream.validate_source_unchanged = false;
    run_pipeline(&config, None, None).unwrap();
    bundle_dir
}

#[test]
fn pipeline_produces_queryable_bundle() {
    let bundle_dir = build_bundle("queryable");
    let bundle = Bundle::open(&bundle_dir).unwrap();

    assert_eq!(bundle.manifest().chunk_count, TOPICS.len() as u64);
    assert!(bundle.manifest().avgdl > 0.0);

    let retriever = HybridRetriever::open(&bundle, RetrievalConfig::default()).unwrap();

    let hits = retriever.query("black and white striped zebras").unwrap();
    assert_eq!(hits[0].page_title, "Zebra");

    let hits = retriever.query("Burrows-Wheeler compression").unwrap();
    assert_eq!(hits[0].page_title, "Bzip2");

    // Tokenization identity: query casing must not matter.
    let upper = retriever.query("GIRAFFE").unwrap();
    let lower = retriever.query("giraffe").unwrap();
    assert_eq!(upper[0].chunk_id, lower[0].chunk_id);
}

#[test]
fn build_then_read_law() {
    // open(build(C)).search([t], |C|) lists exactly the documents of C
    // containing t, for every term t in the corpus.
    let bundle_dir = build_bundle("law");
    let bundle = Bundle::open(&bundle_dir).unwrap();
    let reader = IndexReader::open(&bundle.sparse_index_path()).unwrap();

    let corpus: Vec<Vec<String>> = TOPICS.iter().map(|(_, text)| tokenize(text)).collect();
    let all_terms: std::collections::BTreeSet<String> =
        corpus.iter().flatten().cloned().collect();

    for term in &all_terms {
        let expected: std::collections::BTreeSet<u32> = corpus
            .iter()
            .enumerate()
            .filter(|(_, terms)| terms.contains(term))
            .map(|(i, _)| i as u32)
            .collect();
        let found: std::collections::BTreeSet<u32> = reader
            .search(std::slice::from_ref(term), corpus.len())
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(found, expected, "posting mismatch for term {term:?}");
    }
}

#[test]
fn rerun_skips_all_stages_and_leaves_bundle_intact() {
    let dir = scratch("skip");
    let url = write_dump(&dir);
    let bundle_dir = dir.join("bundle");

    let mut config = PipelineConfig::new(&url, &bundle_dir);
    config.stream.validate_source_unchanged = false;
    run_pipeline(&config, None, None).unwrap();

    let manifest_before = fs::read_to_string(bundle_dir.join("manifest.json")).unwrap();
    let index_before = fs::read(bundle_dir.join("sparse.idx")).unwrap();

    // Second run: every stage's input hash matches, nothing is rebuilt.
    run_pipeline(&config, None, None).unwrap();

    assert_eq!(
        fs::read_to_string(bundle_dir.join("manifest.json")).unwrap(),
        manifest_before
    );
    assert_eq!(fs::read(bundle_dir.join("sparse.idx")).unwrap(), index_before);
}

#[test]
fn changed_chunking_config_reruns_downstream_stages() {
    let dir = scratch("rehash");
    let url = write_dump(&dir);
    let bundle_dir = dir.join("bundle");

    let mut config = PipelineConfig::new(&url, &bundle_dir);
    config.stream.validate_source_unchanged = false;
    run_pipeline(&config, None, None).unwrap();
    let manifest_before = fs::read_to_string(bundle_dir.join("manifest.json")).unwrap();

    // Smaller windows change the chunk stage's input hash, which must
    // cascade through filter, bm25 and package.
    config.chunk.max_chunk_tokens = 16;
    config.chunk.overlap_tokens = 4;
    config.filter.min_chunk_length = 20;
    run_pipeline(&config, None, None).unwrap();

    let bundle = Bundle::open(&bundle_dir).unwrap();
    assert!(
        bundle.manifest().chunk_count > TOPICS.len() as u64,
        "smaller windows must produce more chunks"
    );
    assert_ne!(
        fs::read_to_string(bundle_dir.join("manifest.json")).unwrap(),
        manifest_before
    );
}
