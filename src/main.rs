use anyhow::Result;
use clap::{Parser, Subcommand};
use pocketwiki::bundle::Bundle;
use pocketwiki::config::{PipelineConfig, RetrievalConfig};
use pocketwiki::index::stats;
use pocketwiki::pipeline;
use pocketwiki::retrieval::HybridRetriever;
use std::path::PathBuf;

const DEFAULT_DUMP_URL: &str =
    "https://dumps.wikimedia.org/enwiki/latest/enwiki-latest-pages-articles-multistream.xml.bz2";

#[derive(Parser)]
#[command(name = "pocketwiki")]
#[command(about = "Build portable offline Wikipedia bundles and query them")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a bundle from a MediaWiki dump
    Build {
        /// Output bundle directory
        #[arg(long)]
        out: PathBuf,

        /// Dump URL (http(s):// or file://)
        #[arg(long, default_value = DEFAULT_DUMP_URL)]
        source_url: String,

        /// Pages between checkpoints
        #[arg(long, default_value_t = 1000)]
        checkpoint_pages: u64,

        /// Max tokens per chunk
        #[arg(long, default_value_t = 512)]
        max_chunk_tokens: usize,

        /// Keep redirect pages instead of skipping them
        #[arg(long)]
        keep_redirects: bool,

        /// Discard checkpoints and start from the beginning
        #[arg(long)]
        force_restart: bool,
    },
    /// Query a bundle
    Search {
        /// Bundle directory
        bundle: PathBuf,

        /// Query text
        query: Vec<String>,

        /// Results to return after fusion
        #[arg(short = 'k', long, default_value_t = 10)]
        top_k: usize,

        /// Sparse candidates fed into fusion
        #[arg(long, default_value_t = 10)]
        sparse_k: usize,

        /// Print the assembled context block instead of a result list
        #[arg(long)]
        context: bool,
    },
    /// Show bundle statistics
    Stats {
        /// Bundle directory
        bundle: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            out,
            source_url,
            checkpoint_pages,
            max_chunk_tokens,
            keep_redirects,
            force_restart,
        } => {
            let mut config = PipelineConfig::new(&source_url, out);
            config.stream.checkpoint_every_pages = checkpoint_pages;
            config.stream.skip_redirects = !keep_redirects;
            config.stream.force_restart = force_restart;
            config.chunk.max_chunk_tokens = max_chunk_tokens;

            // Embedding and ANN construction are external capabilities;
            // the CLI builds sparse-only bundles.
            pipeline::run_pipeline(&config, None, None)?;
        }
        Commands::Search {
            bundle,
            query,
            top_k,
            sparse_k,
            context,
        } => {
            let query = query.join(" ");
            if query.trim().is_empty() {
                anyhow::bail!("empty query");
            }

            let bundle = Bundle::open(&bundle)?;
            let mut config = RetrievalConfig::default();
            config.fused_k = top_k;
            config.sparse_k = sparse_k.max(top_k);
            let retriever = HybridRetriever::open(&bundle, config)?;

            let results = retriever.query(&query)?;
            if results.is_empty() {
                println!("no results");
            } else if context {
                print!("{}", retriever.assemble_context(&results));
            } else {
                for (rank, hit) in results.iter().enumerate() {
                    let snippet: String = hit.text.chars().take(120).collect();
                    println!(
                        "{:2}. [{:.4}] {} (page {}, chunk {})",
                        rank + 1,
                        hit.fused_score,
                        hit.page_title,
                        hit.page_id,
                        hit.chunk_id
                    );
                    println!("      {snippet}");
                }
            }
        }
        Commands::Stats { bundle } => {
            stats::show_stats(&bundle)?;
        }
    }

    Ok(())
}
