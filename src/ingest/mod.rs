//! Streaming ingest: resumable byte source, incremental XML page parser,
//! and the checkpoint manager that ties their progress together.
//!
//! The three form a pull-based pipeline in one thread: the parser pulls
//! decompressed bytes from the source, the stream-parse stage pulls pages
//! from the parser and periodically asks the checkpoint manager to persist
//! a consistent (source offset, output size, last page) triple.

pub mod checkpoint;
pub mod source;
pub mod xml;

pub use checkpoint::{Checkpoint, CheckpointManager};
pub use source::{fetch_etag, ByteSource, SourceConfig};
pub use xml::PageStream;

use serde::{Deserialize, Serialize};

/// One page record from the dump, as emitted by the XML parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub page_id: u64,
    pub title: String,
    pub text: String,
    pub namespace: i64,
    pub is_redirect: bool,
}
