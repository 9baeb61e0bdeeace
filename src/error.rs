//! Error kinds that callers need to match on.
//!
//! Most of the crate returns `anyhow::Result` and attaches context at the
//! call site. The two places where the *kind* of failure drives control
//! flow get typed enums: the ingest path (retry vs. abort vs. restart)
//! and the index read path (corruption must fail open() loudly).

use std::path::PathBuf;

/// Failures on the streaming ingest path.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IngestError {
    /// Transient network failure that exhausted its retry budget.
    #[error("network error after {retries} retries: {message}")]
    NetworkTransient { retries: usize, message: String },

    /// Non-retriable HTTP failure (4xx other than the resume downgrade).
    #[error("HTTP request failed with status {status}")]
    NetworkFatal { status: u16 },

    /// The server ignored a Range request and replied 200 from the start.
    /// The caller must discard its offset and restart from zero.
    #[error("server does not honor range requests; restart from offset 0")]
    RangeNotHonored,

    /// Malformed bzip2 data. Fatal for the current run; the checkpoint
    /// is preserved so a later run can retry from the last safe offset.
    #[error("bzip2 decompression failed at compressed offset {offset}: {message}")]
    Decompression { offset: u64, message: String },

    /// The byte stream ended inside a `<page>` element. Retriable: the
    /// caller resumes from the last checkpointed offset.
    #[error("input truncated inside a page element (after page id {last_page_id:?})")]
    Truncated { last_page_id: Option<u64> },
}

impl IngestError {
    /// Whether a retry from the last checkpoint may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            IngestError::NetworkTransient { .. } | IngestError::Truncated { .. }
        )
    }
}

/// Failures raised by the sparse index reader.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// A varint ended mid-stream or encoded more than 64 bits.
    #[error("malformed varint at byte offset {offset}")]
    MalformedVarint { offset: usize },

    /// Structural damage detected while opening or reading the index.
    #[error("corrupt index {}: {message}", .path.display())]
    Corrupt { path: PathBuf, message: String },
}

impl IndexError {
    pub fn corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        IndexError::Corrupt {
            path: path.into(),
            message: message.into(),
        }
    }
}
