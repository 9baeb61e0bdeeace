//! Resumable decompressed byte stream over `http(s)://` or `file://`.
//!
//! The source hands the XML parser a plain `Read` of decompressed bytes
//! while tracking, on its own side of the seam, how many *compressed*
//! bytes have been durably consumed. For bzip2 input the only offsets
//! safe to reopen at are stream boundaries (multistream dumps have one
//! every block), so the source records a `(compressed, decompressed)`
//! pair at each `StreamEnd` and maps parser positions back to the
//! nearest boundary.

use crate::error::IngestError;
use anyhow::{bail, Context, Result};
use bzip2::{Decompress, Status};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use url::Url;

/// Network and retry knobs for a byte source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Network read granularity.
    pub chunk_size: usize,
    /// Per-request timeout; expiry routes into the retry path.
    pub timeout: Duration,
    pub max_retries: usize,
    /// Base of the exponential backoff schedule.
    pub retry_backoff: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            timeout: Duration::from_secs(300),
            max_retries: 5,
            retry_backoff: Duration::from_secs(10),
        }
    }
}

enum Transport {
    Http {
        client: Client,
        url: String,
        response: Option<Response>,
    },
    File {
        file: File,
    },
}

enum Decoder {
    /// Pass-through for uncompressed local dumps.
    Raw,
    Bz2 { decomp: Decompress },
}

/// Resumable byte source producing decompressed bytes.
pub struct ByteSource {
    transport: Transport,
    decoder: Decoder,
    cfg: SourceConfig,
    /// Compressed offset this session was opened at.
    base_offset: u64,
    /// Absolute compressed bytes consumed (base + this session).
    compressed_consumed: u64,
    /// Decompressed bytes handed out this session.
    decompressed_produced: u64,
    /// (absolute compressed, session decompressed) at each bz2 stream end.
    boundaries: Vec<(u64, u64)>,
    in_buf: Vec<u8>,
    in_pos: usize,
    in_len: usize,
    transport_eof: bool,
}

impl ByteSource {
    /// Open a source at a compressed byte offset.
    ///
    /// For bzip2 input the offset must be a stream boundary previously
    /// returned by [`ByteSource::safe_offset`] (0 is always valid).
    /// Fails with [`IngestError::RangeNotHonored`] when an HTTP server
    /// answers a ranged request with 200; the caller restarts from zero.
    pub fn open(url: &str, offset: u64, cfg: SourceConfig) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("Invalid source URL {url:?}"))?;

        let bz2 = parsed.path().ends_with(".bz2");
        let decoder = if bz2 || parsed.scheme() != "file" {
            // HTTP dumps are always bzip2-compressed
            Decoder::Bz2 {
                decomp: Decompress::new(false),
            }
        } else {
            Decoder::Raw
        };

        let transport = match parsed.scheme() {
            "http" | "https" => {
                let client = Client::builder()
                    .timeout(cfg.timeout)
                    .build()
                    .context("Failed to build HTTP client")?;
                let response = http_connect(&client, url, offset, &cfg, true)?;
                Transport::Http {
                    client,
                    url: url.to_string(),
                    response: Some(response),
                }
            }
            "file" => {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| anyhow::anyhow!("Invalid file URL {url:?}"))?;
                let mut file = File::open(&path)
                    .with_context(|| format!("Local dump not found: {}", path.display()))?;
                if offset > 0 {
                    file.seek(SeekFrom::Start(offset))?;
                }
                Transport::File { file }
            }
            other => bail!("Unsupported URL scheme {other:?}"),
        };

        Ok(Self {
            transport,
            decoder,
            in_buf: vec![0u8; cfg.chunk_size],
            cfg,
            base_offset: offset,
            compressed_consumed: offset,
            decompressed_produced: 0,
            boundaries: Vec::new(),
            in_pos: 0,
            in_len: 0,
            transport_eof: false,
        })
    }

    /// Absolute compressed bytes consumed so far.
    pub fn compressed_consumed(&self) -> u64 {
        self.compressed_consumed
    }

    /// Largest compressed offset that is safe to reopen at, given that
    /// the consumer has durably processed `decompressed_consumed` bytes
    /// of this session's output.
    pub fn safe_offset(&self, decompressed_consumed: u64) -> u64 {
        match self.decoder {
            Decoder::Raw => self.base_offset + decompressed_consumed,
            Decoder::Bz2 { .. } => self
                .boundaries
                .iter()
                .rev()
                .find(|&&(_, out)| out <= decompressed_consumed)
                .map(|&(compressed, _)| compressed)
                .unwrap_or(self.base_offset),
        }
    }

    /// Refill the compressed input buffer, retrying transient failures
    /// with exponential backoff and reconnecting at the current offset.
    fn refill(&mut self) -> io::Result<()> {
        if self.transport_eof {
            return Ok(());
        }
        self.in_pos = 0;
        self.in_len = 0;

        let mut attempt = 0usize;
        loop {
            let result = match &mut self.transport {
                Transport::File { file } => file.read(&mut self.in_buf),
                Transport::Http { response, .. } => match response {
                    Some(r) => r.read(&mut self.in_buf),
                    None => Err(io::Error::new(io::ErrorKind::Other, "connection lost")),
                },
            };

            match result {
                Ok(0) => {
                    self.transport_eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.in_len = n;
                    return Ok(());
                }
                Err(e) => {
                    let Transport::Http {
                        client,
                        url,
                        response,
                    } = &mut self.transport
                    else {
                        return Err(e);
                    };

                    attempt += 1;
                    if attempt > self.cfg.max_retries {
                        return Err(io::Error::new(
                            io::ErrorKind::Other,
                            IngestError::NetworkTransient {
                                retries: self.cfg.max_retries,
                                message: e.to_string(),
                            },
                        ));
                    }

                    let delay = backoff_delay(self.cfg.retry_backoff, attempt);
                    log::warn!(
                        "network read failed at compressed offset {} ({}); retry {}/{} in {:?}",
                        self.compressed_consumed,
                        e,
                        attempt,
                        self.cfg.max_retries,
                        delay
                    );
                    thread::sleep(delay);

                    *response = None;
                    // http_connect runs its own retry schedule; a failure
                    // here has already exhausted the budget.
                    match http_connect(client, url, self.compressed_consumed, &self.cfg, false) {
                        Ok(r) => *response = Some(r),
                        Err(err) => return Err(io::Error::new(io::ErrorKind::Other, err)),
                    }
                }
            }
        }
    }

    fn read_bz2(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.in_pos == self.in_len && !self.transport_eof {
                self.refill()?;
            }
            let at_eof = self.transport_eof && self.in_pos == self.in_len;

            let Decoder::Bz2 { decomp } = &mut self.decoder else {
                unreachable!("read_bz2 on raw decoder");
            };

            let before_in = decomp.total_in();
            let before_out = decomp.total_out();
            // At transport EOF an empty input call drains output still
            // buffered inside the decompressor.
            let result = decomp.decompress(&self.in_buf[self.in_pos..self.in_len], out);
            let status = match result {
                Ok(status) => status,
                Err(_) if at_eof => return Ok(0),
                Err(e) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        IngestError::Decompression {
                            offset: self.compressed_consumed,
                            message: e.to_string(),
                        },
                    ))
                }
            };
            let consumed = (decomp.total_in() - before_in) as usize;
            let produced = (decomp.total_out() - before_out) as usize;

            self.in_pos += consumed;
            self.compressed_consumed += consumed as u64;
            self.decompressed_produced += produced as u64;

            if matches!(status, Status::StreamEnd) {
                // Stream boundary: record it and re-arm for the next
                // stream of a multistream archive.
                self.boundaries
                    .push((self.compressed_consumed, self.decompressed_produced));
                *decomp = Decompress::new(false);
            }

            if produced > 0 {
                return Ok(produced);
            }
            if at_eof {
                return Ok(0);
            }
        }
    }

    fn read_raw(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.in_pos == self.in_len {
            self.refill()?;
            if self.in_len == 0 {
                return Ok(0);
            }
        }
        let n = (self.in_len - self.in_pos).min(out.len());
        out[..n].copy_from_slice(&self.in_buf[self.in_pos..self.in_pos + n]);
        self.in_pos += n;
        self.compressed_consumed += n as u64;
        self.decompressed_produced += n as u64;
        Ok(n)
    }
}

impl Read for ByteSource {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        match self.decoder {
            Decoder::Raw => self.read_raw(out),
            Decoder::Bz2 { .. } => self.read_bz2(out),
        }
    }
}

/// Issue a (possibly ranged) GET, classifying failures.
///
/// `strict_range`: a 200 answer to a ranged request fails with
/// [`IngestError::RangeNotHonored`] instead of silently restarting.
fn http_connect(
    client: &Client,
    url: &str,
    offset: u64,
    cfg: &SourceConfig,
    strict_range: bool,
) -> Result<Response> {
    let mut attempt = 0usize;
    loop {
        let mut request = client.get(url);
        if offset > 0 {
            request = request.header("Range", format!("bytes={offset}-"));
        }

        let outcome: Result<Response, anyhow::Error> = match request.send() {
            Ok(response) => {
                let status = response.status();
                if offset > 0 && status == StatusCode::OK {
                    if strict_range {
                        return Err(IngestError::RangeNotHonored.into());
                    }
                    // Mid-stream reconnect: fall forward by discarding
                    // the prefix the server replayed.
                    log::warn!("server ignored Range header; discarding {offset} bytes");
                    let mut response = response;
                    io::copy(&mut (&mut response).take(offset), &mut io::sink())
                        .context("Failed to skip replayed prefix")?;
                    return Ok(response);
                }
                if status.is_success() {
                    return Ok(response);
                }
                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    Err(anyhow::anyhow!("HTTP {status}"))
                } else {
                    return Err(IngestError::NetworkFatal {
                        status: status.as_u16(),
                    }
                    .into());
                }
            }
            Err(e) => Err(e.into()),
        };

        let e = outcome.unwrap_err();
        attempt += 1;
        if attempt > cfg.max_retries {
            return Err(IngestError::NetworkTransient {
                retries: cfg.max_retries,
                message: e.to_string(),
            }
            .into());
        }
        let delay = backoff_delay(cfg.retry_backoff, attempt);
        log::warn!(
            "connect to {url} failed ({e}); retry {attempt}/{} in {delay:?}",
            cfg.max_retries
        );
        thread::sleep(delay);
    }
}

fn backoff_delay(base: Duration, attempt: usize) -> Duration {
    let capped = attempt.min(6) as u32;
    base * (1u32 << (capped - 1))
}

/// Fetch the source's ETag for checkpoint validation.
///
/// File URLs use the modification time as a pseudo-ETag, so touching the
/// dump invalidates checkpoints the same way a changed remote would.
pub fn fetch_etag(url: &str, timeout: Duration) -> Result<Option<String>> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid source URL {url:?}"))?;

    if parsed.scheme() == "file" {
        let path: PathBuf = parsed
            .to_file_path()
            .map_err(|_| anyhow::anyhow!("Invalid file URL {url:?}"))?;
        let meta = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => return Ok(None),
        };
        let mtime = meta
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        return Ok(Some(format!("file-mtime-{mtime}")));
    }

    let client = Client::builder().timeout(timeout).build()?;
    let response = client
        .head(url)
        .send()
        .with_context(|| format!("HEAD {url} failed"))?;
    if !response.status().is_success() {
        bail!("HEAD {url} returned {}", response.status());
    }
    Ok(response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pocketwiki_src_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn file_url(path: &Path) -> String {
        Url::from_file_path(path).unwrap().to_string()
    }

    #[test]
    fn test_plain_file_roundtrip() {
        let path = scratch("plain.xml");
        std::fs::write(&path, b"hello streaming world").unwrap();

        let mut source = ByteSource::open(&file_url(&path), 0, SourceConfig::default()).unwrap();
        let mut out = Vec::new();
        source.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello streaming world");
        assert_eq!(source.compressed_consumed(), 21);
        assert_eq!(source.safe_offset(10), 10);
    }

    #[test]
    fn test_plain_file_resume_at_offset() {
        let path = scratch("resume.xml");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut source = ByteSource::open(&file_url(&path), 4, SourceConfig::default()).unwrap();
        let mut out = Vec::new();
        source.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"456789");
        assert_eq!(source.safe_offset(2), 6);
    }

    #[test]
    fn test_bz2_file_decodes_and_tracks_boundaries() {
        let payload = b"pocketwiki compressed payload".repeat(64);
        let mut encoder =
            bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();
        let clen = compressed.len() as u64;

        let path = scratch("single.xml.bz2");
        std::fs::write(&path, &compressed).unwrap();

        let mut source = ByteSource::open(&file_url(&path), 0, SourceConfig::default()).unwrap();
        let mut out = Vec::new();
        source.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);

        // Mid-stream positions map back to offset 0; the end maps to the
        // completed stream boundary.
        assert_eq!(source.safe_offset(payload.len() as u64 / 2), 0);
        assert_eq!(source.safe_offset(payload.len() as u64), clen);
    }

    #[test]
    fn test_multistream_bz2_boundaries() {
        let mut compressed = Vec::new();
        let mut stream_lens = Vec::new();
        let mut full = Vec::new();
        for part in [&b"first stream "[..], b"second stream ", b"third stream"] {
            let mut encoder =
                bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
            encoder.write_all(part).unwrap();
            let bytes = encoder.finish().unwrap();
            stream_lens.push(bytes.len() as u64);
            compressed.extend_from_slice(&bytes);
            full.extend_from_slice(part);
        }

        let path = scratch("multi.xml.bz2");
        std::fs::write(&path, &compressed).unwrap();

        let mut source = ByteSource::open(&file_url(&path), 0, SourceConfig::default()).unwrap();
        let mut out = Vec::new();
        source.read_to_end(&mut out).unwrap();
        assert_eq!(out, full);

        // After consuming "first stream " the safe offset is the first
        // stream's end; one byte earlier it is still 0.
        assert_eq!(source.safe_offset(12), 0);
        assert_eq!(source.safe_offset(13), stream_lens[0]);
        assert_eq!(
            source.safe_offset(full.len() as u64),
            compressed.len() as u64
        );
    }

    #[test]
    fn test_file_mtime_pseudo_etag() {
        let path = scratch("etag.xml");
        std::fs::write(&path, b"x").unwrap();
        let url = file_url(&path);

        let a = fetch_etag(&url, Duration::from_secs(5)).unwrap().unwrap();
        let b = fetch_etag(&url, Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("file-mtime-"));
    }
}
