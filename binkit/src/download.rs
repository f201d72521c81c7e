//! Streaming download and extraction of `.tar.gz` release archives.
//!
//! The response body is forwarded chunk by chunk over a bounded channel to a blocking
//! worker that decompresses and unpacks it entry by entry, so an archive is never held
//! in memory as a whole. [`extract_archive`] is the single extraction routine; the
//! network path ([`fetch_and_extract`]) and the local path ([`extract_file`]) both feed it.

use crate::error::{BinkitError, Result};
use crate::retry::{with_retry, RetryConfig};
use flate2::read::GzDecoder;
use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Leading path segments dropped from archive entries unless told otherwise.
pub const DEFAULT_STRIP_LEVEL: usize = 1;

/// Chunks buffered between the network and the extractor.
const CHANNEL_CAPACITY: usize = 16;

const USER_AGENT: &str = concat!("binkit/", env!("CARGO_PKG_VERSION"));

/// How the archive request is made.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    /// Deadline for the whole request, body included.
    pub timeout: Option<Duration>,
    /// Applies to connecting and the status check only, never to the body.
    pub retry: RetryConfig,
    /// Pre-built client to use instead of a fresh one.
    pub client: Option<Client>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            timeout: None,
            retry: RetryConfig::none(),
            client: None,
        }
    }
}

impl RequestOptions {
    fn client(&self, url: &str) -> Result<Client> {
        match &self.client {
            Some(client) => Ok(client.clone()),
            None => Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .map_err(|source| BinkitError::Transport {
                    url: url.to_string(),
                    source,
                }),
        }
    }
}

/// Result of a successful [`fetch_and_extract`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Directory the archive was extracted into.
    pub path: PathBuf,
    /// Regular files written.
    pub files: usize,
    /// Hex SHA-256 of the downloaded (compressed) bytes.
    pub sha256: String,
}

/// Download a `.tar.gz` from `url` and unpack it into `dest`.
///
/// When `dest` is `None` a fresh temporary directory is created and kept. Each entry
/// loses its first `strip_level` path segments, unless it has no more segments than
/// that. Nothing is rolled back on failure.
pub async fn fetch_and_extract(
    url: &str,
    dest: Option<&Path>,
    options: &RequestOptions,
    strip_level: usize,
) -> Result<Extraction> {
    if !is_http_url(url) {
        return Err(BinkitError::InvalidUrl {
            url: url.to_string(),
        });
    }

    let response = open(url, options).await?;

    let dest = match dest {
        Some(dest) => {
            fs::create_dir_all(dest)?;
            dest.to_path_buf()
        }
        None => temporary_destination()?,
    };

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let worker_dest = dest.clone();
    let mut worker = Some(tokio::task::spawn_blocking(move || {
        extract_archive(ChannelReader::new(rx), &worker_dest, strip_level)
    }));

    let mut tx = Some(tx);
    let mut extracted = None;
    let mut body_error = None;
    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(source) => {
                if let Some(sender) = tx.take() {
                    let _ = sender.send(Err(io::Error::other(source.to_string()))).await;
                }
                body_error = Some(source);
                break;
            }
        };
        hasher.update(&bytes);

        // A closed channel means the extractor is done. Its error wins; on success the
        // rest of the body is still hashed.
        let closed = match &tx {
            Some(sender) => sender.send(Ok(bytes)).await.is_err(),
            None => false,
        };
        if closed {
            tx = None;
            if let Some(handle) = worker.take() {
                extracted = Some(handle.await??);
            }
        }
    }
    drop(tx);

    let files = match worker {
        Some(handle) => handle.await??,
        None => extracted.unwrap_or_default(),
    };
    if let Some(source) = body_error {
        return Err(BinkitError::Transport {
            url: url.to_string(),
            source,
        });
    }
    debug!("Extracted {} files from {} into {}", files, url, dest.display());

    Ok(Extraction {
        path: dest,
        files,
        sha256: hex::encode(hasher.finalize()),
    })
}

/// Unpack a local `.tar.gz` file into `dest`.
pub fn extract_file(archive_path: &Path, dest: &Path, strip_level: usize) -> Result<usize> {
    let file = fs::File::open(archive_path)?;
    fs::create_dir_all(dest)?;
    extract_archive(io::BufReader::new(file), dest, strip_level)
}

/// Decompress and unpack a gzip-compressed tar stream into `dest`.
///
/// Entries are handled in archive order. Parent directories are created for every
/// entry, since tar does not promise directory entries come first. Only regular
/// files are written; links and other special entries are skipped. The stream is
/// read to its end, so a CRC or length mismatch in the gzip trailer is an error.
/// Returns the number of files written.
pub fn extract_archive<R: Read>(reader: R, dest: &Path, strip_level: usize) -> Result<usize> {
    let decoder = GzDecoder::new(reader);
    if decoder.header().is_none() {
        return Err(BinkitError::StreamSetup {
            reason: "input is not a gzip stream".to_string(),
        });
    }

    let mut archive = tar::Archive::new(decoder);
    let entries = archive
        .entries()
        .map_err(|e| BinkitError::StreamSetup {
            reason: e.to_string(),
        })?;

    let extraction_error = |source: io::Error| BinkitError::Extraction {
        dest: dest.display().to_string(),
        source,
    };

    let mut files = 0;
    for entry in entries {
        let mut entry = entry.map_err(extraction_error)?;
        if write_entry(&mut entry, dest, strip_level).map_err(extraction_error)? {
            files += 1;
        }
    }

    // Reading to the end verifies the gzip trailer.
    let mut decoder = archive.into_inner();
    io::copy(&mut decoder, &mut io::sink()).map_err(extraction_error)?;

    Ok(files)
}

fn write_entry<R: Read>(
    entry: &mut tar::Entry<'_, R>,
    dest: &Path,
    strip_level: usize,
) -> io::Result<bool> {
    let raw_path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
    let target = safe_join(dest, &strip_entry_path(&raw_path, strip_level))?;
    let entry_type = entry.header().entry_type();

    if entry_type.is_dir() {
        fs::create_dir_all(&target)?;
        return Ok(false);
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    if !(entry_type.is_file() || entry_type.is_contiguous()) {
        debug!("Skipping {:?} entry {}", entry_type, raw_path);
        return Ok(false);
    }

    debug!("Extracting {} to {}", raw_path, target.display());
    let mut file = fs::File::create(&target)?;
    io::copy(entry, &mut file)?;
    Ok(true)
}

/// Drop the first `strip_level` `/`-separated segments of an archive path.
///
/// Paths with `strip_level` segments or fewer are returned unchanged.
pub fn strip_entry_path(path: &str, strip_level: usize) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() > strip_level {
        parts[strip_level..].join("/")
    } else {
        path.to_string()
    }
}

fn safe_join(dest: &Path, relative: &str) -> io::Result<PathBuf> {
    let mut target = dest.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("archive entry '{relative}' escapes the destination directory"),
                ))
            }
        }
    }
    Ok(target)
}

fn is_http_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn temporary_destination() -> Result<PathBuf> {
    let dir = tempfile::Builder::new()
        .prefix("binkit-download-")
        .tempdir()?;
    #[allow(deprecated)]
    let path = dir.into_path();
    Ok(path)
}

async fn open(url: &str, options: &RequestOptions) -> Result<Response> {
    let client = options.client(url)?;
    let operation_name = format!("Downloading {url}");

    with_retry(&operation_name, &options.retry, || {
        let mut request = client
            .request(options.method.clone(), url)
            .headers(options.headers.clone());
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        async move {
            let response = request
                .send()
                .await
                .map_err(|source| BinkitError::Transport {
                    url: url.to_string(),
                    source,
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(BinkitError::DownloadFailed {
                    url: url.to_string(),
                    status: status.as_u16(),
                    reason: status
                        .canonical_reason()
                        .unwrap_or("Unknown Status")
                        .to_string(),
                });
            }

            Ok(response)
        }
    })
    .await
}

/// Blocking [`Read`] over chunks arriving on a channel.
struct ChannelReader<B> {
    rx: mpsc::Receiver<io::Result<B>>,
    current: Option<B>,
    pos: usize,
}

impl<B> ChannelReader<B> {
    fn new(rx: mpsc::Receiver<io::Result<B>>) -> Self {
        Self {
            rx,
            current: None,
            pos: 0,
        }
    }
}

impl<B: AsRef<[u8]>> Read for ChannelReader<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if let Some(chunk) = &self.current {
                let remaining = &chunk.as_ref()[self.pos..];
                if !remaining.is_empty() {
                    let n = remaining.len().min(buf.len());
                    buf[..n].copy_from_slice(&remaining[..n]);
                    self.pos += n;
                    return Ok(n);
                }
            }

            match self.rx.blocking_recv() {
                Some(Ok(chunk)) => {
                    self.current = Some(chunk);
                    self.pos = 0;
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }
    }
}
