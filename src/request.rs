// request.rs from nusclient
//
// ReqData composition, rate-limited/retrying HTTP client, and the
// cache-aware streaming `Reader` state machine.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::cache::{self, CacheError, Metadata};

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request already loaded from this instance")]
    AlreadyLoaded,
    #[error("got status code {status} for url {url}")]
    ResponseStatus { status: u16, url: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// An immutable request description: path, query params, headers, and an
/// optional client certificate. Composable via [`ReqData::compose`] (`⊕` in
/// the design notes): resolves `other.path` against `self.path`, merges
/// params/headers with `other` winning on collision, and keeps `self.cert`
/// unless it is absent.
#[derive(Debug, Clone)]
pub struct ReqData {
    pub path: String,
    pub params: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub cert: Option<String>,
}

impl ReqData {
    pub fn new(
        path: String,
        params: HashMap<String, String>,
        headers: HashMap<String, String>,
        cert: Option<String>,
    ) -> Self {
        ReqData { path, params, headers, cert }
    }

    pub fn from_path(path: impl Into<String>) -> Self {
        ReqData {
            path: path.into(),
            params: HashMap::new(),
            headers: HashMap::new(),
            cert: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Resolves `other.path` against `self.path` per RFC 3986 and merges
    /// params/headers with `other` winning on collision.
    pub fn compose(&self, other: &ReqData) -> Result<ReqData, url::ParseError> {
        let path = if other.path.is_empty() {
            self.path.clone()
        } else {
            match url::Url::parse(&self.path) {
                Ok(base) => base.join(&other.path)?.to_string(),
                Err(_) => other.path.clone(),
            }
        };
        let mut params = self.params.clone();
        params.extend(other.params.clone());
        let mut headers = self.headers.clone();
        headers.extend(other.headers.clone());
        let cert = self.cert.clone().or_else(|| other.cert.clone());
        Ok(ReqData { path, params, headers, cert })
    }
}

impl std::ops::Add for &ReqData {
    type Output = Result<ReqData, url::ParseError>;

    fn add(self, other: &ReqData) -> Self::Output {
        self.compose(other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCheckMode {
    None,
    CheckError,
    Require200,
}

/// Policy knobs for one [`crate::sources`] instance, per spec §4.5.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub load_from_cache: bool,
    pub store_to_cache: bool,
    pub store_metadata: bool,
    pub store_failed_requests: bool,
    pub chunk_size: usize,
    pub response_status_checking: StatusCheckMode,
    pub http_retries: u32,
    pub requests_per_second: f64,
    pub verify_tls: bool,
    pub require_fingerprint: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            load_from_cache: true,
            store_to_cache: true,
            store_metadata: true,
            store_failed_requests: true,
            chunk_size: 1 << 16,
            response_status_checking: StatusCheckMode::Require200,
            http_retries: 3,
            requests_per_second: 5.0,
            verify_tls: true,
            require_fingerprint: None,
        }
    }
}

fn status_forces_retry(status: u16) -> bool {
    status == 420 || status == 429 || (500..520).contains(&status)
}

/// A single-instance token-bucket limiter: blocks the caller, never drops a
/// request. `requests_per_second` of `0.0` disables limiting entirely.
pub struct RateLimiter {
    interval: Option<Duration>,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        let interval = if requests_per_second > 0.0 {
            Some(Duration::from_secs_f64(1.0 / requests_per_second))
        } else {
            None
        };
        RateLimiter { interval, last: Mutex::new(None) }
    }

    pub fn acquire(&self) {
        let Some(interval) = self.interval else { return };
        let mut last = self.last.lock().unwrap();
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

/// A lazy sequence of byte chunks, sourced either from a cached file or an
/// in-flight HTTP response. Reading past the end yields an empty chunk.
pub enum Reader {
    File {
        file: fs::File,
        chunk_size: usize,
        offset: u64,
        size: Option<u64>,
        metadata: Option<Metadata>,
    },
    Response {
        response: reqwest::blocking::Response,
        chunk_size: usize,
        offset: u64,
        size: Option<u64>,
        metadata: Option<Metadata>,
        tee: Option<Tee>,
    },
}

/// State for `STREAM+TEE`: buffers bytes into a `.tmp` file as they're read,
/// committed or discarded once the reader is dropped or explicitly finished.
pub struct Tee {
    final_path: PathBuf,
    meta_path: Option<PathBuf>,
    metadata: Metadata,
    buffer: Vec<u8>,
    store_metadata: bool,
}

/// The write side of `commit`: persists the buffered body (and metadata
/// sidecar, if configured) atomically. Factored out of `Reader::commit` so
/// both the explicit success path and `Reader`'s `Drop` impl go through the
/// same write, and so it can be exercised directly in tests without a live
/// `reqwest::blocking::Response`.
fn commit_tee(tee: &Tee) -> Result<(), RequestError> {
    cache::write_body_atomic(&tee.final_path, &tee.buffer)?;
    if tee.store_metadata {
        if let Some(meta_path) = &tee.meta_path {
            tee.metadata.write_file(meta_path)?;
        }
    }
    Ok(())
}

impl Reader {
    /// The *compressed* byte offset already consumed from the upstream.
    pub fn current_offset(&self) -> u64 {
        match self {
            Reader::File { offset, .. } => *offset,
            Reader::Response { offset, .. } => *offset,
        }
    }

    /// Compressed size for HTTP, exact size for files; `None` if unknown.
    pub fn size(&self) -> Option<u64> {
        match self {
            Reader::File { size, .. } => *size,
            Reader::Response { size, .. } => *size,
        }
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            Reader::File { metadata, .. } => metadata.as_ref(),
            Reader::Response { metadata, .. } => metadata.as_ref(),
        }
    }

    /// Reads the next chunk (up to `chunk_size` bytes). An empty vec signals
    /// end-of-stream.
    pub fn read_chunk(&mut self) -> Result<Vec<u8>, RequestError> {
        match self {
            Reader::File { file, chunk_size, offset, .. } => {
                let mut buf = vec![0u8; *chunk_size];
                let n = file.read(&mut buf)?;
                buf.truncate(n);
                *offset += n as u64;
                Ok(buf)
            }
            Reader::Response { response, chunk_size, offset, tee, .. } => {
                let mut buf = vec![0u8; *chunk_size];
                let n = response.read(&mut buf)?;
                buf.truncate(n);
                *offset += n as u64;
                if let Some(tee) = tee {
                    tee.buffer.extend_from_slice(&buf);
                }
                Ok(buf)
            }
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<u8>, RequestError> {
        let mut out = Vec::new();
        loop {
            let chunk = self.read_chunk()?;
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// `COMMIT_OR_DISCARD` on a clean exit: flushes the tee buffer to the
    /// final path (with metadata sidecar if configured) and renames it into
    /// place. Files opened without a tee are a no-op.
    pub fn commit(&mut self) -> Result<(), RequestError> {
        if let Reader::Response { tee: Some(tee), .. } = self {
            commit_tee(tee)?;
        }
        if let Reader::Response { tee, .. } = self {
            *tee = None;
        }
        Ok(())
    }

    /// `COMMIT_OR_DISCARD` on an error exit: commits anyway when the caller
    /// says the failure should still be cached (`ResponseStatusError` with
    /// `store_metadata && store_failed_requests`), otherwise discards the
    /// `.tmp` buffer.
    pub fn finish_on_error(&mut self, keep: bool) -> Result<(), RequestError> {
        if keep {
            self.commit()
        } else {
            if let Reader::Response { tee: Some(tee), .. } = self {
                cache::discard_tmp(&tee.final_path);
            }
            if let Reader::Response { tee, .. } = self {
                *tee = None;
            }
            Ok(())
        }
    }
}

/// `COMMIT_OR_DISCARD` on a clean scope exit: a `Reader` dropped with a tee
/// still attached (i.e. nobody already called `commit`/`finish_on_error`
/// explicitly) means the stream was read to completion without the caller
/// raising, so the buffered body is flushed to the cache the same way an
/// explicit `commit()` would. This is what actually makes `store_to_cache`
/// take effect, since none of this crate's callers invoke `commit()` by
/// hand after a successful `read_all`/block read.
impl Drop for Reader {
    fn drop(&mut self) {
        if let Reader::Response { tee: Some(_), .. } = self {
            if let Err(e) = self.commit() {
                log::error!("failed to commit cached response to disk: {e}");
            }
        }
    }
}

pub struct RequestClient {
    base: ReqData,
    config: SourceConfig,
    session: reqwest::blocking::Client,
    limiter: RateLimiter,
    cache_root: PathBuf,
}

impl RequestClient {
    pub fn new(
        cache_root: PathBuf,
        base: ReqData,
        config: SourceConfig,
        user_agent: &str,
    ) -> Result<Self, RequestError> {
        let mut base = base;
        base.headers.entry("User-Agent".to_string()).or_insert_with(|| user_agent.to_string());

        let session = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(RequestClient {
            limiter: RateLimiter::new(config.requests_per_second),
            base,
            config,
            session,
            cache_root,
        })
    }

    fn check_status(&self, status: u16, url: &str) -> Result<(), RequestError> {
        match self.config.response_status_checking {
            StatusCheckMode::None => Ok(()),
            StatusCheckMode::CheckError => {
                if status >= 400 {
                    Err(RequestError::ResponseStatus { status, url: url.to_string() })
                } else {
                    Ok(())
                }
            }
            StatusCheckMode::Require200 => {
                if status >= 400 || status != 200 {
                    Err(RequestError::ResponseStatus { status, url: url.to_string() })
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Issues the request directly, bypassing the cache entirely. Subject to
    /// the rate limiter, retry policy, and status-check policy.
    pub fn get_nocache(&self, reqdata: &ReqData) -> Result<reqwest::blocking::Response, RequestError> {
        let merged = self.base.compose(reqdata)?;
        let response = self.send_with_retries(&merged)?;
        self.check_status(response.status().as_u16(), response.url().as_str())?;
        Ok(response)
    }

    /// Unix seconds, clamped to 0 if the clock is somehow before the epoch.
    fn now_unix() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn send_with_retries(&self, reqdata: &ReqData) -> Result<reqwest::blocking::Response, RequestError> {
        let mut attempt = 0;
        loop {
            self.limiter.acquire();
            let mut req = self.session.get(&reqdata.path);
            for (k, v) in &reqdata.headers {
                req = req.header(k, v);
            }
            req = req.query(&reqdata.params.iter().collect::<Vec<_>>());

            let result = req.send();
            match result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status_forces_retry(status) && attempt < self.config.http_retries {
                        attempt += 1;
                        std::thread::sleep(backoff_delay(attempt));
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if attempt < self.config.http_retries {
                        attempt += 1;
                        std::thread::sleep(backoff_delay(attempt));
                        continue;
                    }
                    return Err(RequestError::Http(e));
                }
            }
        }
    }

    /// Runs the `get_reader` state machine described in spec §4.5: a cache
    /// hit under `load_from_cache` replays the cached file (`REPLAY`);
    /// otherwise the request is issued (`FETCH`) and streamed, tee'd into a
    /// `.tmp` cache file when `store_to_cache` is set.
    pub fn get_reader(&self, reqdata: &ReqData) -> Result<Reader, RequestError> {
        let merged = self.base.compose(reqdata)?;
        let cache_path = cache::cache_path(&self.cache_root, &merged)?;
        let meta_path = cache::metadata_path(&cache_path);

        if self.config.load_from_cache && cache_path.is_file() {
            let metadata = if meta_path.is_file() {
                Some(Metadata::from_file(&meta_path)?)
            } else {
                None
            };
            let file = fs::File::open(&cache_path)?;
            let size = file.metadata().ok().map(|m| m.len());
            // A cache hit that previously succeeded needs no re-check; only
            // check status when metadata records one (spec: "if metadata is
            // None, request was loaded from cache and successful").
            if let Some(meta) = &metadata {
                self.check_status(meta.status, &meta.url)?;
            }
            return Ok(Reader::File { file, chunk_size: self.config.chunk_size, offset: 0, size, metadata });
        }

        let request_start = Instant::now();
        let response = self.send_with_retries(&merged)?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let http_version = format!("{:?}", response.version());
        let reason = response
            .status()
            .canonical_reason()
            .unwrap_or("")
            .to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let size = response.content_length();
        let metadata = Metadata {
            http_version,
            status,
            reason,
            headers,
            url: url.clone(),
            timestamp: Self::now_unix(),
            elapsed_ms: request_start.elapsed().as_millis() as u64,
        };

        let tee = if self.config.store_to_cache {
            Some(Tee {
                final_path: cache_path,
                meta_path: if self.config.store_metadata { Some(meta_path) } else { None },
                metadata: metadata.clone(),
                buffer: Vec::new(),
                store_metadata: self.config.store_metadata,
            })
        } else {
            None
        };
        let mut reader = Reader::Response {
            response,
            chunk_size: self.config.chunk_size,
            offset: 0,
            size,
            metadata: Some(metadata),
            tee,
        };

        // Mirrors `COMMIT_OR_DISCARD` on an immediate status-check failure:
        // nothing has streamed yet, so this either writes an empty body (if
        // the caller wants failed requests retained) or discards cleanly.
        if let Err(e) = self.check_status(status, &url) {
            reader.finish_on_error(self.store_on_status_error())?;
            return Err(e);
        }
        Ok(reader)
    }

    /// Whether a failed (status-check-raised) stream should still be
    /// committed to cache, per spec §4.5: only when both `store_metadata`
    /// and `store_failed_requests` are set.
    pub fn store_on_status_error(&self) -> bool {
        self.config.store_metadata && self.config.store_failed_requests
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs_f64(0.5 * attempt as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_joins_path_and_merges_with_right_precedence() {
        let a = ReqData::from_path("https://ccs.cdn.wup.shop.nintendo.net/ccs/download/")
            .with_param("a", "1")
            .with_header("X-A", "a");
        let b = ReqData::from_path("00050000101c9400/tmd")
            .with_param("a", "2")
            .with_header("X-B", "b");
        let composed = a.compose(&b).unwrap();
        assert_eq!(composed.path, "https://ccs.cdn.wup.shop.nintendo.net/ccs/download/00050000101c9400/tmd");
        assert_eq!(composed.params.get("a"), Some(&"2".to_string()));
        assert_eq!(composed.headers.get("X-B"), Some(&"b".to_string()));
    }

    #[test]
    fn compose_keeps_self_cert_when_present() {
        let a = ReqData::from_path("https://example.com/").with_header("x", "1");
        let mut a = a;
        a.cert = Some("self-cert".to_string());
        let b = ReqData::from_path("path");
        let composed = a.compose(&b).unwrap();
        assert_eq!(composed.cert, Some("self-cert".to_string()));
    }

    #[test]
    fn status_forces_retry_matches_spec_ranges() {
        assert!(status_forces_retry(420));
        assert!(status_forces_retry(429));
        assert!(status_forces_retry(500));
        assert!(status_forces_retry(519));
        assert!(!status_forces_retry(520));
        assert!(!status_forces_retry(404));
    }

    #[test]
    fn rate_limiter_with_zero_rate_never_sleeps() {
        let limiter = RateLimiter::new(0.0);
        let start = Instant::now();
        limiter.acquire();
        limiter.acquire();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    /// `Reader`'s `Drop` impl commits through the same path this exercises
    /// directly: a successful stream that nobody explicitly `commit()`ed
    /// must still land on disk, with its metadata sidecar alongside it.
    #[test]
    fn commit_tee_persists_body_and_metadata_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("title").join("tmd");
        let meta_path = dir.path().join("title").join("tmd.meta");
        let tee = Tee {
            final_path: final_path.clone(),
            meta_path: Some(meta_path.clone()),
            metadata: Metadata {
                http_version: "HTTP/1.1".to_string(),
                status: 200,
                reason: "OK".to_string(),
                headers: vec![],
                url: "https://example.com/title/tmd".to_string(),
                timestamp: 0,
                elapsed_ms: 0,
            },
            buffer: b"tmd bytes".to_vec(),
            store_metadata: true,
        };

        commit_tee(&tee).unwrap();

        assert_eq!(fs::read(&final_path).unwrap(), b"tmd bytes");
        assert!(meta_path.exists());
    }

    #[test]
    fn commit_tee_skips_sidecar_when_store_metadata_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("title").join("tmd");
        let meta_path = dir.path().join("title").join("tmd.meta");
        let tee = Tee {
            final_path: final_path.clone(),
            meta_path: Some(meta_path.clone()),
            metadata: Metadata {
                http_version: "HTTP/1.1".to_string(),
                status: 200,
                reason: "OK".to_string(),
                headers: vec![],
                url: "https://example.com/title/tmd".to_string(),
                timestamp: 0,
                elapsed_ms: 0,
            },
            buffer: b"tmd bytes".to_vec(),
            store_metadata: false,
        };

        commit_tee(&tee).unwrap();

        assert_eq!(fs::read(&final_path).unwrap(), b"tmd bytes");
        assert!(!meta_path.exists());
    }
}
