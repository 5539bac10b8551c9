// cache.rs from nusclient
//
// Deterministic request -> filesystem path mapping, JSON metadata sidecar,
// and atomic tmp-then-rename body writes.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::ReqData;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("metadata file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Sidecar describing a cached response. Written once, read thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub http_version: String,
    pub status: u16,
    pub reason: String,
    /// Response headers, preserving repeated header names.
    pub headers: Vec<(String, String)>,
    pub url: String,
    pub timestamp: u64,
    pub elapsed_ms: u64,
}

impl Metadata {
    pub fn from_file(path: &Path) -> Result<Self, CacheError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn write_file(&self, path: &Path) -> Result<(), CacheError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        let tmp_path = tmp_path_for(path);
        fs::write(&tmp_path, contents)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

const FILESYSTEM_ILLEGAL: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', ' '];

/// Replaces filesystem-illegal characters (and spaces) with `_`.
fn sanitize_component(s: &str) -> String {
    s.chars()
        .map(|c| if FILESYSTEM_ILLEGAL.contains(&c) || c.is_control() { '_' } else { c })
        .collect()
}

/// Sanitizes a `/`-separated directory path component-by-component, so
/// legitimate path separators survive while everything else illegal is
/// replaced.
fn sanitize_dirpath(s: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for part in s.split('/') {
        if part.is_empty() {
            continue;
        }
        out.push(sanitize_component(part));
    }
    out
}

fn fmt_pairs<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    pairs
        .map(|(k, v)| format!("{k}+{v}"))
        .collect::<Vec<_>>()
        .join("--")
}

/// Maps a [`ReqData`] to its on-disk cache path:
/// `<root>/<scheme>__<host>/<sanitized path dir>/<filename>[---k+v...][---k+v...]`.
pub fn cache_path(root: &Path, reqdata: &ReqData) -> Result<PathBuf, url::ParseError> {
    let url = url::Url::parse(&reqdata.path)?;
    let scheme = url.scheme();
    let host = url.host_str().unwrap_or("");
    let url_path = url.path().trim_start_matches('/');

    let (dirname, filename) = match url_path.rfind('/') {
        Some(idx) => (&url_path[..idx], &url_path[idx + 1..]),
        None => ("", url_path),
    };

    let mut base = root.to_path_buf();
    base.push(sanitize_component(&format!("{scheme}__{host}")));
    base.push(sanitize_dirpath(dirname));

    let mut name = filename.to_string();
    if !reqdata.params.is_empty() {
        let mut entries: Vec<(&str, String)> = reqdata
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let fmt = fmt_pairs(entries.iter().map(|(k, v)| (*k, v.as_str())));
        if !fmt.is_empty() {
            name.push_str("---");
            name.push_str(&fmt);
        }
    }
    if !reqdata.headers.is_empty() {
        let mut entries: Vec<(&str, &str)> = reqdata
            .headers
            .iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case("user-agent"))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let fmt = fmt_pairs(entries.into_iter());
        if !fmt.is_empty() {
            name.push_str("---");
            name.push_str(&fmt);
        }
    }

    base.push(sanitize_component(&name));
    Ok(base)
}

pub fn metadata_path(cache_path: &Path) -> PathBuf {
    let mut s = cache_path.as_os_str().to_os_string();
    s.push(".meta");
    PathBuf::from(s)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Writes `body` to `path` through a `.tmp` sibling, renamed atomically on
/// success. The sibling is left behind on failure for the caller to clean up.
pub fn write_body_atomic(path: &Path, body: &[u8]) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, body)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn discard_tmp(path: &Path) {
    let tmp_path = tmp_path_for(path);
    let _ = fs::remove_file(tmp_path);
}

/// Convenience constructor kept distinct from `ReqData::params` so callers
/// building a cache key by hand don't need a full `ReqData`.
pub fn params_map(pairs: impl IntoIterator<Item = (String, String)>) -> HashMap<String, String> {
    pairs.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn reqdata(path: &str) -> ReqData {
        ReqData::new(path.to_string(), HashMap::new(), HashMap::new(), None)
    }

    #[test]
    fn path_splits_scheme_host_and_dir() {
        let root = Path::new("/cache");
        let req = reqdata("https://ccs.cdn.wup.shop.nintendo.net/ccs/download/00050000101c9400/tmd");
        let path = cache_path(root, &req).unwrap();
        assert_eq!(
            path,
            PathBuf::from("/cache/https__ccs.cdn.wup.shop.nintendo.net/ccs/download/00050000101c9400/tmd")
        );
    }

    #[test]
    fn params_and_headers_are_appended_sorted_and_ua_excluded() {
        let root = Path::new("/cache");
        let mut params = HashMap::new();
        params.insert("b".to_string(), "2".to_string());
        params.insert("a".to_string(), "1".to_string());
        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), "nusclient/1".to_string());
        headers.insert("X-Custom".to_string(), "z".to_string());
        let req = ReqData::new("https://example.com/dir/file".to_string(), params, headers, None);
        let path = cache_path(root, &req).unwrap();
        assert_eq!(
            path,
            PathBuf::from("/cache/https__example.com/dir/file---a+1--b+2---X-Custom+z")
        );
    }

    #[test]
    fn illegal_characters_are_replaced() {
        let root = Path::new("/cache");
        let req = reqdata("https://example.com/weird:name?file");
        let path = cache_path(root, &req).unwrap();
        assert!(!path.to_string_lossy().contains(':'));
    }

    #[test]
    fn metadata_roundtrips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.bin.meta");
        let meta = Metadata {
            http_version: "1.1".to_string(),
            status: 200,
            reason: "OK".to_string(),
            headers: vec![("Content-Type".to_string(), "application/octet-stream".to_string())],
            url: "https://example.com/body.bin".to_string(),
            timestamp: 1_700_000_000,
            elapsed_ms: 42,
        };
        meta.write_file(&path).unwrap();
        let loaded = Metadata::from_file(&path).unwrap();
        assert_eq!(loaded.status, 200);
        assert_eq!(loaded.headers, meta.headers);
    }

    #[test]
    fn write_body_atomic_leaves_no_tmp_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("body.bin");
        write_body_atomic(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
        assert!(!tmp_path_for(&path).exists());
    }
}
