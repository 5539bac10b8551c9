// sources.rs from nusclient
//
// Concrete endpoint façades over RequestClient + TypeLoader, plus the two
// content-byte sources used to build an AppReader. Grounded on
// original_source/nus_tools/sources/{contentcdn,ninja,idbe,tagaya,samurai}.py
// and nus_tools/content/util.py's ContentUtil.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::appreader::{AppParams, AppReader, AppReaderError, ReaderSource};
use crate::binary::idbe::Idbe;
use crate::binary::tmd::{ContentRecord, ContentTypeFlags, Tmd};
use crate::binary::ticket::Ticket;
use crate::id::{ContentId, TitleId, TitlePlatform};
use crate::request::{ReqData, Reader, RequestClient, RequestError, SourceConfig};
use crate::typeloader::{TypeLoadConfig, TypeLoader, TypeLoaderError};
use crate::xml::{DlcList, EcInfo, IdPair, News, Telops, TitleList, UpdateList, UpdateListVersion, XmlLoadable};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    TypeLoader(#[from] TypeLoaderError),
    #[error(transparent)]
    AppReader(#[from] AppReaderError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("no local file matching `{0}` found (case-insensitive) in the content directory")]
    LocalFileNotFound(String),
    #[error("tmd title id `{got}` does not match the requested title id `{expected}`")]
    TitleIdMismatch { expected: TitleId, got: TitleId },
}

fn client(cache_root: PathBuf, base: &str, config: SourceConfig, user_agent: &str) -> Result<RequestClient, SourceError> {
    Ok(RequestClient::new(cache_root, ReqData::from_path(base), config, user_agent)?)
}

/// The content CDN, in its cached (`ccs.cdn.*`) and uncached (`ccs.*`)
/// forms. Both serve the same title/app/h3 byte layout.
pub struct ContentServer {
    http: RequestClient,
}

impl ContentServer {
    pub fn cached(cache_root: PathBuf, config: SourceConfig, user_agent: &str) -> Result<Self, SourceError> {
        Ok(ContentServer {
            http: client(cache_root, "http://ccs.cdn.c.shop.nintendowifi.net/ccs/download/", config, user_agent)?,
        })
    }

    pub fn uncached(cache_root: PathBuf, config: SourceConfig, user_agent: &str) -> Result<Self, SourceError> {
        Ok(ContentServer {
            http: client(cache_root, "http://ccs.wup.shop.nintendo.net/ccs/download/", config, user_agent)?,
        })
    }

    pub fn get_cetk(&self, title_id: TitleId, config: &TypeLoadConfig) -> Result<Ticket, SourceError> {
        let mut reader = self.http.get_reader(&ReqData::from_path(format!("{title_id}/cetk")))?;
        let mut loader: TypeLoader<Ticket> = TypeLoader::new();
        loader.load_binary(&mut reader, config)?;
        Ok(loader.into_inner().unwrap())
    }

    pub fn get_tmd(&self, title_id: TitleId, version: Option<u16>, config: &TypeLoadConfig) -> Result<Tmd, SourceError> {
        let path = match version {
            Some(v) => format!("{title_id}/tmd.{v}"),
            None => format!("{title_id}/tmd"),
        };
        let mut reader = self.http.get_reader(&ReqData::from_path(path))?;
        let mut loader: TypeLoader<Tmd> = TypeLoader::new();
        loader.load_binary(&mut reader, config)?;
        let tmd = loader.into_inner().unwrap();
        if tmd.title_id != title_id {
            return Err(SourceError::TitleIdMismatch { expected: title_id, got: tmd.title_id });
        }
        Ok(tmd)
    }

    /// `.app` content is never fully parsed here; it is handed to
    /// `AppReader` as a raw block stream.
    pub fn get_app(&self, title_id: TitleId, content_id: u32) -> Result<Reader, SourceError> {
        Ok(self.http.get_reader(&ReqData::from_path(format!("{title_id}/{content_id:08x}")))?)
    }

    pub fn get_h3(&self, title_id: TitleId, content_id: u32) -> Result<Vec<u8>, SourceError> {
        let mut reader = self.http.get_reader(&ReqData::from_path(format!("{title_id}/{content_id:08x}.h3")))?;
        Ok(reader.read_all()?)
    }
}

/// The EC backend. Requires a client certificate (PEM path), matching the
/// no-CDN 3DS endpoint's auth requirement.
pub struct Ninja {
    http: RequestClient,
    region: String,
}

impl Ninja {
    pub fn new(region: impl Into<String>, cert_path: &str, cache_root: PathBuf, config: SourceConfig, user_agent: &str) -> Result<Self, SourceError> {
        let base = ReqData::from_path("https://ninja.wup.shop.nintendo.net/ninja/ws/");
        let base = ReqData { cert: Some(cert_path.to_string()), ..base };
        Ok(Ninja { http: RequestClient::new(cache_root, base, config, user_agent)?, region: region.into() })
    }

    pub fn get_ec_info(&self, content_id: ContentId, config: &TypeLoadConfig) -> Result<EcInfo, SourceError> {
        let path = format!("{}/title/{content_id}/ec_info", self.region);
        let mut reader = self.http.get_reader(&ReqData::from_path(path))?;
        let mut loader: TypeLoader<EcInfo> = TypeLoader::new();
        loader.load_xml(&mut reader, config)?;
        Ok(loader.into_inner().unwrap())
    }

    fn get_id_pair(&self, reqdata: ReqData, config: &TypeLoadConfig) -> Result<IdPair, SourceError> {
        let mut reader = self.http.get_reader(&reqdata)?;
        let mut loader: TypeLoader<IdPair> = TypeLoader::new();
        loader.load_xml(&mut reader, config)?;
        Ok(loader.into_inner().unwrap())
    }

    pub fn get_id_pair_by_title(&self, title_id: TitleId, config: &TypeLoadConfig) -> Result<IdPair, SourceError> {
        self.get_id_pair(ReqData::from_path("titles/id_pair").with_param("title_id[]", title_id.to_string()), config)
    }

    pub fn get_id_pair_by_content(&self, content_id: ContentId, config: &TypeLoadConfig) -> Result<IdPair, SourceError> {
        self.get_id_pair(ReqData::from_path("titles/id_pair").with_param("ns_uid[]", content_id.to_string()), config)
    }

    pub fn get_content_id(&self, title_id: TitleId, config: &TypeLoadConfig) -> Result<ContentId, SourceError> {
        Ok(self.get_id_pair_by_title(title_id, config)?.content_id)
    }

    pub fn get_title_id(&self, content_id: ContentId, config: &TypeLoadConfig) -> Result<TitleId, SourceError> {
        Ok(self.get_id_pair_by_content(content_id, config)?.title_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdbePlatform {
    Wup,
    Ctr,
}

impl IdbePlatform {
    fn host_segment(self) -> &'static str {
        match self {
            IdbePlatform::Wup => "wup",
            IdbePlatform::Ctr => "ctr",
        }
    }

    fn title_platform(self) -> TitlePlatform {
        match self {
            IdbePlatform::Wup => TitlePlatform::WiiU,
            IdbePlatform::Ctr => TitlePlatform::N3ds,
        }
    }
}

pub struct IdbeServer {
    http: RequestClient,
    platform: IdbePlatform,
}

impl IdbeServer {
    pub fn new(platform: IdbePlatform, cache_root: PathBuf, config: SourceConfig, user_agent: &str) -> Result<Self, SourceError> {
        let base = format!("https://idbe-{}.cdn.nintendo.net/icondata/", platform.host_segment());
        Ok(IdbeServer { http: client(cache_root, &base, config, user_agent)?, platform })
    }

    pub fn get_idbe_raw(&self, title_id: TitleId, version: Option<u16>) -> Result<Vec<u8>, SourceError> {
        let path = match version {
            Some(v) => format!("{title_id}_{v}.idbe"),
            None => format!("{title_id}.idbe"),
        };
        let mut reader = self.http.get_reader(&ReqData::from_path(path))?;
        Ok(reader.read_all()?)
    }

    /// Parses the raw response via `Idbe::parse`, given the decryptor a
    /// caller's `KeyStore` supplies for the leading key-index byte.
    pub fn get_idbe(&self, title_id: TitleId, version: Option<u16>, decrypt: impl FnOnce(u8, &[u8]) -> Vec<u8>) -> Result<Idbe, SourceError> {
        let raw = self.get_idbe_raw(title_id, version)?;
        Idbe::parse(&raw, self.platform.title_platform(), decrypt).map_err(|e| SourceError::TypeLoader(TypeLoaderError::Binary(e)))
    }
}

/// The update-list service, in its CDN and no-CDN (pinned-fingerprint)
/// forms; both serve identical lists regardless of region.
pub struct TagayaServer {
    http: RequestClient,
}

impl TagayaServer {
    pub fn cdn(cache_root: PathBuf, config: SourceConfig, user_agent: &str) -> Result<Self, SourceError> {
        Ok(TagayaServer {
            http: client(cache_root, "https://tagaya-wup.cdn.nintendo.net/tagaya/versionlist/EUR/EU/", config, user_agent)?,
        })
    }

    pub fn no_cdn(cache_root: PathBuf, config: SourceConfig, user_agent: &str) -> Result<Self, SourceError> {
        Ok(TagayaServer {
            http: client(cache_root, "https://tagaya.wup.shop.nintendo.net/tagaya/versionlist/EUR/EU/", config, user_agent)?,
        })
    }

    pub fn get_latest_version(&self, config: &TypeLoadConfig) -> Result<UpdateListVersion, SourceError> {
        let mut reader = self.http.get_reader(&ReqData::from_path("latest_version"))?;
        let mut loader: TypeLoader<UpdateListVersion> = TypeLoader::new();
        loader.load_xml(&mut reader, config)?;
        Ok(loader.into_inner().unwrap())
    }

    pub fn get_updatelist(&self, version: i64, config: &TypeLoadConfig) -> Result<UpdateList, SourceError> {
        let mut reader = self.http.get_reader(&ReqData::from_path(format!("list/{version}.versionlist")))?;
        let mut loader: TypeLoader<UpdateList> = TypeLoader::new();
        loader.load_xml(&mut reader, config)?;
        Ok(loader.into_inner().unwrap())
    }
}

/// The catalog service: per-region/per-shop/per-language base path, with
/// list and detail endpoints matching the XML schema contracts in §4.7.
pub struct Samurai {
    http: RequestClient,
}

impl Samurai {
    pub fn new(region: &str, shop_id: u32, lang: &str, cache_root: PathBuf, config: SourceConfig, user_agent: &str) -> Result<Self, SourceError> {
        let base = ReqData::from_path(format!("https://samurai.wup.shop.nintendo.net/samurai/ws/{region}/"))
            .with_param("shop_id", shop_id.to_string())
            .with_param("lang", lang.to_string());
        Ok(Samurai { http: RequestClient::new(cache_root, base, config, user_agent)? })
    }

    fn get_xml<T: XmlLoadable>(&self, reqdata: ReqData, config: &TypeLoadConfig) -> Result<T, SourceError> {
        let mut reader = self.http.get_reader(&reqdata)?;
        let mut loader: TypeLoader<T> = TypeLoader::new();
        loader.load_xml(&mut reader, config)?;
        Ok(loader.into_inner().unwrap())
    }

    pub fn get_title_list(&self, offset: u32, limit: u32, config: &TypeLoadConfig) -> Result<TitleList, SourceError> {
        self.get_xml(ReqData::from_path("titles").with_param("offset", offset.to_string()).with_param("limit", limit.to_string()), config)
    }

    pub fn get_news(&self, offset: u32, limit: u32, config: &TypeLoadConfig) -> Result<News, SourceError> {
        self.get_xml(ReqData::from_path("news").with_param("offset", offset.to_string()).with_param("limit", limit.to_string()), config)
    }

    pub fn get_telops(&self, config: &TypeLoadConfig) -> Result<Telops, SourceError> {
        self.get_xml(ReqData::from_path("telops"), config)
    }

    pub fn get_demo(&self, content_id: ContentId, config: &TypeLoadConfig) -> Result<crate::xml::Demo, SourceError> {
        self.get_xml(ReqData::from_path(format!("title/{content_id}/demo")), config)
    }

    pub fn get_dlc_list(&self, content_id: ContentId, config: &TypeLoadConfig) -> Result<DlcList, SourceError> {
        self.get_xml(ReqData::from_path(format!("title/{content_id}/aocs")), config)
    }
}

/// Derives the `AppParams` for one TMD content entry, given an optional
/// decrypted title key (required if the content is encrypted).
fn app_params(content: &ContentRecord, title_key: Option<[u8; 16]>, real_app_size: u64) -> AppParams {
    AppParams {
        encrypted: content.content_type.contains(ContentTypeFlags::ENCRYPTED),
        content_hash: content.sha1_hash(),
        title_key,
        content_index: content.index,
        real_app_size,
        tmd_app_size: content.size,
    }
}

/// Lazily loads a title's TMD, then opens an `AppReader` for any of its
/// contents by fetching the `.app` (and `.h3`, if hashed) from a
/// `ContentServer`.
pub struct DownloadContentSource<'a> {
    server: &'a ContentServer,
    title_id: TitleId,
}

impl<'a> DownloadContentSource<'a> {
    pub fn new(server: &'a ContentServer, title_id: TitleId) -> Self {
        DownloadContentSource { server, title_id }
    }

    pub fn tmd(&self, config: &TypeLoadConfig) -> Result<Tmd, SourceError> {
        self.server.get_tmd(self.title_id, None, config)
    }

    pub fn open_reader(
        &self,
        content: &ContentRecord,
        title_key: Option<[u8; 16]>,
        verify: bool,
    ) -> Result<AppReader<ReaderSource>, SourceError> {
        let body = self.server.get_app(self.title_id, content.id)?;
        let real_app_size = body.size().unwrap_or(content.size);
        let source = ReaderSource::new(body);

        let h3 = if content.content_type.contains(ContentTypeFlags::HASHED) {
            Some(self.server.get_h3(self.title_id, content.id)?)
        } else {
            None
        };

        let params = app_params(content, title_key, real_app_size);
        Ok(AppReader::new(source, params, h3, verify)?)
    }
}

/// Reads content bytes from an already-extracted local directory instead
/// of the network, using case-insensitive filename matching the same way
/// the extracted-title layout names files.
pub struct LocalContentSource {
    directory: PathBuf,
}

impl LocalContentSource {
    pub fn new(directory: PathBuf) -> Self {
        LocalContentSource { directory }
    }

    fn find_case_insensitive(&self, candidates: &[String]) -> Result<PathBuf, SourceError> {
        let entries = fs::read_dir(&self.directory)?;
        let names: Vec<(String, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .map(|e| (e.file_name().to_string_lossy().to_lowercase(), e.path()))
            .collect();
        for candidate in candidates {
            let lower = candidate.to_lowercase();
            if let Some((_, path)) = names.iter().find(|(name, _)| *name == lower) {
                return Ok(path.clone());
            }
        }
        Err(SourceError::LocalFileNotFound(candidates.join(", ")))
    }

    pub fn tmd_bytes(&self) -> Result<Vec<u8>, SourceError> {
        let path = self.find_case_insensitive(&["title.tmd".to_string(), "tmd".to_string()])?;
        Ok(fs::read(path)?)
    }

    /// Looks for a local ticket under the usual dumped-title names. Returns
    /// `Ok(None)` rather than an error when absent, since an unencrypted
    /// title directory has no reason to carry one.
    pub fn ticket_bytes(&self) -> Result<Option<Vec<u8>>, SourceError> {
        match self.find_case_insensitive(&["title.tik".to_string(), "cetk".to_string(), "ticket.bin".to_string()]) {
            Ok(path) => Ok(Some(fs::read(path)?)),
            Err(SourceError::LocalFileNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn open_reader(&self, content: &ContentRecord, title_key: Option<[u8; 16]>, verify: bool) -> Result<AppReader<fs::File>, SourceError> {
        let cid = format!("{:08x}", content.id);
        let app_path = self.find_case_insensitive(&[format!("{cid}.app"), cid.clone()])?;
        let real_app_size = fs::metadata(&app_path)?.len();
        let file = fs::File::open(&app_path)?;

        let h3 = if content.content_type.contains(ContentTypeFlags::HASHED) {
            let h3_path = self.find_case_insensitive(&[format!("{cid}.h3")])?;
            Some(fs::read(h3_path)?)
        } else {
            None
        };

        let params = app_params(content, title_key, real_app_size);
        Ok(AppReader::new(file, params, h3, verify)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_source_finds_files_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("TITLE.TMD"), b"tmd-bytes").unwrap();
        let source = LocalContentSource::new(dir.path().to_path_buf());
        assert_eq!(source.tmd_bytes().unwrap(), b"tmd-bytes");
    }

    #[test]
    fn local_source_missing_file_reports_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalContentSource::new(dir.path().to_path_buf());
        let err = source.tmd_bytes().unwrap_err();
        assert!(matches!(err, SourceError::LocalFileNotFound(_)));
    }
}
