// main.rs from nusclient
//
// CLI front-end over the library: fetch TMD/ticket metadata, or download and
// extract a title's full content.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use nusclient::binary::tmd::{ContentTypeFlags, Tmd};
use nusclient::config::{Configuration, KeyStore};
use nusclient::extractor;
use nusclient::fstprocessor;
use nusclient::id::TitleId;
use nusclient::request::SourceConfig;
use nusclient::sources::{ContentServer, DownloadContentSource, LocalContentSource};
use nusclient::typeloader::TypeLoadConfig;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and print a title's TMD.
    FetchTmd {
        title_id: String,
        #[arg(long)]
        version: Option<u16>,
        #[arg(long)]
        uncached: bool,
    },
    /// Download a title's ticket and print its (still-encrypted) title key.
    FetchCetk {
        title_id: String,
        #[arg(long)]
        uncached: bool,
    },
    /// Download a title's full content and extract it into a directory.
    Extract {
        title_id: String,
        out_dir: PathBuf,
        #[arg(long)]
        uncached: bool,
        #[arg(long)]
        keys: Option<PathBuf>,
        #[arg(long)]
        no_verify: bool,
    },
    /// Extract an already-downloaded title directory (content files on
    /// disk) into a target directory, without touching the network.
    ExtractLocal {
        content_dir: PathBuf,
        out_dir: PathBuf,
        #[arg(long)]
        keys: Option<PathBuf>,
        #[arg(long)]
        no_verify: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::FetchTmd { title_id, version, uncached } => fetch_tmd(&title_id, version, uncached),
        Commands::FetchCetk { title_id, uncached } => fetch_cetk(&title_id, uncached),
        Commands::Extract { title_id, out_dir, uncached, keys, no_verify } => {
            extract_from_network(&title_id, &out_dir, uncached, keys.as_deref(), !no_verify)
        }
        Commands::ExtractLocal { content_dir, out_dir, keys, no_verify } => {
            extract_from_local(&content_dir, &out_dir, keys.as_deref(), !no_verify)
        }
    }
}

fn content_server(uncached: bool) -> Result<ContentServer> {
    let config = Configuration::default();
    let source_config = SourceConfig::default();
    if uncached {
        ContentServer::uncached(config.cache_path, source_config, &config.default_user_agent)
    } else {
        ContentServer::cached(config.cache_path, source_config, &config.default_user_agent)
    }
    .context("failed to create content server client")
}

fn fetch_tmd(title_id: &str, version: Option<u16>, uncached: bool) -> Result<()> {
    let title_id = TitleId::from_str(title_id).context("invalid title id")?;
    let server = content_server(uncached)?;
    let tmd = server
        .get_tmd(title_id, version, &TypeLoadConfig::default())
        .context("failed to fetch TMD")?;
    println!("title id: {}", tmd.title_id);
    println!("title version: {}", tmd.title_version);
    println!("contents: {}", tmd.contents.len());
    for content in &tmd.contents {
        println!(
            "  [{:04}] id={:08x} size={} encrypted={} hashed={}",
            content.index,
            content.id,
            content.size,
            content.content_type.contains(ContentTypeFlags::ENCRYPTED),
            content.content_type.contains(ContentTypeFlags::HASHED),
        );
    }
    Ok(())
}

fn fetch_cetk(title_id: &str, uncached: bool) -> Result<()> {
    let title_id = TitleId::from_str(title_id).context("invalid title id")?;
    let server = content_server(uncached)?;
    let cetk = server
        .get_cetk(title_id, &TypeLoadConfig::default())
        .context("failed to fetch ticket")?;
    println!("title id: {}", cetk.title_id);
    println!("encrypted title key: {}", hex::encode(cetk.title_key_encrypted));
    Ok(())
}

fn load_common_key(keys: Option<&Path>) -> Result<Option<[u8; 16]>> {
    let Some(path) = keys else { return Ok(None) };
    let store = KeyStore::load_ini(path).context("failed to load keystore")?;
    Ok(store.common_key_wiiu)
}

fn extract_from_network(title_id: &str, out_dir: &Path, uncached: bool, keys: Option<&Path>, verify: bool) -> Result<()> {
    let title_id = TitleId::from_str(title_id).context("invalid title id")?;
    let server = content_server(uncached)?;
    let source = DownloadContentSource::new(&server, title_id);

    let load_config = TypeLoadConfig::default();
    let tmd = source.tmd(&load_config).context("failed to fetch TMD")?;
    let common_key = load_common_key(keys)?;
    let title_key = match common_key {
        Some(key) => {
            let cetk = server.get_cetk(title_id, &load_config).context("failed to fetch ticket")?;
            Some(cetk.decrypted_title_key(key).context("failed to decrypt title key")?)
        }
        None => None,
    };

    let fst_content = tmd.content_by_index(0).context("TMD has no contents")?;
    let mut fst_reader = source.open_reader(fst_content, title_key, verify).context("failed to open FST content")?;
    let fst_bytes = fst_reader.get_data(0, fst_content.size).context("failed to read FST content")?;
    let fst = nusclient::binary::fst::Fst::parse(fst_bytes).context("failed to parse FST")?;
    let tree = fstprocessor::build_tree(&fst).context("failed to build directory tree")?;

    extractor::extract(&tree, out_dir, |secondary_index| {
        let content = tmd
            .contents
            .iter()
            .find(|c| c.index == secondary_index)
            .ok_or_else(|| extractor::ExtractError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "no matching content for secondary index")))?;
        source
            .open_reader(content, title_key, verify)
            .map_err(|e| extractor::ExtractError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    })
    .context("extraction failed")?;

    println!("extracted {} to {}", title_id, out_dir.display());
    Ok(())
}

fn extract_from_local(content_dir: &Path, out_dir: &Path, keys: Option<&Path>, verify: bool) -> Result<()> {
    let source = LocalContentSource::new(content_dir.to_path_buf());
    let tmd_bytes = source.tmd_bytes().context("failed to read local tmd")?;
    let tmd = Tmd::parse(tmd_bytes).context("failed to parse local tmd")?;
    let common_key = load_common_key(keys)?;
    let title_key = match (source.ticket_bytes().context("failed to read local ticket")?, common_key) {
        (Some(ticket_bytes), Some(common_key)) => {
            let ticket = nusclient::binary::ticket::Ticket::parse(ticket_bytes).context("failed to parse local ticket")?;
            Some(ticket.decrypted_title_key(common_key).context("failed to decrypt title key")?)
        }
        _ => None,
    };

    let fst_content = tmd.content_by_index(0).context("TMD has no contents")?;
    let mut fst_reader = source.open_reader(fst_content, title_key, verify).context("failed to open local FST content")?;
    let fst_bytes = fst_reader.get_data(0, fst_content.size).context("failed to read FST content")?;
    let fst = nusclient::binary::fst::Fst::parse(fst_bytes).context("failed to parse FST")?;
    let tree = fstprocessor::build_tree(&fst).context("failed to build directory tree")?;

    extractor::extract(&tree, out_dir, |secondary_index| {
        let content = tmd
            .contents
            .iter()
            .find(|c| c.index == secondary_index)
            .ok_or_else(|| extractor::ExtractError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "no matching content for secondary index")))?;
        source
            .open_reader(content, title_key, verify)
            .map_err(|e| extractor::ExtractError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    })
    .context("extraction failed")?;

    println!("extracted local title to {}", out_dir.display());
    Ok(())
}

