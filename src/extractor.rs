// extractor.rs from nusclient
//
// Walks an FST tree and writes its files to disk, grouping by secondary
// content index and sorting by offset so each content stream is opened
// (and closed) exactly once per extraction, per spec §4.10. Grounded on
// original_source/nus_tools/content/extract.py, generalized: the retrieved
// source extracts in plain FST walk order instead of batching by content
// file, which would reopen (or keep open) as many streams as there are
// interleaved files.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::appreader::{AppReader, AppReaderError, BlockSource};
use crate::fstprocessor::{FstDirectory, FstFile, FstNode};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    AppReader(#[from] AppReaderError),
    #[error("path `{0}` escapes the extraction target root")]
    UnsafePath(PathBuf),
}

fn collect<'a>(node: &'a FstDirectory, path: PathBuf, files: &mut Vec<(PathBuf, &'a FstFile)>, dirs: &mut Vec<PathBuf>) {
    dirs.push(path.clone());
    for child in &node.children {
        match child {
            FstNode::Directory(d) => {
                if d.deleted {
                    continue;
                }
                collect(d, path.join(&d.name), files, dirs);
            }
            FstNode::File(f) => {
                if f.deleted {
                    continue;
                }
                files.push((path.join(&f.name), f));
            }
        }
    }
}

/// Extracts an FST tree under `target`: creates every non-deleted
/// directory, then for each distinct `secondary_index` opens its content
/// reader once (via `open_reader`), writes files in ascending-offset order,
/// and drops the reader before moving to the next group. On a write error,
/// the partial output file is removed (best-effort) before propagating.
pub fn extract<S, F>(root: &FstDirectory, target: &Path, mut open_reader: F) -> Result<(), ExtractError>
where
    S: BlockSource,
    F: FnMut(u16) -> Result<AppReader<S>, ExtractError>,
{
    fs::create_dir_all(target)?;
    let target_real = fs::canonicalize(target)?;

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    collect(root, PathBuf::new(), &mut files, &mut dirs);

    for rel_dir in &dirs {
        fs::create_dir_all(target.join(rel_dir))?;
    }

    let mut by_secondary: BTreeMap<u16, Vec<(PathBuf, &FstFile)>> = BTreeMap::new();
    for (path, file) in files {
        by_secondary.entry(file.secondary_index).or_default().push((path, file));
    }

    for (secondary_index, mut group) in by_secondary {
        group.sort_by_key(|(_, f)| f.offset);
        let mut reader = open_reader(secondary_index)?;
        for (rel_path, file) in group {
            let full_path = target.join(&rel_path);
            let parent_real = fs::canonicalize(full_path.parent().unwrap_or(target))?;
            if !parent_real.starts_with(&target_real) {
                return Err(ExtractError::UnsafePath(full_path));
            }
            if let Err(e) = write_file(&mut reader, &full_path, file) {
                let _ = fs::remove_file(&full_path);
                return Err(e);
            }
        }
    }
    Ok(())
}

fn write_file<S: BlockSource>(reader: &mut AppReader<S>, path: &Path, file: &FstFile) -> Result<(), ExtractError> {
    let mut out = fs::File::create(path)?;
    let data = reader.get_data(file.offset, file.size as u64)?;
    out.write_all(&data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appreader::AppParams;
    use sha1::{Digest, Sha1};
    use std::io;

    struct VecSource(io::Cursor<Vec<u8>>);

    impl BlockSource for VecSource {
        fn read_exact_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
            use std::io::Read;
            self.0.read_exact(buf)
        }

        fn seek_to(&mut self, offset: u64) -> Result<(), AppReaderError> {
            use std::io::Seek;
            self.0.seek(io::SeekFrom::Start(offset))?;
            Ok(())
        }
    }

    fn unhashed_reader(data: Vec<u8>) -> AppReader<VecSource> {
        let content_hash: [u8; 20] = Sha1::digest(&data).into();
        let params = AppParams {
            encrypted: false,
            content_hash,
            title_key: None,
            content_index: 0,
            real_app_size: data.len() as u64,
            tmd_app_size: data.len() as u64,
        };
        AppReader::new(VecSource(io::Cursor::new(data)), params, None, true).unwrap()
    }

    #[test]
    fn extracts_tree_to_disk() {
        let content = b"hello world!".to_vec();
        let tree = FstDirectory {
            name: "root".to_string(),
            deleted: false,
            children: vec![FstNode::File(FstFile {
                name: "greeting.txt".to_string(),
                deleted: false,
                offset: 0,
                size: content.len() as u32,
                secondary_index: 0,
            })],
        };

        let dir = tempfile::tempdir().unwrap();
        let data = content.clone();
        extract(&tree, dir.path(), move |_secondary_index| Ok(unhashed_reader(data.clone()))).unwrap();

        let written = fs::read(dir.path().join("greeting.txt")).unwrap();
        assert_eq!(written, content);
    }

    #[test]
    fn skips_deleted_entries() {
        let tree = FstDirectory {
            name: "root".to_string(),
            deleted: false,
            children: vec![FstNode::File(FstFile {
                name: "gone.txt".to_string(),
                deleted: true,
                offset: 0,
                size: 5,
                secondary_index: 0,
            })],
        };

        let dir = tempfile::tempdir().unwrap();
        extract(&tree, dir.path(), |_| Ok(unhashed_reader(vec![0u8; 5]))).unwrap();
        assert!(!dir.path().join("gone.txt").exists());
    }
}
