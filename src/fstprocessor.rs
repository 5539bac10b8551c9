// fstprocessor.rs from nusclient
//
// Builds a directory tree from a parsed Fst, using each directory's
// next_entry_index as the exclusive bound of its children. Grounded on
// original_source/nus_tools/content/fstprocessor.py.

use std::collections::HashMap;

use thiserror::Error;

use crate::binary::fst::{EntryFlags, Fst, FstEntry};

#[derive(Debug, Error)]
pub enum FstProcessorError {
    #[error("entry references unknown name offset {0}")]
    UnknownNameOffset(u32),
    #[error("directory at index {index} overran its next_entry_index bound ({bound})")]
    OverrunBound { index: usize, bound: u32 },
}

#[derive(Debug, Clone)]
pub enum FstNode {
    Directory(FstDirectory),
    File(FstFile),
}

#[derive(Debug, Clone)]
pub struct FstDirectory {
    pub name: String,
    pub deleted: bool,
    pub children: Vec<FstNode>,
}

#[derive(Debug, Clone)]
pub struct FstFile {
    pub name: String,
    pub deleted: bool,
    pub offset: u64,
    pub size: u32,
    pub secondary_index: u16,
}

/// Maps each name's byte offset within the (conceptual) name blob to its
/// string, computed the same way the Python source does: cumulative
/// `len(name) + 1` in parse order, rather than re-scanning raw bytes.
fn name_offset_map(fst: &Fst) -> HashMap<u32, String> {
    let mut map = HashMap::new();
    let mut offset: u32 = 0;
    for name in &fst.names {
        map.insert(offset, name.clone());
        offset += name.len() as u32 + 1;
    }
    map
}

fn real_offset(entry: &FstEntry, offset_factor: u32) -> u64 {
    let raw = entry.offset_raw() as u64;
    if entry.flags.contains(EntryFlags::OFFSET_IN_BYTES) {
        raw
    } else {
        raw * offset_factor as u64
    }
}

struct Walker<'a> {
    entries: Vec<&'a FstEntry>,
    names: &'a HashMap<u32, String>,
    offset_factor: u32,
    index: usize,
}

impl<'a> Walker<'a> {
    fn lookup_name(&self, entry: &FstEntry) -> Result<String, FstProcessorError> {
        self.names.get(&entry.name_offset).cloned().ok_or(FstProcessorError::UnknownNameOffset(entry.name_offset))
    }

    fn process_directory(&mut self) -> Result<FstDirectory, FstProcessorError> {
        let dir_index = self.index;
        let dir_entry = self.entries[dir_index];
        self.index += 1;

        let mut children = Vec::new();
        while (self.index as u32) < dir_entry.next_entry_index() {
            let entry = self.entries[self.index];
            if entry.is_directory() {
                children.push(FstNode::Directory(self.process_directory()?));
            } else {
                children.push(FstNode::File(self.process_file()?));
            }
        }
        if self.index as u32 > dir_entry.next_entry_index() {
            return Err(FstProcessorError::OverrunBound { index: self.index, bound: dir_entry.next_entry_index() });
        }

        Ok(FstDirectory { name: self.lookup_name(dir_entry)?, deleted: dir_entry.is_deleted(), children })
    }

    fn process_file(&mut self) -> Result<FstFile, FstProcessorError> {
        let entry = self.entries[self.index];
        self.index += 1;
        Ok(FstFile {
            name: self.lookup_name(entry)?,
            deleted: entry.is_deleted(),
            offset: real_offset(entry, self.offset_factor),
            size: entry.size(),
            secondary_index: entry.secondary_index,
        })
    }
}

/// Builds the nested directory tree for an [`Fst`]: the walk treats each
/// directory's `next_entry_index` as the exclusive upper bound of its
/// children's indices in the flat entry array.
pub fn build_tree(fst: &Fst) -> Result<FstDirectory, FstProcessorError> {
    let names = name_offset_map(fst);
    let mut entries: Vec<&FstEntry> = Vec::with_capacity(fst.entries.len() + 1);
    entries.push(&fst.root);
    entries.extend(fst.entries.iter());

    let mut walker = Walker { entries, names: &names, offset_factor: fst.offset_factor, index: 0 };
    walker.process_directory()
}

/// Flattens a directory tree into `path -> directory` and `path -> file`
/// maps, with `/`-joined paths rooted at the tree's own name.
pub fn flatten(root: &FstDirectory) -> (HashMap<String, FstDirectory>, HashMap<String, FstFile>) {
    let mut dirs = HashMap::new();
    let mut files = HashMap::new();
    flatten_into(root, root.name.clone(), &mut dirs, &mut files);
    (dirs, files)
}

fn flatten_into(dir: &FstDirectory, path: String, dirs: &mut HashMap<String, FstDirectory>, files: &mut HashMap<String, FstFile>) {
    for child in &dir.children {
        match child {
            FstNode::Directory(d) => {
                let child_path = format!("{path}/{}", d.name);
                flatten_into(d, child_path, dirs, files);
            }
            FstNode::File(f) => {
                let child_path = format!("{path}/{}", f.name);
                files.insert(child_path, f.clone());
            }
        }
    }
    dirs.insert(path, FstDirectory { name: dir.name.clone(), deleted: dir.deleted, children: Vec::new() });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::fst::Fst;

    fn entry_bytes(entry_type: u8, name_offset: u32, a: u32, b: u32, flags: u16, secondary_index: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(entry_type);
        buf.extend_from_slice(&name_offset.to_be_bytes()[1..]);
        buf.extend_from_slice(&a.to_be_bytes());
        buf.extend_from_slice(&b.to_be_bytes());
        buf.extend_from_slice(&flags.to_be_bytes());
        buf.extend_from_slice(&secondary_index.to_be_bytes());
        buf
    }

    fn minimal_fst_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"FST\0");
        buf.extend_from_slice(&0x20u32.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&[0u8; 0x14]);
        // root: directory, 3 entries total (root + dir + file)
        buf.extend_from_slice(&entry_bytes(0x01, 0, 0, 3, 0, 0));
        // subdir: directory, next_entry_index = 3 (itself + one file)
        buf.extend_from_slice(&entry_bytes(0x01, 5, 0, 3, 0, 0));
        // file inside subdir, offset_in_bytes set
        buf.extend_from_slice(&entry_bytes(0x00, 9, 1000, 50, 0x0004, 2));
        buf.extend_from_slice(b"root\0");
        buf.extend_from_slice(b"sub\0");
        buf.extend_from_slice(b"file.bin\0");
        buf
    }

    #[test]
    fn builds_nested_tree() {
        let fst = Fst::parse(minimal_fst_bytes()).unwrap();
        let tree = build_tree(&fst).unwrap();
        assert_eq!(tree.name, "root");
        assert_eq!(tree.children.len(), 1);
        let FstNode::Directory(sub) = &tree.children[0] else { panic!("expected directory") };
        assert_eq!(sub.name, "sub");
        assert_eq!(sub.children.len(), 1);
        let FstNode::File(file) = &sub.children[0] else { panic!("expected file") };
        assert_eq!(file.name, "file.bin");
        assert_eq!(file.offset, 1000);
        assert_eq!(file.size, 50);
        assert_eq!(file.secondary_index, 2);
    }

    #[test]
    fn flatten_produces_slash_joined_paths() {
        let fst = Fst::parse(minimal_fst_bytes()).unwrap();
        let tree = build_tree(&fst).unwrap();
        let (dirs, files) = flatten(&tree);
        assert!(dirs.contains_key("root/sub"));
        assert!(files.contains_key("root/sub/file.bin"));
    }
}
