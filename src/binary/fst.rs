// binary/fst.rs from nusclient
//
// File System Table: directory tree plus file locations across secondary
// content files. ref: http://wiiubrew.org/wiki/FST

use std::rc::Rc;

use super::{BinaryError, Cursor};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryTypeFlags: u8 {
        const DIRECTORY = 0x01;
        const SPECIAL   = 0x02;
        const DELETED   = 0x80;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u16 {
        const OFFSET_IN_BYTES = 0x0004;
        const HASHED_META     = 0x0040;
        const HASHED_CONTENT  = 0x0400;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecondaryFlags: u16 {
        const HASH_TMD  = 0x100;
        const HASH_TREE = 0x200;
    }
}

#[derive(Debug, Clone)]
pub struct SecondaryEntry {
    pub offset_sectors: u32,
    pub size_sectors: u32,
    pub title_id: [u8; 8],
    pub group_id: [u8; 4],
    pub flags: SecondaryFlags,
}

/// A raw entry from the flat entry table: either a directory (with
/// `parent_offset`/`next_entry_index`) or a file (with `offset_raw`/`size`),
/// distinguished by `entry_type`.
#[derive(Debug, Clone)]
pub struct FstEntry {
    pub entry_type: EntryTypeFlags,
    pub name_offset: u32,
    pub parent_offset_or_offset_raw: u32,
    pub next_entry_index_or_size: u32,
    pub flags: EntryFlags,
    pub secondary_index: u16,
}

impl FstEntry {
    pub fn is_directory(&self) -> bool {
        self.entry_type.contains(EntryTypeFlags::DIRECTORY)
    }

    pub fn is_deleted(&self) -> bool {
        self.entry_type.contains(EntryTypeFlags::DELETED)
    }

    pub fn next_entry_index(&self) -> u32 {
        self.next_entry_index_or_size
    }

    pub fn offset_raw(&self) -> u32 {
        self.parent_offset_or_offset_raw
    }

    pub fn size(&self) -> u32 {
        self.next_entry_index_or_size
    }

    fn parse(cur: &mut Cursor) -> Result<Self, BinaryError> {
        let raw_type = cur.take_u8()?;
        let entry_type = EntryTypeFlags::from_bits_truncate(raw_type);
        let name_offset = cur.take_u24()?;
        let parent_offset_or_offset_raw = cur.take_u32()?;
        let next_entry_index_or_size = cur.take_u32()?;
        let raw_flags = cur.take_u16()?;
        let flags = EntryFlags::from_bits_truncate(raw_flags);
        let secondary_index = cur.take_u16()?;
        Ok(FstEntry {
            entry_type,
            name_offset,
            parent_offset_or_offset_raw,
            next_entry_index_or_size,
            flags,
            secondary_index,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Fst {
    pub offset_factor: u32,
    pub secondary: Vec<SecondaryEntry>,
    pub root: FstEntry,
    pub entries: Vec<FstEntry>,
    /// Null-terminated name blob names, in on-disk order (root's name first).
    pub names: Vec<String>,
}

impl Fst {
    pub fn parse(data: Vec<u8>) -> Result<Self, BinaryError> {
        let data: Rc<[u8]> = Rc::from(data.into_boxed_slice());
        let mut cur = Cursor::new(data);

        cur.expect_const(b"FST\0")?;
        let offset_factor = cur.take_u32()?;
        let num_secondary = cur.take_u32()?;
        let _unk1 = cur.take_vec(0x14)?;

        let mut secondary = Vec::with_capacity(num_secondary as usize);
        for _ in 0..num_secondary {
            let offset_sectors = cur.take_u32()?;
            let size_sectors = cur.take_u32()?;
            let title_id = cur.take_array::<8>()?;
            let group_id = cur.take_array::<4>()?;
            let raw_flags = cur.take_u16()?;
            let flags = SecondaryFlags::from_bits_truncate(raw_flags);
            let _padding = cur.take_vec(0x0a)?;
            secondary.push(SecondaryEntry {
                offset_sectors,
                size_sectors,
                title_id,
                group_id,
                flags,
            });
        }

        let root = FstEntry::parse(&mut cur)?;
        if !root.is_directory() {
            return Err(BinaryError::FormatError {
                offset: 0,
                expected: "root entry to be a directory".into(),
                actual: "file".into(),
            });
        }
        let entry_count = root.next_entry_index().saturating_sub(1);
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            entries.push(FstEntry::parse(&mut cur)?);
        }

        let name_count = root.next_entry_index();
        let mut names = Vec::with_capacity(name_count as usize);
        for _ in 0..name_count {
            let start = cur.pos();
            loop {
                let b = cur.take_u8()?;
                if b == 0 {
                    break;
                }
            }
            let end = cur.pos() - 1;
            let raw = &cur.data_handle()[start..end];
            names.push(String::from_utf8_lossy(raw).into_owned());
        }

        Ok(Fst {
            offset_factor,
            secondary,
            root,
            entries,
            names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn parses_minimal_tree() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"FST\0");
        buf.extend_from_slice(&0x20u32.to_be_bytes()); // offset_factor
        buf.extend_from_slice(&0u32.to_be_bytes()); // num_secondary
        buf.extend_from_slice(&[0u8; 0x14]);
        // root: directory, next_entry_index = 2 (root + one file)
        buf.extend_from_slice(&entry_bytes(0x01, 0, 0, 2, 0, 0));
        // one file entry
        buf.extend_from_slice(&entry_bytes(0x00, 5, 0, 100, 0x0004, 0));
        // names: "root\0file.bin\0"
        buf.extend_from_slice(b"root\0");
        buf.extend_from_slice(b"file.bin\0");

        let fst = Fst::parse(buf).unwrap();
        assert_eq!(fst.entries.len(), 1);
        assert_eq!(fst.names, vec!["root".to_string(), "file.bin".to_string()]);
        assert!(fst.entries[0].flags.contains(EntryFlags::OFFSET_IN_BYTES));
        assert_eq!(fst.entries[0].size(), 100);
    }
}
