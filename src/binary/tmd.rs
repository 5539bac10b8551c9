// binary/tmd.rs from nusclient
//
// ref: https://www.3dbrew.org/wiki/Title_metadata, https://wiiubrew.org/wiki/Title_metadata

use std::rc::Rc;
use sha2::{Digest, Sha256};

use crate::id::TitleId;

use super::cert::{CertificateChain, Signature};
use super::{padded_string, BinaryError, Cursor, RawView};

pub const CONTENT_INFO_COUNT: usize = 64;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContentTypeFlags: u16 {
        const ENCRYPTED = 0x0001;
        const HASHED    = 0x0002;
        const CFM       = 0x0004;
        const UNK1      = 0x2000;
        const UNK2      = 0x4000;
        const UNK3      = 0x8000;
    }
}

#[derive(Debug, Clone)]
pub struct ContentInfo {
    pub content_index: u16,
    pub content_count: u16,
    pub contents_sha256: RawView,
}

#[derive(Debug, Clone)]
pub struct ContentRecord {
    pub id: u32,
    pub index: u16,
    pub content_type: ContentTypeFlags,
    pub size: u64,
    /// 32-byte hash field: SHA-1 zero-padded to 32 bytes on WiiU, raw
    /// SHA-256 on 3DS. Which interpretation applies depends on the title's
    /// platform, not on anything in this struct.
    pub hash: RawView,
    /// This record's own raw bytes (id..hash), the unit that an info
    /// entry's `contents_sha256` is computed over.
    pub raw: RawView,
}

impl ContentRecord {
    pub fn sha1_hash(&self) -> [u8; 20] {
        self.hash.as_bytes()[..20].try_into().unwrap()
    }

    pub fn sha256_hash(&self) -> [u8; 32] {
        self.hash.as_bytes().try_into().unwrap()
    }
}

#[derive(Debug, Clone)]
pub struct Tmd {
    pub signature: Signature,
    pub issuer: String,
    pub format_version: u8,
    pub ca_crl_version: u8,
    pub signer_crl_version: u8,
    pub system_version: [u8; 8],
    pub title_id: TitleId,
    pub title_type: [u8; 4],
    pub group_id: u16,
    /// The 62-byte block following `group_id`: on WiiU the first 4 bytes are
    /// `app_type`, on 3DS the whole range is unused. Kept raw since the
    /// physical layout doesn't depend on platform.
    pub app_type_block: RawView,
    pub access_rights: u32,
    pub title_version: u16,
    pub boot_index: u16,
    pub content_info_sha256: [u8; 32],
    pub content_info: Vec<ContentInfo>,
    pub contents: Vec<ContentRecord>,
    pub certificates: CertificateChain,
    pub raw_header_signed: RawView,
    pub raw_content_info: RawView,
}

impl Tmd {
    pub fn parse(data: Vec<u8>) -> Result<Self, BinaryError> {
        let data: Rc<[u8]> = Rc::from(data.into_boxed_slice());
        let mut cur = Cursor::new(data);

        let signature = Signature::parse(&mut cur)?;
        let header_start = cur.pos();

        let issuer = padded_string(cur.take(0x40)?.as_bytes());
        let format_version = cur.take_u8()?;
        let ca_crl_version = cur.take_u8()?;
        let signer_crl_version = cur.take_u8()?;
        let _unk1 = cur.take_u8()?;
        let system_version = cur.take_array::<8>()?;
        let title_id_bytes = cur.take_array::<8>()?;
        let title_id = TitleId::from_bytes(title_id_bytes).map_err(|e| BinaryError::FormatError {
            offset: cur.pos() - 8,
            expected: "valid title id".into(),
            actual: e.to_string(),
        })?;
        let title_type = cur.take_array::<4>()?;
        let group_id = cur.take_u16()?;
        let app_type_block = cur.take(0x3e)?;
        let access_rights = cur.take_u32()?;
        let title_version = cur.take_u16()?;
        let content_count = cur.take_u16()?;
        let boot_index = cur.take_u16()?;
        let _padding = cur.take_vec(2)?;
        let content_info_sha256: [u8; 32] = cur.take_array::<32>()?;

        let header_end = cur.pos();
        let raw_header_signed = RawView::new(cur.data_handle(), header_start, header_end - header_start);

        let content_info_start = cur.pos();
        let mut content_info = Vec::with_capacity(CONTENT_INFO_COUNT);
        for _ in 0..CONTENT_INFO_COUNT {
            let content_index = cur.take_u16()?;
            let content_count_entry = cur.take_u16()?;
            let contents_sha256 = cur.take(32)?;
            content_info.push(ContentInfo {
                content_index,
                content_count: content_count_entry,
                contents_sha256,
            });
        }
        let content_info_end = cur.pos();
        let raw_content_info = RawView::new(cur.data_handle(), content_info_start, content_info_end - content_info_start);

        let mut contents = Vec::with_capacity(content_count as usize);
        for _ in 0..content_count {
            let record_start = cur.pos();
            let id = cur.take_u32()?;
            let index = cur.take_u16()?;
            let raw_type = cur.take_u16()?;
            let content_type = ContentTypeFlags::from_bits_truncate(raw_type);
            let size = cur.take_u64()?;
            let hash = cur.take(32)?;
            let record_end = cur.pos();
            let raw = RawView::new(cur.data_handle(), record_start, record_end - record_start);
            contents.push(ContentRecord {
                id,
                index,
                content_type,
                size,
                hash,
                raw,
            });
        }

        let certificates = CertificateChain::parse(&mut cur)?;

        Ok(Tmd {
            signature,
            issuer,
            format_version,
            ca_crl_version,
            signer_crl_version,
            system_version,
            title_id,
            title_type,
            group_id,
            app_type_block,
            access_rights,
            title_version,
            boot_index,
            content_info_sha256,
            content_info,
            contents,
            certificates,
            raw_header_signed,
            raw_content_info,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.signature.write(&mut buf);
        buf.extend_from_slice(self.raw_header_signed.as_bytes());
        buf.extend_from_slice(self.raw_content_info.as_bytes());
        for record in &self.contents {
            buf.extend_from_slice(record.raw.as_bytes());
        }
        self.certificates.write(&mut buf);
        buf
    }

    pub fn content_by_index(&self, index: u16) -> Option<&ContentRecord> {
        self.contents.iter().find(|c| c.index == index)
    }

    pub fn content_by_id(&self, id: u32) -> Option<&ContentRecord> {
        self.contents.iter().find(|c| c.id == id)
    }

    /// Verifies `content_info_sha256` and, for every info entry with
    /// `content_count > 0`, that its `contents_sha256` matches the
    /// concatenation of the corresponding raw content records.
    pub fn verify_checksums(&self) -> Result<(), BinaryError> {
        let got = Sha256::digest(self.raw_content_info.as_bytes());
        if got.as_slice() != self.content_info_sha256 {
            return Err(BinaryError::ChecksumMismatch {
                field: "content_info_sha256",
                expected: hex::encode(self.content_info_sha256),
                got: hex::encode(got),
            });
        }
        for info in &self.content_info {
            if info.content_count == 0 {
                continue;
            }
            let start = info.content_index as usize;
            let end = start + info.content_count as usize;
            let slice = self.contents.get(start..end).ok_or_else(|| BinaryError::FormatError {
                offset: 0,
                expected: format!("{} contents available from index {}", info.content_count, start),
                actual: format!("{} contents total", self.contents.len()),
            })?;
            let mut hasher = Sha256::new();
            for record in slice {
                hasher.update(record.raw.as_bytes());
            }
            let got = hasher.finalize();
            if got.as_slice() != info.contents_sha256.as_bytes() {
                return Err(BinaryError::ChecksumMismatch {
                    field: "contents_sha256",
                    expected: hex::encode(info.contents_sha256.as_bytes()),
                    got: hex::encode(got),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_record_bytes(id: u32, index: u16, size: u64, hash: [u8; 32]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&index.to_be_bytes());
        buf.extend_from_slice(&ContentTypeFlags::ENCRYPTED.bits().to_be_bytes());
        buf.extend_from_slice(&size.to_be_bytes());
        buf.extend_from_slice(&hash);
        buf
    }

    fn make_tmd_bytes(contents: &[(u32, u16, u64, [u8; 32])]) -> Vec<u8> {
        let content_bytes: Vec<u8> = contents
            .iter()
            .flat_map(|(id, index, size, hash)| content_record_bytes(*id, *index, *size, *hash))
            .collect();

        let mut content_info = Vec::new();
        // first info entry covers all of `contents`
        content_info.extend_from_slice(&0u16.to_be_bytes());
        content_info.extend_from_slice(&(contents.len() as u16).to_be_bytes());
        content_info.extend_from_slice(&Sha256::digest(&content_bytes));
        content_info.resize(36 * CONTENT_INFO_COUNT, 0);

        let content_info_sha256 = Sha256::digest(&content_info);

        let mut header = Vec::new();
        let mut issuer = b"Root-CA00000003-CP0000000b".to_vec();
        issuer.resize(0x40, 0);
        header.extend_from_slice(&issuer);
        header.push(0); // format_version
        header.push(0); // ca_crl_version
        header.push(0); // signer_crl_version
        header.push(0); // unk1
        header.extend_from_slice(&[0u8; 8]); // system_version
        header.extend_from_slice(&0x0005000010143400u64.to_be_bytes()); // title_id
        header.extend_from_slice(&[0u8; 4]); // title_type
        header.extend_from_slice(&0u16.to_be_bytes()); // group_id
        header.extend_from_slice(&[0u8; 0x3e]); // app_type_block
        header.extend_from_slice(&0u32.to_be_bytes()); // access_rights
        header.extend_from_slice(&0u16.to_be_bytes()); // title_version
        header.extend_from_slice(&(contents.len() as u16).to_be_bytes()); // content_count
        header.extend_from_slice(&0u16.to_be_bytes()); // boot_index
        header.extend_from_slice(&[0u8; 2]); // padding
        header.extend_from_slice(&content_info_sha256);

        let mut buf = Vec::new();
        buf.extend_from_slice(&0x010001u32.to_be_bytes()); // RSA2048_SHA1
        buf.extend_from_slice(&[0u8; 0x100]);
        buf.resize(0x140, 0);
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&content_info);
        buf.extend_from_slice(&content_bytes);
        buf
    }

    #[test]
    fn parses_and_verifies_cross_hashes() {
        let bytes = make_tmd_bytes(&[(1, 0, 100, [0xAA; 32]), (2, 1, 200, [0xBB; 32])]);
        let tmd = Tmd::parse(bytes).unwrap();
        assert_eq!(tmd.contents.len(), 2);
        tmd.verify_checksums().unwrap();
    }

    #[test]
    fn tampered_content_hash_fails_verification() {
        let mut bytes = make_tmd_bytes(&[(1, 0, 100, [0xAA; 32])]);
        // flip a byte inside the single content record's hash field
        let len = bytes.len();
        bytes[len - 1] ^= 0xff;
        let tmd = Tmd::parse(bytes).unwrap();
        assert!(tmd.verify_checksums().is_err());
    }

    #[test]
    fn roundtrips_to_bytes() {
        let bytes = make_tmd_bytes(&[(1, 0, 100, [0xAA; 32])]);
        let tmd = Tmd::parse(bytes.clone()).unwrap();
        assert_eq!(tmd.to_bytes(), bytes);
    }
}
