// binary/idbe.rs from nusclient
//
// Icon Database Entry: AES-CBC-encrypted per-title icon/title-name bundle.
// ref: https://wiiubrew.org/wiki/Nn_idbe.rpl, https://www.3dbrew.org/wiki/SMDH

use std::rc::Rc;
use sha2::{Digest, Sha256};

use crate::id::{TitleId, TitlePlatform};

use super::{BinaryError, Cursor};

pub const LANGUAGES: [&str; 16] = [
    "JP", "EN", "FR", "DE", "IT", "ES", "TW", "KO", "NL", "PT", "RU", "CN",
    "unused1", "unused2", "unused3", "unused4",
];

#[derive(Debug, Clone)]
pub struct TitleInfo {
    pub short_name: String,
    pub long_name: String,
    pub publisher: String,
}

#[derive(Debug, Clone)]
pub struct Idbe {
    pub platform: TitlePlatform,
    pub checksum: [u8; 32],
    pub title_id: TitleId,
    pub version: u32,
    pub regions: u32,
    /// Per-language title info, indexed in the same order as [`LANGUAGES`].
    pub title_info: Vec<TitleInfo>,
    /// Icon image data: one padded TGA blob on WiiU, two raw RGB565 blobs
    /// (24x24, 48x48) on 3DS. Kept raw; this crate does not decode pixels.
    pub icon_data: Vec<u8>,
}

fn read_utf16(bytes: &[u8], little_endian: bool) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| {
            if little_endian {
                u16::from_le_bytes([c[0], c[1]])
            } else {
                u16::from_be_bytes([c[0], c[1]])
            }
        })
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

impl Idbe {
    /// `raw` is the body as received from the IDBE server: a leading
    /// `0x00` byte, a key-index byte, then the AES-CBC-encrypted payload.
    pub fn parse(raw: &[u8], platform: TitlePlatform, decrypt: impl FnOnce(u8, &[u8]) -> Vec<u8>) -> Result<Self, BinaryError> {
        if raw.is_empty() || raw[0] != 0 {
            return Err(BinaryError::FormatError {
                offset: 0,
                expected: "0x00".into(),
                actual: raw.first().map(|b| format!("{:#x}", b)).unwrap_or_default(),
            });
        }
        let key_index = raw[1];
        let decrypted = decrypt(key_index, &raw[2..]);
        Self::parse_decrypted(&decrypted, platform)
    }

    fn parse_decrypted(data: &[u8], platform: TitlePlatform) -> Result<Self, BinaryError> {
        let data: Rc<[u8]> = Rc::from(data.to_vec().into_boxed_slice());
        let mut cur = Cursor::new(data);

        let checksum = cur.take_array::<32>()?;
        let body_start = cur.pos();

        let little_endian = matches!(platform, TitlePlatform::N3ds);
        let title_id_bytes = cur.take_array::<8>()?;
        let title_id_bytes = if little_endian {
            let mut b = title_id_bytes;
            b.reverse();
            b
        } else {
            title_id_bytes
        };
        let title_id = TitleId::from_bytes(title_id_bytes).map_err(|e| BinaryError::FormatError {
            offset: body_start,
            expected: "valid title id".into(),
            actual: e.to_string(),
        })?;
        let version_raw = cur.take_u32()?;
        let version = if little_endian { version_raw.swap_bytes() } else { version_raw };
        let _unk1 = cur.take_vec(4)?;
        let regions_raw = cur.take_u32()?;
        let regions = if little_endian { regions_raw.swap_bytes() } else { regions_raw };
        let _unk2 = cur.take_vec(0x1c)?;

        let mut title_info = Vec::with_capacity(16);
        for _ in 0..16 {
            let short_name = read_utf16(cur.take(0x80)?.as_bytes(), little_endian);
            let long_name = read_utf16(cur.take(0x100)?.as_bytes(), little_endian);
            let publisher = read_utf16(cur.take(0x80)?.as_bytes(), little_endian);
            title_info.push(TitleInfo { short_name, long_name, publisher });
        }

        let icon_len = match platform {
            TitlePlatform::WiiU => 0x2c + 128 * 128 * 4 + 4,
            TitlePlatform::N3ds => 24 * 24 * 2 + 48 * 48 * 2,
        };
        let icon_data = cur.take_vec(icon_len)?;

        let body_end = cur.pos();
        let got = Sha256::digest(&cur.data_handle()[body_start..body_end]);
        if got.as_slice() != checksum {
            return Err(BinaryError::ChecksumMismatch {
                field: "checksum",
                expected: hex::encode(checksum),
                got: hex::encode(got),
            });
        }

        Ok(Idbe {
            platform,
            checksum,
            title_id,
            version,
            regions,
            title_info,
            icon_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{TitlePlatform, TitleType};

    fn make_decrypted_body(title_id: TitleId) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&title_id.to_bytes());
        body.extend_from_slice(&1u32.to_be_bytes()); // version
        body.extend_from_slice(&[0u8; 4]); // unk1
        body.extend_from_slice(&0xffffffffu32.to_be_bytes()); // regions
        body.extend_from_slice(&[0u8; 0x1c]); // unk2
        for _ in 0..16 {
            body.extend_from_slice(&[0u8; 0x80]);
            body.extend_from_slice(&[0u8; 0x100]);
            body.extend_from_slice(&[0u8; 0x80]);
        }
        body.extend_from_slice(&vec![0u8; 0x2c + 128 * 128 * 4 + 4]);

        let mut full = Vec::new();
        full.extend_from_slice(&Sha256::digest(&body));
        full.extend_from_slice(&body);
        full
    }

    #[test]
    fn parses_wiiu_idbe_and_checks_title_id() {
        let title_id = TitleId::new(TitleType::from_platform_category(TitlePlatform::WiiU, 0x0000), 0x10143400);
        let decrypted = make_decrypted_body(title_id);
        let idbe = Idbe::parse_decrypted(&decrypted, TitlePlatform::WiiU).unwrap();
        assert_eq!(idbe.title_id, title_id);
        assert_eq!(idbe.title_info.len(), 16);
    }

    #[test]
    fn bad_checksum_is_rejected() {
        let title_id = TitleId::new(TitleType::from_platform_category(TitlePlatform::WiiU, 0x0000), 1);
        let mut decrypted = make_decrypted_body(title_id);
        let last = decrypted.len() - 1;
        decrypted[last] ^= 0xff;
        assert!(Idbe::parse_decrypted(&decrypted, TitlePlatform::WiiU).is_err());
    }
}
