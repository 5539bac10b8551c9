// id.rs from nusclient
//
// Title/content-ID parsing and platform/category derivation (IdCodec).
// Grounded in original_source/nus_tools/ids.py and nus_tools/region.py.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdError {
    #[error("unknown title type for raw value `{0:#010x}`")]
    UnknownTitleType(u32),
    #[error("unknown content type for raw value `{0}`")]
    UnknownContentType(u16),
    #[error("title id string must be 16 hex characters (was {0})")]
    BadTitleIdLength(usize),
    #[error("content id string must be 14 decimal digits (was {0})")]
    BadContentIdLength(usize),
    #[error("title id `{0}` is not a game/update/dlc title and cannot be converted to `{1}`")]
    UnsupportedCategory(TitleId, &'static str),
    #[error("invalid hex in title/content id: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid decimal digits in content id")]
    Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TitlePlatform {
    N3ds,
    WiiU,
}

impl TitlePlatform {
    fn from_bits(bits: u16) -> Result<Self, IdError> {
        match bits {
            0x0004 => Ok(TitlePlatform::N3ds),
            0x0005 => Ok(TitlePlatform::WiiU),
            _ => Err(IdError::UnknownTitleType((bits as u32) << 16)),
        }
    }

    fn bits(self) -> u16 {
        match self {
            TitlePlatform::N3ds => 0x0004,
            TitlePlatform::WiiU => 0x0005,
        }
    }
}

/// The high 32 bits of a [`TitleId`]: platform in the high 16 bits, category in the low 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TitleType {
    pub platform: TitlePlatform,
    pub category: u16,
}

impl TitleType {
    pub fn from_platform_category(platform: TitlePlatform, category: u16) -> Self {
        TitleType { platform, category }
    }

    fn from_raw(raw: u32) -> Result<Self, IdError> {
        let platform = TitlePlatform::from_bits((raw >> 16) as u16)
            .map_err(|_| IdError::UnknownTitleType(raw))?;
        Ok(TitleType {
            platform,
            category: (raw & 0xffff) as u16,
        })
    }

    fn raw(self) -> u32 {
        ((self.platform.bits() as u32) << 16) | self.category as u32
    }
}

/// A 64-bit Title ID: `TitleType` (high 32 bits) plus a 32-bit unique id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TitleId {
    pub title_type: TitleType,
    pub uid: u32,
}

impl TitleId {
    pub fn new(title_type: TitleType, uid: u32) -> Self {
        TitleId { title_type, uid }
    }

    pub fn from_str(s: &str) -> Result<Self, IdError> {
        if s.len() != 16 {
            return Err(IdError::BadTitleIdLength(s.len()));
        }
        let raw = u64::from_str_radix(s, 16).map_err(|_| IdError::BadTitleIdLength(s.len()))?;
        Self::from_u64(raw)
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Result<Self, IdError> {
        Self::from_u64(u64::from_be_bytes(bytes))
    }

    pub fn from_u64(raw: u64) -> Result<Self, IdError> {
        let title_type = TitleType::from_raw((raw >> 32) as u32)?;
        Ok(TitleId {
            title_type,
            uid: (raw & 0xffff_ffff) as u32,
        })
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.to_u64().to_be_bytes()
    }

    pub fn to_u64(self) -> u64 {
        ((self.title_type.raw() as u64) << 32) | self.uid as u64
    }

    pub fn is_game(&self) -> bool {
        self.title_type.category == 0x0000
    }

    pub fn is_update(&self) -> bool {
        self.title_type.category == 0x000e
    }

    pub fn is_dlc(&self) -> bool {
        match self.title_type.platform {
            TitlePlatform::N3ds => self.title_type.category == 0x008c,
            TitlePlatform::WiiU => self.title_type.category == 0x000c,
        }
    }

    fn require_game_update_or_dlc(&self, target: &'static str) -> Result<(), IdError> {
        if self.is_game() || self.is_update() || self.is_dlc() {
            Ok(())
        } else {
            Err(IdError::UnsupportedCategory(*self, target))
        }
    }

    pub fn game(&self) -> Result<TitleId, IdError> {
        self.require_game_update_or_dlc("game")?;
        Ok(TitleId::new(
            TitleType::from_platform_category(self.title_type.platform, 0x0000),
            self.uid,
        ))
    }

    pub fn update(&self) -> Result<TitleId, IdError> {
        self.require_game_update_or_dlc("update")?;
        Ok(TitleId::new(
            TitleType::from_platform_category(self.title_type.platform, 0x000e),
            self.uid,
        ))
    }

    pub fn dlc(&self) -> Result<TitleId, IdError> {
        self.require_game_update_or_dlc("dlc")?;
        let category = match self.title_type.platform {
            TitlePlatform::N3ds => 0x008c,
            TitlePlatform::WiiU => 0x000c,
        };
        Ok(TitleId::new(
            TitleType::from_platform_category(self.title_type.platform, category),
            self.uid,
        ))
    }
}

impl fmt::Display for TitleId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:016X}", self.to_u64())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentPlatform {
    N3ds,
    WiiU,
}

impl ContentPlatform {
    fn from_value(value: u16) -> Result<Self, IdError> {
        match value / 100 {
            50 => Ok(ContentPlatform::N3ds),
            20 => Ok(ContentPlatform::WiiU),
            _ => Err(IdError::UnknownContentType(value)),
        }
    }
}

/// The 4-digit content-type prefix of a [`ContentId`]: top two digits encode platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentType {
    pub value: u16,
}

impl ContentType {
    pub fn platform(&self) -> Result<ContentPlatform, IdError> {
        ContentPlatform::from_value(self.value)
    }

    pub fn category(&self) -> u16 {
        self.value % 100
    }
}

/// A 14-digit decimal content id: 4-digit content-type + 10-digit unique id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentId {
    pub content_type: ContentType,
    pub uid: u64,
}

impl ContentId {
    pub fn from_str(s: &str) -> Result<Self, IdError> {
        if s.len() != 14 {
            return Err(IdError::BadContentIdLength(s.len()));
        }
        let type_value: u16 = s[..4].parse().map_err(|_| IdError::Decimal)?;
        let uid: u64 = s[4..].parse().map_err(|_| IdError::Decimal)?;
        // validate that the platform bits are recognized
        ContentPlatform::from_value(type_value)?;
        Ok(ContentId {
            content_type: ContentType { value: type_value },
            uid,
        })
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04}{:010}", self.content_type.value, self.uid)
    }
}

/// Region codes used by catalog and update-list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Eur,
    Usa,
    Jpn,
    Kor,
    All,
}

impl Region {
    pub fn country_code(&self) -> Option<&'static str> {
        match self {
            Region::Eur => Some("GB"),
            Region::Usa => Some("US"),
            Region::Jpn => Some("JP"),
            Region::Kor => Some("KR"),
            Region::All => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_id_derivation() {
        let tid = TitleId::from_str("0005000E10143400").unwrap();
        assert_eq!(tid.title_type.platform, TitlePlatform::WiiU);
        assert!(tid.is_update());
        assert_eq!(tid.uid, 0x10143400);
        assert_eq!(tid.game().unwrap().to_u64(), 0x0005000010143400);
        assert_eq!(tid.dlc().unwrap().to_u64(), 0x0005000C10143400);
    }

    #[test]
    fn title_id_unsupported_category() {
        let tid = TitleId::new(TitleType::from_platform_category(TitlePlatform::WiiU, 0x0002), 1);
        assert!(matches!(tid.game(), Err(IdError::UnsupportedCategory(_, "game"))));
    }

    #[test]
    fn content_id_platform() {
        // 2001 ("TITLE_WIIU" in the source this crate is grounded on) is a
        // WiiU content type: top two digits 20 -> ContentPlatform::WiiU.
        let cid = ContentId::from_str("20010000000001").unwrap();
        assert_eq!(cid.content_type.value, 2001);
        assert_eq!(cid.content_type.platform().unwrap(), ContentPlatform::WiiU);
    }

    #[test]
    fn title_id_roundtrip_bytes() {
        let tid = TitleId::from_str("0005000010143400").unwrap();
        let bytes = tid.to_bytes();
        assert_eq!(TitleId::from_bytes(bytes).unwrap(), tid);
    }

    #[test]
    fn title_id_display_is_canonical() {
        let tid = TitleId::from_str("0005000e10143400").unwrap();
        assert_eq!(tid.to_string(), "0005000E10143400");
    }
}
