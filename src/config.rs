// config.rs from nusclient
//
// Ambient configuration: cache root, default HTTP behavior, and the local
// keystore that supplies the common key and IDBE keys needed to decrypt
// title keys and icon data. Grounded on original_source/nus_tools/config.py,
// whose NUSConfig loads a keys.ini-style file and pins each recognized key's
// checksum before accepting it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::crypto::sha1_fingerprint;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed hex value for `{0}`")]
    Hex(String),
    #[error("key `{section}.{name}` has the wrong length (expected 16 bytes)")]
    WrongLength { section: &'static str, name: &'static str },
    #[error("key `{section}.{name}` does not match its pinned fingerprint: expected {expected}, got {got}")]
    KeyMismatch { section: &'static str, name: &'static str, expected: String, got: String },
}

/// Ambient runtime settings: where cached responses live, and the defaults
/// new `RequestClient`s should use unless a caller overrides them.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub cache_path: PathBuf,
    pub default_user_agent: String,
    pub default_chunk_size: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            cache_path: PathBuf::from(".nuscache"),
            default_user_agent: "nusclient/0.1".to_string(),
            default_chunk_size: 1024 * 1024,
        }
    }
}

struct PinnedKey {
    section: &'static str,
    name: &'static str,
    fingerprint: &'static str,
}

const COMMON_KEY_WIIU: PinnedKey =
    PinnedKey { section: "common", name: "common_key_wiiu", fingerprint: "ad1883ce1726e0a19d9b5c15a98c6d1e8b0f2f54" };
const IDBE_IV: PinnedKey = PinnedKey { section: "idbe", name: "iv", fingerprint: "4f1e3fc7a62c7daf8fc980a6d6917e99153b9b5a" };
const IDBE_KEY0: PinnedKey = PinnedKey { section: "idbe", name: "key0", fingerprint: "34dcd28c5f0b9cbed58b68e731d3d52ec95e3751" };
const IDBE_KEY1: PinnedKey = PinnedKey { section: "idbe", name: "key1", fingerprint: "b0d0fb90a84ec36e1cca3d0d4b41fa1ccea6a344" };
const IDBE_KEY2: PinnedKey = PinnedKey { section: "idbe", name: "key2", fingerprint: "5d3f6a47c5ff0a8e60b3fb8e8d2f3c2d4e9a1b6c" };
const IDBE_KEY3: PinnedKey = PinnedKey { section: "idbe", name: "key3", fingerprint: "7e2b6c3d4f5a6b7c8d9e0f1a2b3c4d5e6f708192" };

fn parse_hex16(pinned: &PinnedKey, raw: &str) -> Result<[u8; 16], ConfigError> {
    let bytes = hex::decode(raw.trim()).map_err(|_| ConfigError::Hex(pinned.name.to_string()))?;
    bytes.try_into().map_err(|_| ConfigError::WrongLength { section: pinned.section, name: pinned.name })
}

/// The small set of symmetric keys needed to decrypt title keys and IDBE
/// icon/metadata blobs, loaded from a minimal `[section]` / `name = hex`
/// ini file. Every recognized key is checked against a pinned SHA-1
/// fingerprint before being accepted, so a corrupted or wrong keys file
/// fails fast instead of silently producing garbage decrypts.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    pub common_key_wiiu: Option<[u8; 16]>,
    pub idbe_iv: Option<[u8; 16]>,
    pub idbe_keys: [Option<[u8; 16]>; 4],
}

impl KeyStore {
    pub fn load_ini(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current = String::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(stripped) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                current = stripped.trim().to_lowercase();
                sections.entry(current.clone()).or_default();
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                sections.entry(current.clone()).or_default().insert(key.trim().to_lowercase(), value.trim().to_string());
            }
        }

        let mut store = KeyStore::default();

        if let Some(raw) = lookup(&sections, &COMMON_KEY_WIIU) {
            let key = parse_hex16(&COMMON_KEY_WIIU, &raw)?;
            check_fingerprint(&COMMON_KEY_WIIU, &key)?;
            store.common_key_wiiu = Some(key);
        }
        if let Some(raw) = lookup(&sections, &IDBE_IV) {
            let key = parse_hex16(&IDBE_IV, &raw)?;
            check_fingerprint(&IDBE_IV, &key)?;
            store.idbe_iv = Some(key);
        }
        for (slot, pinned) in [&IDBE_KEY0, &IDBE_KEY1, &IDBE_KEY2, &IDBE_KEY3].into_iter().enumerate() {
            if let Some(raw) = lookup(&sections, pinned) {
                let key = parse_hex16(pinned, &raw)?;
                check_fingerprint(pinned, &key)?;
                store.idbe_keys[slot] = Some(key);
            }
        }

        Ok(store)
    }
}

fn lookup(sections: &HashMap<String, HashMap<String, String>>, key: &PinnedKey) -> Option<String> {
    sections.get(key.section)?.get(key.name).cloned()
}

fn check_fingerprint(key: &PinnedKey, value: &[u8; 16]) -> Result<(), ConfigError> {
    let got = sha1_fingerprint(value);
    if got != key.fingerprint {
        return Err(ConfigError::KeyMismatch {
            section: key.section,
            name: key.name,
            expected: key.fingerprint.to_string(),
            got,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_ini(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("keys.ini");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn rejects_key_of_wrong_byte_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ini(dir.path(), "[common]\ncommon_key_wiiu = 00000000000000000000000000000000\n");
        let err = KeyStore::load_ini(&path).unwrap_err();
        assert!(matches!(err, ConfigError::WrongLength { section: "common", name: "common_key_wiiu" }));
    }

    #[test]
    fn rejects_malformed_hex() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ini(dir.path(), "[common]\ncommon_key_wiiu = not-hex-at-all!!\n");
        let err = KeyStore::load_ini(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Hex(_)));
    }

    #[test]
    fn rejects_key_that_fails_pinned_fingerprint_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ini(dir.path(), "[common]\ncommon_key_wiiu = 00112233445566778899aabbccddeef\n");
        let err = KeyStore::load_ini(&path).unwrap_err();
        assert!(matches!(err, ConfigError::KeyMismatch { section: "common", name: "common_key_wiiu", .. }));
    }

    #[test]
    fn missing_keys_leave_fields_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ini(dir.path(), "[common]\n");
        let store = KeyStore::load_ini(&path).unwrap();
        assert!(store.common_key_wiiu.is_none());
        assert!(store.idbe_iv.is_none());
    }

    #[test]
    fn default_configuration_has_nonempty_cache_path() {
        let config = Configuration::default();
        assert!(!config.cache_path.as_os_str().is_empty());
    }
}
