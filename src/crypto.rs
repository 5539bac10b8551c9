// crypto.rs from nusclient
//
// AES-CBC primitives, title-key derivation, hash verification, and the
// RSA-PKCS1v1.5 certificate-chain walk used by Ticket/TMD signatures.

use aes::cipher::block_padding::ZeroPadding;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::{BigUint, RsaPublicKey};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use thiserror::Error;

use crate::binary::cert::{CertKey, CertificateChain, HashAlgorithm, Signature};
use crate::id::{TitleId, TitlePlatform};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("3DS title-key derivation is not implemented")]
    Unsupported3ds,
    #[error("checksum mismatch in `{field}`: expected {expected}, got {got}")]
    ChecksumMismatch {
        field: &'static str,
        expected: String,
        got: String,
    },
    #[error("signature invalid for issuer segment `{0}`")]
    SignatureInvalid(String),
    #[error("missing certificate `{0}` in chain")]
    MissingCert(String),
    #[error("issuer chain must start with `Root` (got `{0}`)")]
    BadIssuerRoot(String),
    #[error("issuer of intermediate certificate `{cert}` does not match expected chain (expected `{expected}`, got `{actual}`)")]
    IssuerMismatch {
        cert: String,
        expected: String,
        actual: String,
    },
    #[error("unsupported key algorithm for signature verification (ECDSA not implemented)")]
    UnsupportedKeyAlgorithm,
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::errors::Error),
}

/// A pinned RSA public key, verified by SHA-1 fingerprint on load.
#[derive(Debug, Clone)]
pub struct RootKey {
    pub modulus: Vec<u8>,
    pub exponent: u32,
}

pub const ROOT_KEY_FINGERPRINT: &str = "076bed301a9bcf40706330213470f53c78ff67f2";

/// Hex-encoded SHA-1 of a raw key, used to pin local keystore entries
/// against known-good values.
pub fn sha1_fingerprint(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

impl RootKey {
    pub fn from_bytes(modulus: Vec<u8>, exponent: u32) -> Result<Self, CryptoError> {
        let mut hasher = Sha1::new();
        hasher.update(&modulus);
        hasher.update(exponent.to_be_bytes());
        let digest = hex::encode(hasher.finalize());
        if digest != ROOT_KEY_FINGERPRINT {
            return Err(CryptoError::ChecksumMismatch {
                field: "root_key_fingerprint",
                expected: ROOT_KEY_FINGERPRINT.to_string(),
                got: digest,
            });
        }
        Ok(RootKey { modulus, exponent })
    }

    fn public_key(&self) -> Result<RsaPublicKey, CryptoError> {
        Ok(RsaPublicKey::new(
            BigUint::from_bytes_be(&self.modulus),
            BigUint::from_bytes_be(&self.exponent.to_be_bytes()),
        )?)
    }
}

/// Converts a [`TitleId`] into the 16-byte IV used for title-key decryption:
/// the big-endian title id bytes followed by 8 zero bytes.
fn title_id_to_iv(title_id: TitleId) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(&title_id.to_bytes());
    iv
}

/// Decrypts a ticket's `titlekey_encrypted` field using the platform's
/// common key. 3DS titles are rejected with [`CryptoError::Unsupported3ds`];
/// only WiiU title-key derivation is implemented, matching the source this
/// crate is grounded on.
pub fn decrypt_title_key(
    title_key_enc: [u8; 16],
    title_id: TitleId,
    common_key_wiiu: [u8; 16],
) -> Result<[u8; 16], CryptoError> {
    if title_id.title_type.platform != TitlePlatform::WiiU {
        return Err(CryptoError::Unsupported3ds);
    }
    let iv = title_id_to_iv(title_id);
    let decryptor = Aes128CbcDec::new(&common_key_wiiu.into(), &iv.into());
    let mut title_key = title_key_enc;
    decryptor
        .decrypt_padded_mut::<ZeroPadding>(&mut title_key)
        .expect("single 16-byte block always decrypts");
    Ok(title_key)
}

/// Decrypts one AES-CBC block in place, chaining from the previous block
/// within the same `decryptor` instance (true streaming: no padding, no
/// re-keying between calls).
pub fn decrypt_block(decryptor: &mut Aes128CbcDec, block: &mut [u8]) {
    let block = aes::cipher::generic_array::GenericArray::from_mut_slice(block);
    decryptor.decrypt_block_mut(block);
}

pub fn new_cbc_decryptor(key: [u8; 16], iv: [u8; 16]) -> Aes128CbcDec {
    Aes128CbcDec::new(&key.into(), &iv.into())
}

/// Decrypts a full, already-length-known buffer in one call (used for
/// whole-content unhashed decryption where the caller already buffered the
/// entire stream).
pub fn decrypt_whole(key: [u8; 16], iv: [u8; 16], data: &mut [u8]) {
    let mut decryptor = new_cbc_decryptor(key, iv);
    for chunk in data.chunks_exact_mut(16) {
        decrypt_block(&mut decryptor, chunk);
    }
}

pub fn verify_sha1(data: &[u8], expected: &[u8]) -> Result<(), CryptoError> {
    let got = Sha1::digest(data);
    if got.as_slice() != expected {
        return Err(CryptoError::ChecksumMismatch {
            field: "sha1",
            expected: hex::encode(expected),
            got: hex::encode(got),
        });
    }
    Ok(())
}

pub fn verify_sha256(data: &[u8], expected: &[u8]) -> Result<(), CryptoError> {
    use sha2::Digest as _;
    let got = Sha256::digest(data);
    if got.as_slice() != expected {
        return Err(CryptoError::ChecksumMismatch {
            field: "sha256",
            expected: hex::encode(expected),
            got: hex::encode(got),
        });
    }
    Ok(())
}

fn verify_signature(data: &[u8], signature: &Signature, key: &RsaPublicKey) -> bool {
    match signature.sig_type.hash_alg() {
        HashAlgorithm::Sha1 => {
            let digest = Sha1::digest(data);
            key.verify(Pkcs1v15Sign::new::<Sha1>(), &digest, signature.data.as_bytes())
                .is_ok()
        }
        HashAlgorithm::Sha256 => {
            use sha2::Digest as _;
            let digest = Sha256::digest(data);
            key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature.data.as_bytes())
                .is_ok()
        }
    }
}

fn cert_public_key(cert: &crate::binary::cert::Certificate) -> Result<RsaPublicKey, CryptoError> {
    match &cert.key {
        CertKey::Rsa { modulus, exponent } => Ok(RsaPublicKey::new(
            BigUint::from_bytes_be(modulus.as_bytes()),
            BigUint::from_bytes_be(&exponent.to_be_bytes()),
        )?),
        CertKey::Ecdsa { .. } => Err(CryptoError::UnsupportedKeyAlgorithm),
    }
}

/// Walks a certificate chain from `issuer` (e.g. `"Root-CA00000003-XS0000000c"`)
/// up to the pinned root key, verifying each signature against its issuer's
/// public key. See spec §4.3 for the exact five-step algorithm this mirrors.
pub fn verify_chain(
    data: &[u8],
    issuer: &str,
    signature: &Signature,
    certificates: &CertificateChain,
    root_key: &RootKey,
) -> Result<(), CryptoError> {
    let mut issuer_parts: Vec<&str> = issuer.split('-').collect();
    if issuer_parts.first() != Some(&"Root") {
        return Err(CryptoError::BadIssuerRoot(issuer.to_string()));
    }
    for part in &issuer_parts[1..] {
        if certificates.by_name(part).is_none() {
            return Err(CryptoError::MissingCert((*part).to_string()));
        }
    }

    let mut data = data.to_vec();
    let mut signature = signature.clone();

    loop {
        let issuer_part = *issuer_parts.last().unwrap();
        let (key, is_root) = if issuer_part == "Root" {
            (root_key.public_key()?, true)
        } else {
            let cert = certificates
                .by_name(issuer_part)
                .ok_or_else(|| CryptoError::MissingCert(issuer_part.to_string()))?;
            let expected: Vec<&str> = issuer_parts[..issuer_parts.len() - 1].to_vec();
            let actual: Vec<&str> = cert.issuer.split('-').collect();
            if actual != expected {
                return Err(CryptoError::IssuerMismatch {
                    cert: cert.name.clone(),
                    expected: expected.join("-"),
                    actual: actual.join("-"),
                });
            }
            (cert_public_key(cert)?, false)
        };

        if !verify_signature(&data, &signature, &key) {
            return Err(CryptoError::SignatureInvalid(issuer_part.to_string()));
        }

        if is_root {
            return Ok(());
        }

        let cert = certificates.by_name(issuer_part).unwrap();
        issuer_parts.pop();
        data = cert.raw_body.as_bytes().to_vec();
        signature = cert.signature.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_id_iv_is_id_bytes_plus_zero_padding() {
        let title_id = TitleId::from_str("0005000E10143400").unwrap();
        let iv = title_id_to_iv(title_id);
        assert_eq!(&iv[..8], &title_id.to_bytes());
        assert_eq!(&iv[8..], &[0u8; 8]);
    }

    #[test]
    fn verify_sha1_detects_mismatch() {
        let data = b"hello world";
        let good = Sha1::digest(data);
        assert!(verify_sha1(data, &good).is_ok());
        let mut bad = good.to_vec();
        bad[0] ^= 1;
        assert!(verify_sha1(data, &bad).is_err());
    }

    #[test]
    fn root_key_fingerprint_rejects_wrong_key() {
        let modulus = vec![0u8; 0x100];
        assert!(RootKey::from_bytes(modulus, 0x10001).is_err());
    }
}
