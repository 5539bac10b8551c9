// binary/cert.rs from nusclient
//
// Signature and certificate-chain structures shared by Ticket and TMD.
// ref: https://www.3dbrew.org/wiki/Certificates

use super::{padded_string, write_padded_string, BinaryError, Cursor, RawView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Rsa4096,
    Rsa2048,
    Ecdsa,
}

impl SignatureAlgorithm {
    pub fn mod_size(self) -> usize {
        match self {
            SignatureAlgorithm::Rsa4096 => 0x200,
            SignatureAlgorithm::Rsa2048 => 0x100,
            SignatureAlgorithm::Ecdsa => 0x3c,
        }
    }

    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(SignatureAlgorithm::Rsa4096),
            1 => Some(SignatureAlgorithm::Rsa2048),
            2 => Some(SignatureAlgorithm::Ecdsa),
            _ => None,
        }
    }

    fn to_u32(self) -> u32 {
        match self {
            SignatureAlgorithm::Rsa4096 => 0,
            SignatureAlgorithm::Rsa2048 => 1,
            SignatureAlgorithm::Ecdsa => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    Rsa4096Sha1,
    Rsa2048Sha1,
    EcdsaSha1,
    Rsa4096Sha256,
    Rsa2048Sha256,
    EcdsaSha256,
}

impl SignatureType {
    pub fn signature_alg(self) -> SignatureAlgorithm {
        match self {
            SignatureType::Rsa4096Sha1 | SignatureType::Rsa4096Sha256 => SignatureAlgorithm::Rsa4096,
            SignatureType::Rsa2048Sha1 | SignatureType::Rsa2048Sha256 => SignatureAlgorithm::Rsa2048,
            SignatureType::EcdsaSha1 | SignatureType::EcdsaSha256 => SignatureAlgorithm::Ecdsa,
        }
    }

    pub fn hash_alg(self) -> HashAlgorithm {
        match self {
            SignatureType::Rsa4096Sha1 | SignatureType::Rsa2048Sha1 | SignatureType::EcdsaSha1 => {
                HashAlgorithm::Sha1
            }
            SignatureType::Rsa4096Sha256 | SignatureType::Rsa2048Sha256 | SignatureType::EcdsaSha256 => {
                HashAlgorithm::Sha256
            }
        }
    }

    fn from_u32(v: u32) -> Result<Self, BinaryError> {
        Ok(match v {
            0x010000 => SignatureType::Rsa4096Sha1,
            0x010001 => SignatureType::Rsa2048Sha1,
            0x010002 => SignatureType::EcdsaSha1,
            0x010003 => SignatureType::Rsa4096Sha256,
            0x010004 => SignatureType::Rsa2048Sha256,
            0x010005 => SignatureType::EcdsaSha256,
            other => {
                return Err(BinaryError::FormatError {
                    offset: 0,
                    expected: "known signature type".into(),
                    actual: format!("{:#x}", other),
                })
            }
        })
    }

    fn to_u32(self) -> u32 {
        match self {
            SignatureType::Rsa4096Sha1 => 0x010000,
            SignatureType::Rsa2048Sha1 => 0x010001,
            SignatureType::EcdsaSha1 => 0x010002,
            SignatureType::Rsa4096Sha256 => 0x010003,
            SignatureType::Rsa2048Sha256 => 0x010004,
            SignatureType::EcdsaSha256 => 0x010005,
        }
    }
}

/// A signature block: 4-byte type tag plus algorithm-sized data, the whole
/// thing aligned to 0x40 on the wire.
#[derive(Debug, Clone)]
pub struct Signature {
    pub sig_type: SignatureType,
    pub data: RawView,
}

impl Signature {
    pub(crate) fn parse(cur: &mut Cursor) -> Result<Self, BinaryError> {
        let type_offset = cur.pos();
        let raw_type = cur.take_u32()?;
        let sig_type = SignatureType::from_u32(raw_type).map_err(|_| BinaryError::FormatError {
            offset: type_offset,
            expected: "known signature type".into(),
            actual: format!("{:#x}", raw_type),
        })?;
        let data = cur.take(sig_type.signature_alg().mod_size())?;
        cur.align(0x40)?;
        Ok(Signature { sig_type, data })
    }

    pub(crate) fn write(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.extend_from_slice(&self.sig_type.to_u32().to_be_bytes());
        buf.extend_from_slice(self.data.as_bytes());
        pad_to(buf, start, 0x40);
    }
}

fn pad_to(buf: &mut Vec<u8>, start: usize, align: usize) {
    let written = buf.len() - start;
    let rem = written % align;
    if rem != 0 {
        buf.resize(buf.len() + (align - rem), 0);
    }
}

#[derive(Debug, Clone)]
pub enum CertKey {
    Rsa { modulus: RawView, exponent: u32 },
    Ecdsa { data: RawView },
}

/// One entry in an appended certificate chain (CA/XS/CP certs).
#[derive(Debug, Clone)]
pub struct Certificate {
    pub signature: Signature,
    pub issuer: String,
    pub key_type: SignatureAlgorithm,
    pub name: String,
    /// Unknown 4 bytes following `name`; possibly a timestamp. Round-tripped
    /// as-is since its meaning isn't pinned down.
    pub unk1: u32,
    pub key: CertKey,
    /// The certificate's own raw bytes starting right after its signature
    /// block, used as the signed data when this certificate is itself the
    /// subject of a parent signature in a chain walk.
    pub raw_body: RawView,
}

impl Certificate {
    fn parse(cur: &mut Cursor) -> Result<Self, BinaryError> {
        let signature = Signature::parse(cur)?;
        let body_start = cur.pos();
        let issuer = padded_string(cur.take(0x40)?.as_bytes());
        let key_type_offset = cur.pos();
        let raw_key_type = cur.take_u32()?;
        let key_type = SignatureAlgorithm::from_u32(raw_key_type).ok_or_else(|| BinaryError::FormatError {
            offset: key_type_offset,
            expected: "known key algorithm".into(),
            actual: format!("{:#x}", raw_key_type),
        })?;
        let name = padded_string(cur.take(0x40)?.as_bytes());
        let unk1 = cur.take_u32()?;
        let key = match key_type {
            SignatureAlgorithm::Rsa4096 | SignatureAlgorithm::Rsa2048 => {
                let modulus = cur.take(key_type.mod_size())?;
                let exponent = cur.take_u32()?;
                CertKey::Rsa { modulus, exponent }
            }
            SignatureAlgorithm::Ecdsa => CertKey::Ecdsa {
                data: cur.take(key_type.mod_size())?,
            },
        };
        let body_end = cur.pos();
        cur.align(0x40)?;
        let raw_body = RawView::new(cur.data_handle(), body_start, body_end - body_start);
        Ok(Certificate {
            signature,
            issuer,
            key_type,
            name,
            unk1,
            key,
            raw_body,
        })
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        self.signature.write(buf);
        write_padded_string(buf, &self.issuer, 0x40);
        buf.extend_from_slice(&match self.key_type {
            SignatureAlgorithm::Rsa4096 => 0u32,
            SignatureAlgorithm::Rsa2048 => 1u32,
            SignatureAlgorithm::Ecdsa => 2u32,
        }.to_be_bytes());
        write_padded_string(buf, &self.name, 0x40);
        buf.extend_from_slice(&self.unk1.to_be_bytes());
        match &self.key {
            CertKey::Rsa { modulus, exponent } => {
                buf.extend_from_slice(modulus.as_bytes());
                buf.extend_from_slice(&exponent.to_be_bytes());
            }
            CertKey::Ecdsa { data } => buf.extend_from_slice(data.as_bytes()),
        }
        pad_to(buf, start, 0x40);
    }
}

/// A greedily-parsed, variable-length list of certificates: everything
/// remaining in the buffer after the structure's own fields.
#[derive(Debug, Clone, Default)]
pub struct CertificateChain {
    pub certificates: Vec<Certificate>,
}

impl CertificateChain {
    pub(crate) fn parse(cur: &mut Cursor) -> Result<Self, BinaryError> {
        let mut certificates = Vec::new();
        while cur.remaining() > 0 {
            certificates.push(Certificate::parse(cur)?);
        }
        Ok(CertificateChain { certificates })
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        for cert in &self.certificates {
            cert.write(buf);
        }
    }

    pub fn by_name(&self, name: &str) -> Option<&Certificate> {
        self.certificates.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn make_rsa2048_cert_bytes(unk1: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x010001u32.to_be_bytes()); // Rsa2048Sha1
        buf.extend_from_slice(&[0x11; 0x100]); // signature data
        pad_to(&mut buf, 0, 0x40);
        let body_start = buf.len();
        write_padded_string(&mut buf, "Root-CA00000003", 0x40);
        buf.extend_from_slice(&1u32.to_be_bytes()); // key_type == Rsa2048
        write_padded_string(&mut buf, "CP0000000b", 0x40);
        buf.extend_from_slice(&unk1.to_be_bytes());
        buf.extend_from_slice(&[0x22; 0x100]); // modulus
        buf.extend_from_slice(&0x10001u32.to_be_bytes()); // exponent
        pad_to(&mut buf, body_start, 0x40);
        buf
    }

    #[test]
    fn roundtrips_nonzero_unk1() {
        let bytes = make_rsa2048_cert_bytes(0xdeadbeef);
        let data: Rc<[u8]> = Rc::from(bytes.clone().into_boxed_slice());
        let mut cur = Cursor::new(data);
        let cert = Certificate::parse(&mut cur).unwrap();
        assert_eq!(cert.unk1, 0xdeadbeef);

        let mut out = Vec::new();
        cert.write(&mut out);
        assert_eq!(out, bytes);
    }

    #[test]
    fn roundtrips_zero_unk1() {
        let bytes = make_rsa2048_cert_bytes(0);
        let data: Rc<[u8]> = Rc::from(bytes.clone().into_boxed_slice());
        let mut cur = Cursor::new(data);
        let cert = Certificate::parse(&mut cur).unwrap();
        assert_eq!(cert.unk1, 0);

        let mut out = Vec::new();
        cert.write(&mut out);
        assert_eq!(out, bytes);
    }
}
