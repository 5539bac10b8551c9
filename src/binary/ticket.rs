// binary/ticket.rs from nusclient
//
// ref: https://www.3dbrew.org/wiki/Ticket, https://wiibrew.org/wiki/Ticket

use std::rc::Rc;

use crate::crypto::CryptoError;
use crate::id::TitleId;

use super::cert::{CertificateChain, Signature};
use super::{padded_string, BinaryError, Cursor};

/// A CETK ticket: encrypted title key, license metadata, and an appended
/// certificate chain signing it.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub signature: Signature,
    pub issuer: String,
    pub ecdh_data: Vec<u8>,
    pub version: u8,
    pub ca_crl_version: u8,
    pub signer_crl_version: u8,
    pub title_key_encrypted: [u8; 16],
    pub ticket_id: [u8; 8],
    pub console_id: [u8; 4],
    pub title_id: TitleId,
    pub title_version: u16,
    pub license_type: u8,
    pub key_y_index: u8,
    pub account_id: [u8; 4],
    pub audit: u8,
    pub limits: Vec<u8>,
    pub content_index_unk: Vec<u8>,
    pub certificates: CertificateChain,
    /// The bytes from `issuer` through the end of `content_index`, i.e. what
    /// the ticket's own `signature` covers.
    pub raw_signed: super::RawView,
}

impl Ticket {
    pub fn parse(data: Vec<u8>) -> Result<Self, BinaryError> {
        let data: Rc<[u8]> = Rc::from(data.into_boxed_slice());
        let mut cur = Cursor::new(data);

        let signature = Signature::parse(&mut cur)?;
        let signed_start = cur.pos();

        let issuer = padded_string(cur.take(0x40)?.as_bytes());
        let ecdh_data = cur.take_vec(0x3c)?;
        let version = cur.take_u8()?;
        let ca_crl_version = cur.take_u8()?;
        let signer_crl_version = cur.take_u8()?;
        let title_key_encrypted = cur.take_array::<16>()?;
        let _unk1 = cur.take_u8()?;
        let ticket_id = cur.take_array::<8>()?;
        let console_id = cur.take_array::<4>()?;
        let title_id_bytes = cur.take_array::<8>()?;
        let title_id = TitleId::from_bytes(title_id_bytes).map_err(|e| BinaryError::FormatError {
            offset: cur.pos() - 8,
            expected: "valid title id".into(),
            actual: e.to_string(),
        })?;
        let _unk2 = cur.take_vec(2)?;
        let title_version = cur.take_u16()?;
        let _unk3 = cur.take_vec(8)?;
        let license_type = cur.take_u8()?;
        let key_y_index = cur.take_u8()?;
        let _unk4 = cur.take_vec(0x2a)?;
        let account_id = cur.take_array::<4>()?;
        let _unk5 = cur.take_u8()?;
        let audit = cur.take_u8()?;
        let _unk6 = cur.take_vec(0x42)?;
        let limits = cur.take_vec(0x40)?;

        let _content_index_unk1 = cur.take_vec(4)?;
        let content_index_size = cur.take_u32()? as usize;
        if content_index_size < 8 {
            return Err(BinaryError::FormatError {
                offset: cur.pos() - 4,
                expected: ">= 8".into(),
                actual: content_index_size.to_string(),
            });
        }
        let content_index_unk = cur.take_vec(content_index_size - 8)?;

        let signed_end = cur.pos();
        let raw_signed = super::RawView::new(cur.data_handle(), signed_start, signed_end - signed_start);

        let certificates = CertificateChain::parse(&mut cur)?;

        Ok(Ticket {
            signature,
            issuer,
            ecdh_data,
            version,
            ca_crl_version,
            signer_crl_version,
            title_key_encrypted,
            ticket_id,
            console_id,
            title_id,
            title_version,
            license_type,
            key_y_index,
            account_id,
            audit,
            limits,
            content_index_unk,
            certificates,
            raw_signed,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.signature.write(&mut buf);
        buf.extend_from_slice(self.raw_signed.as_bytes());
        self.certificates.write(&mut buf);
        buf
    }

    pub fn decrypted_title_key(&self, common_key_wiiu: [u8; 16]) -> Result<[u8; 16], CryptoError> {
        crate::crypto::decrypt_title_key(self.title_key_encrypted, self.title_id, common_key_wiiu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ticket_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        // signature: RSA2048_SHA1 (0x010001), mod_size 0x100, header 4 bytes -> aligned 0x40 -> 0x140
        buf.extend_from_slice(&0x010001u32.to_be_bytes());
        buf.extend_from_slice(&[0u8; 0x100]);
        buf.resize(0x140, 0);
        // issuer
        let mut issuer = b"Root-CA00000003-XS0000000c".to_vec();
        issuer.resize(0x40, 0);
        buf.extend_from_slice(&issuer);
        buf.extend_from_slice(&[0u8; 0x3c]); // ecdh_data
        buf.push(0); // version
        buf.push(0); // ca_crl_version
        buf.push(0); // signer_crl_version
        buf.extend_from_slice(&[0xaa; 16]); // title_key_encrypted
        buf.push(0); // unk1
        buf.extend_from_slice(&[0u8; 8]); // ticket_id
        buf.extend_from_slice(&[0u8; 4]); // console_id
        buf.extend_from_slice(&0x0005000E10143400u64.to_be_bytes()); // title_id
        buf.extend_from_slice(&[0u8; 2]); // unk2
        buf.extend_from_slice(&0u16.to_be_bytes()); // title_version
        buf.extend_from_slice(&[0u8; 8]); // unk3
        buf.push(0); // license_type
        buf.push(0); // key_y_index
        buf.extend_from_slice(&[0u8; 0x2a]); // unk4
        buf.extend_from_slice(&[0u8; 4]); // account_id
        buf.push(0); // unk5
        buf.push(0); // audit
        buf.extend_from_slice(&[0u8; 0x42]); // unk6
        buf.extend_from_slice(&[0u8; 0x40]); // limits
        buf.extend_from_slice(&[0u8; 4]); // content_index unk1
        buf.extend_from_slice(&8u32.to_be_bytes()); // content_index size == 8, no extra data
        buf
    }

    #[test]
    fn parses_title_id_and_roundtrips() {
        let bytes = make_ticket_bytes();
        let ticket = Ticket::parse(bytes.clone()).unwrap();
        assert_eq!(ticket.title_id.to_string(), "0005000E10143400");
        assert_eq!(ticket.issuer, "Root-CA00000003-XS0000000c");
        assert_eq!(ticket.to_bytes(), bytes);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let mut bytes = make_ticket_bytes();
        bytes.truncate(bytes.len() - 10);
        assert!(matches!(Ticket::parse(bytes), Err(BinaryError::TruncatedInput { .. })));
    }
}
