// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Deterministic, length-prefixed (RLP-compatible) wire encoding for the
//! three announce message kinds, plus signing and signature-recovery
//! helpers over the shared envelope (§4.1, §6).

use rlp::{Rlp, RlpStream};
use thiserror::Error;

use crate::crypto::address::keccak256;
use crate::crypto::keystore::{recover_address, KeystoreError};
use crate::types::{Address, EnodeUrl, PublicKey, Signature, Version, VersionCertificate};

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// RLP structure did not match the expected shape.
    #[error("malformed rlp")]
    Malformed,
    /// A fixed-size field had the wrong length.
    #[error("bad field length")]
    BadLength,
    /// Enode URL field did not parse.
    #[error("bad enode url")]
    BadEnodeUrl,
    /// Envelope carries an unrecognized message code.
    #[error("unknown message code")]
    UnknownCode,
    /// Signature verification or recovery failed.
    #[error("crypto: {0}")]
    Crypto(#[from] KeystoreError),
}

/// The three announce sub-protocols, tagged at the envelope level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageCode {
    /// `QueryEnodeMsg`.
    QueryEnode = 0,
    /// `VersionCertificatesMsg`.
    VersionCertificates = 1,
    /// `EnodeCertificateMsg`.
    EnodeCertificate = 2,
}

impl TryFrom<u8> for MessageCode {
    type Error = CodecError;
    fn try_from(v: u8) -> Result<Self, CodecError> {
        match v {
            0 => Ok(MessageCode::QueryEnode),
            1 => Ok(MessageCode::VersionCertificates),
            2 => Ok(MessageCode::EnodeCertificate),
            _ => Err(CodecError::UnknownCode),
        }
    }
}

/// The generic signed envelope carrying every announce message:
/// `{Code, Address, Msg, Signature}`. `VersionCertificatesMsg` envelopes
/// carry an empty address and signature; authenticity is per-entry.
#[derive(Clone, Debug)]
pub struct Envelope {
    /// Which sub-protocol `msg` decodes as.
    pub code: MessageCode,
    /// Sender address, absent for `VersionCertificatesMsg`.
    pub address: Option<Address>,
    /// Opaque inner payload bytes (itself RLP-encoded).
    pub msg: Vec<u8>,
    /// Signature over `signing_hash(code, address, msg)`, absent for
    /// `VersionCertificatesMsg`.
    pub signature: Option<Signature>,
}

/// Bytes that get Keccak-256 hashed and signed/verified for an envelope:
/// `rlp([code, address, msg])`.
fn signing_preimage(code: MessageCode, address: Option<&Address>, msg: &[u8]) -> Vec<u8> {
    let mut s = RlpStream::new_list(3);
    s.append(&(code as u8));
    match address {
        Some(a) => s.append(&a.as_bytes().as_slice()),
        None => s.append(&""),
    };
    s.append(&msg);
    s.out().to_vec()
}

/// Hash signed by envelopes: Keccak-256 of the signing preimage.
pub fn envelope_signing_hash(code: MessageCode, address: Option<&Address>, msg: &[u8]) -> [u8; 32] {
    keccak256(&signing_preimage(code, address, msg))
}

impl Envelope {
    /// Build and sign an envelope whose address is the signer's own.
    pub fn sign(
        code: MessageCode,
        address: Address,
        msg: Vec<u8>,
        sign_hash: impl FnOnce(&[u8; 32]) -> Result<Signature, KeystoreError>,
    ) -> Result<Self, CodecError> {
        let hash = envelope_signing_hash(code, Some(&address), &msg);
        let signature = sign_hash(&hash)?;
        Ok(Self {
            code,
            address: Some(address),
            msg,
            signature: Some(signature),
        })
    }

    /// Build an unsigned envelope (used for `VersionCertificatesMsg`,
    /// whose authenticity lives in the inner entries).
    pub fn unsigned(code: MessageCode, msg: Vec<u8>) -> Self {
        Self {
            code,
            address: None,
            msg,
            signature: None,
        }
    }

    /// Verify the envelope signature recovers to `self.address`.
    pub fn verify(&self) -> Result<(), CodecError> {
        let (Some(address), Some(signature)) = (&self.address, &self.signature) else {
            return Err(CodecError::Malformed);
        };
        let hash = envelope_signing_hash(self.code, Some(address), &self.msg);
        let (recovered, _pk) = recover_address(&hash, signature)?;
        if recovered != *address {
            return Err(CodecError::Crypto(KeystoreError::BadSignature));
        }
        Ok(())
    }

    /// Verify and recover `(address, public_key)` from the envelope
    /// signature, ignoring `self.address` (used when the address is not
    /// yet trusted, e.g. before checking connection-set membership).
    pub fn recover(&self) -> Result<(Address, PublicKey), CodecError> {
        let Some(signature) = &self.signature else {
            return Err(CodecError::Malformed);
        };
        let hash = envelope_signing_hash(self.code, self.address.as_ref(), &self.msg);
        recover_address(&hash, signature).map_err(CodecError::from)
    }

    /// Encode to wire bytes: `rlp([code, address, msg, signature])`.
    pub fn encode(&self) -> Vec<u8> {
        let mut s = RlpStream::new_list(4);
        s.append(&(self.code as u8));
        match &self.address {
            Some(a) => s.append(&a.as_bytes().as_slice()),
            None => s.append(&""),
        };
        s.append(&self.msg.as_slice());
        match &self.signature {
            Some(sig) => s.append(&sig.0.as_slice()),
            None => s.append(&""),
        };
        s.out().to_vec()
    }

    /// Decode from wire bytes produced by `encode`.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let rlp = Rlp::new(bytes);
        if !rlp.is_list() || rlp.item_count().map_err(|_| CodecError::Malformed)? != 4 {
            return Err(CodecError::Malformed);
        }
        let code_raw: u8 = rlp.val_at(0).map_err(|_| CodecError::Malformed)?;
        let code = MessageCode::try_from(code_raw)?;
        let address_bytes: Vec<u8> = rlp.val_at(1).map_err(|_| CodecError::Malformed)?;
        let address = parse_optional_address(&address_bytes)?;
        let msg: Vec<u8> = rlp.val_at(2).map_err(|_| CodecError::Malformed)?;
        let signature_bytes: Vec<u8> = rlp.val_at(3).map_err(|_| CodecError::Malformed)?;
        let signature = parse_optional_signature(&signature_bytes)?;
        Ok(Self {
            code,
            address,
            msg,
            signature,
        })
    }
}

fn parse_optional_address(bytes: &[u8]) -> Result<Option<Address>, CodecError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    if bytes.len() != 20 {
        return Err(CodecError::BadLength);
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(bytes);
    Ok(Some(Address::from_bytes(out)))
}

fn parse_optional_signature(bytes: &[u8]) -> Result<Option<Signature>, CodecError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    if bytes.len() != 65 {
        return Err(CodecError::BadLength);
    }
    let mut out = [0u8; 65];
    out.copy_from_slice(bytes);
    Ok(Some(Signature(out)))
}

/// One destination's encrypted enode URL inside a `QueryEnodeMsg`.
#[derive(Clone, Debug)]
pub struct EncryptedEnodeUrl {
    /// Intended recipient.
    pub dest_address: Address,
    /// ECIES ciphertext of the enode URL bytes, encrypted to the
    /// recipient's public key.
    pub ciphertext: Vec<u8>,
}

/// Inner payload of `QueryEnodeMsg` (§4.1).
#[derive(Clone, Debug)]
pub struct QueryEnodeMsg {
    /// Per-destination encrypted enode URLs.
    pub encrypted_enode_urls: Vec<EncryptedEnodeUrl>,
    /// Sender's announce version at emission time.
    pub version: Version,
    /// Emission timestamp; perturbs the message hash on every emission.
    pub timestamp: u32,
}

impl QueryEnodeMsg {
    /// Encode the inner payload (not the envelope).
    pub fn encode(&self) -> Vec<u8> {
        let mut s = RlpStream::new_list(3);
        s.begin_list(self.encrypted_enode_urls.len());
        for e in &self.encrypted_enode_urls {
            s.begin_list(2);
            s.append(&e.dest_address.as_bytes().as_slice());
            s.append(&e.ciphertext.as_slice());
        }
        s.append(&self.version);
        s.append(&self.timestamp);
        s.out().to_vec()
    }

    /// Decode the inner payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let rlp = Rlp::new(bytes);
        if !rlp.is_list() || rlp.item_count().map_err(|_| CodecError::Malformed)? != 3 {
            return Err(CodecError::Malformed);
        }
        let entries_rlp = rlp.at(0).map_err(|_| CodecError::Malformed)?;
        let mut encrypted_enode_urls = Vec::with_capacity(entries_rlp.item_count().unwrap_or(0));
        for item in entries_rlp.iter() {
            if item.item_count().map_err(|_| CodecError::Malformed)? != 2 {
                return Err(CodecError::Malformed);
            }
            let dest_bytes: Vec<u8> = item.val_at(0).map_err(|_| CodecError::Malformed)?;
            if dest_bytes.len() != 20 {
                return Err(CodecError::BadLength);
            }
            let mut dest = [0u8; 20];
            dest.copy_from_slice(&dest_bytes);
            let ciphertext: Vec<u8> = item.val_at(1).map_err(|_| CodecError::Malformed)?;
            encrypted_enode_urls.push(EncryptedEnodeUrl {
                dest_address: Address::from_bytes(dest),
                ciphertext,
            });
        }
        let version: Version = rlp.val_at(1).map_err(|_| CodecError::Malformed)?;
        let timestamp: u32 = rlp.val_at(2).map_err(|_| CodecError::Malformed)?;
        Ok(Self {
            encrypted_enode_urls,
            version,
            timestamp,
        })
    }
}

/// Inner payload of `VersionCertificatesMsg`: an ordered list of
/// self-authenticating version certificates.
#[derive(Clone, Debug)]
pub struct VersionCertificatesMsg(pub Vec<VersionCertificate>);

impl VersionCertificatesMsg {
    /// Encode the inner payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut s = RlpStream::new_list(self.0.len());
        for c in &self.0 {
            s.begin_list(2);
            s.append(&c.version);
            s.append(&c.signature.0.as_slice());
        }
        s.out().to_vec()
    }

    /// Decode the inner payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let rlp = Rlp::new(bytes);
        if !rlp.is_list() {
            return Err(CodecError::Malformed);
        }
        let mut out = Vec::with_capacity(rlp.item_count().unwrap_or(0));
        for item in rlp.iter() {
            if item.item_count().map_err(|_| CodecError::Malformed)? != 2 {
                return Err(CodecError::Malformed);
            }
            let version: Version = item.val_at(0).map_err(|_| CodecError::Malformed)?;
            let sig_bytes: Vec<u8> = item.val_at(1).map_err(|_| CodecError::Malformed)?;
            if sig_bytes.len() != 65 {
                return Err(CodecError::BadLength);
            }
            let mut sig = [0u8; 65];
            sig.copy_from_slice(&sig_bytes);
            out.push(VersionCertificate {
                version,
                signature: Signature(sig),
            });
        }
        Ok(Self(out))
    }
}

/// Inner payload of `EnodeCertificateMsg` (§4.1).
#[derive(Clone, Debug)]
pub struct EnodeCertificateMsg {
    /// Raw enode URL text, as received on the wire.
    pub enode_url: String,
    /// Version shared by every certificate in a single emission.
    pub version: Version,
}

impl EnodeCertificateMsg {
    /// Encode the inner payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut s = RlpStream::new_list(2);
        s.append(&self.enode_url.as_str());
        s.append(&self.version);
        s.out().to_vec()
    }

    /// Decode the inner payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let rlp = Rlp::new(bytes);
        if !rlp.is_list() || rlp.item_count().map_err(|_| CodecError::Malformed)? != 2 {
            return Err(CodecError::Malformed);
        }
        let enode_url: String = rlp.val_at(0).map_err(|_| CodecError::Malformed)?;
        let version: Version = rlp.val_at(1).map_err(|_| CodecError::Malformed)?;
        Ok(Self { enode_url, version })
    }

    /// Parse `enode_url` into a structured `EnodeUrl`.
    pub fn parsed_enode_url(&self) -> Result<EnodeUrl, CodecError> {
        EnodeUrl::parse(&self.enode_url).map_err(|_| CodecError::BadEnodeUrl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keystore::{FileSecp256k1Backend, SignerBackend};
    use tempfile::tempdir;

    fn backend() -> FileSecp256k1Backend {
        let dir = tempdir().unwrap();
        FileSecp256k1Backend::load_or_create(&dir.path().join("validator.key")).unwrap()
    }

    #[test]
    fn envelope_roundtrip_and_verify() {
        let b = backend();
        let address = b.address();
        let msg = QueryEnodeMsg {
            encrypted_enode_urls: vec![EncryptedEnodeUrl {
                dest_address: Address::ZERO,
                ciphertext: vec![1, 2, 3],
            }],
            version: 42,
            timestamp: 1000,
        }
        .encode();

        let envelope =
            Envelope::sign(MessageCode::QueryEnode, address, msg.clone(), |h| b.sign_hash(h)).unwrap();
        let bytes = envelope.encode();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded.code, MessageCode::QueryEnode);
        assert_eq!(decoded.address, Some(address));
        assert_eq!(decoded.msg, msg);
        decoded.verify().unwrap();
    }

    #[test]
    fn unsigned_envelope_has_no_address_or_signature() {
        let inner = VersionCertificatesMsg(vec![]).encode();
        let envelope = Envelope::unsigned(MessageCode::VersionCertificates, inner);
        let bytes = envelope.encode();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert!(decoded.address.is_none());
        assert!(decoded.signature.is_none());
    }

    #[test]
    fn query_enode_msg_roundtrip() {
        let msg = QueryEnodeMsg {
            encrypted_enode_urls: vec![
                EncryptedEnodeUrl {
                    dest_address: Address([1u8; 20]),
                    ciphertext: vec![9, 9, 9],
                },
                EncryptedEnodeUrl {
                    dest_address: Address([2u8; 20]),
                    ciphertext: vec![],
                },
            ],
            version: 7,
            timestamp: 99,
        };
        let bytes = msg.encode();
        let decoded = QueryEnodeMsg::decode(&bytes).unwrap();
        assert_eq!(decoded.version, 7);
        assert_eq!(decoded.timestamp, 99);
        assert_eq!(decoded.encrypted_enode_urls.len(), 2);
        assert_eq!(decoded.encrypted_enode_urls[0].dest_address, Address([1u8; 20]));
    }

    #[test]
    fn enode_certificate_msg_roundtrip() {
        let msg = EnodeCertificateMsg {
            enode_url: format!("enode://{}@10.0.0.1:30303", "ab".repeat(64)),
            version: 55,
        };
        let bytes = msg.encode();
        let decoded = EnodeCertificateMsg::decode(&bytes).unwrap();
        assert_eq!(decoded.version, 55);
        decoded.parsed_enode_url().unwrap();
    }

    #[test]
    fn tampered_signature_fails_verify() {
        let b = backend();
        let address = b.address();
        let msg = vec![1, 2, 3];
        let mut envelope =
            Envelope::sign(MessageCode::EnodeCertificate, address, msg, |h| b.sign_hash(h)).unwrap();
        if let Some(sig) = envelope.signature.as_mut() {
            sig.0[0] ^= 0xff;
        }
        assert!(envelope.verify().is_err());
    }
}
