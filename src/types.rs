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

//! Core data model for the validator announce subsystem: addresses, enode
//! URLs, versions, and the table row types of §3.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A 20-byte validator identifier: Keccak-256 of the uncompressed public
/// key, low 20 bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Zero address, used only as a sentinel in tests.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Build from raw bytes.
    pub fn from_bytes(b: [u8; 20]) -> Self {
        Self(b)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parse from a `0x`-prefixed or bare hex string.
    pub fn from_hex(s: &str) -> Result<Self, AddressError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| AddressError::BadHex)?;
        if bytes.len() != 20 {
            return Err(AddressError::BadLength);
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

/// Address parse error.
#[derive(Debug, Error)]
pub enum AddressError {
    /// Not valid hex.
    #[error("invalid hex")]
    BadHex,
    /// Decoded to something other than 20 bytes.
    #[error("expected 20 bytes")]
    BadLength,
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = AddressError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// A 32-byte external node identifier (Keccak-256 of an uncompressed
/// devp2p-style public key). Distinct from `Address`: a proxy has a node
/// id but is never itself a validator.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Version is an unsigned counter, wire-encoded as a 32-bit unsigned
/// integer carrying a Unix timestamp in seconds (truncates at year 2106,
/// see §9 "Time source").
pub type Version = u32;

/// Uncompressed secp256k1 public key, 64 bytes (x || y, no 0x04 prefix).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 64]);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(0x{}..)", hex::encode(&self.0[..8]))
    }
}

/// Recoverable ECDSA signature: r(32) || s(32) || v(1), 65 bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub [u8; 65]);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{}..)", hex::encode(&self.0[..8]))
    }
}

/// `enode://<128-hex-char-pubkey>@<host>:<port>` endpoint descriptor.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnodeUrl {
    /// Uncompressed public key of the endpoint.
    pub public_key: PublicKey,
    /// Host (IPv4/IPv6 literal or hostname).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// Enode URL parse error.
#[derive(Debug, Error)]
pub enum EnodeUrlError {
    /// Missing the `enode://` scheme.
    #[error("missing enode:// scheme")]
    BadScheme,
    /// Malformed `pubkey@host:port` body.
    #[error("malformed enode body")]
    BadBody,
    /// Public key is not 128 hex chars / 64 bytes.
    #[error("bad public key")]
    BadPublicKey,
    /// Port is not a valid u16.
    #[error("bad port")]
    BadPort,
}

impl EnodeUrl {
    /// Parse the standard v4 enode URL form.
    pub fn parse(s: &str) -> Result<Self, EnodeUrlError> {
        let rest = s.strip_prefix("enode://").ok_or(EnodeUrlError::BadScheme)?;
        let (pk_hex, host_port) = rest.split_once('@').ok_or(EnodeUrlError::BadBody)?;
        let (host, port_str) = host_port.rsplit_once(':').ok_or(EnodeUrlError::BadBody)?;
        if pk_hex.len() != 128 {
            return Err(EnodeUrlError::BadPublicKey);
        }
        let pk_bytes = hex::decode(pk_hex).map_err(|_| EnodeUrlError::BadPublicKey)?;
        let mut pk = [0u8; 64];
        pk.copy_from_slice(&pk_bytes);
        let port: u16 = port_str.parse().map_err(|_| EnodeUrlError::BadPort)?;
        Ok(Self {
            public_key: PublicKey(pk),
            host: host.to_string(),
            port,
        })
    }

    /// Node id (Keccak-256 of the public key).
    pub fn node_id(&self) -> NodeId {
        crate::crypto::address::node_id_from_public_key(&self.public_key)
    }
}

impl fmt::Display for EnodeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "enode://{}@{}:{}",
            hex::encode(self.public_key.0),
            self.host,
            self.port
        )
    }
}

impl fmt::Debug for EnodeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A row of the val-enode table (§3 `ValEnodeEntry`).
///
/// Invariants: `version <= highest_known_version`; upserts never lower
/// `highest_known_version`; `num_query_attempts_for_hk_version` resets to
/// 0 whenever `highest_known_version` advances.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValEnodeEntry {
    /// Last-known enode URL, if any has been learned yet.
    pub node: Option<EnodeUrl>,
    /// Version at which `node` was learned.
    pub version: Version,
    /// Largest version seen anywhere for this address.
    pub highest_known_version: Version,
    /// Public key, used to ECIES-encrypt enode URLs destined for this
    /// validator.
    pub public_key: Option<PublicKey>,
    /// Count of unanswered query attempts targeting `highest_known_version`.
    pub num_query_attempts_for_hk_version: u32,
    /// Wall-clock time (unix seconds) of the last query attempt.
    pub last_query_timestamp: u64,
}

/// A version certificate: a validator's signed claim "my announce version
/// is V" (§3 `VersionCertificate`). The signer's address and public key
/// are recovered from `signature`, not carried in the wire form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionCertificate {
    /// Claimed version.
    pub version: Version,
    /// Signature over the domain-separated payload (§4.1).
    pub signature: Signature,
}

/// An enode certificate: a validator's signed `{EnodeURL, Version}`
/// statement (§3 `EnodeCertificate`), delivered privately.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnodeCertificate {
    /// The advertised endpoint.
    pub enode_url: EnodeUrl,
    /// Version shared by every certificate in a single emission.
    pub version: Version,
}
