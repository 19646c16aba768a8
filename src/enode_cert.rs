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

//! Build/sign/verify enode certificates and maintain this node's own
//! certificate map (§4.4).

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::codec::{CodecError, EnodeCertificateMsg, Envelope, MessageCode};
use crate::crypto::keystore::KeystoreError;
use crate::types::{Address, EnodeUrl, NodeId, Version};

/// Errors from the enode-certificate module.
#[derive(Debug, Error)]
pub enum EnodeCertError {
    /// A signing or decode step failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A signing step failed.
    #[error(transparent)]
    Keystore(#[from] KeystoreError),
    /// `SetEnodeCertificateMsgMap` was given messages with mixed versions.
    #[error("mixed versions in certificate map")]
    InvalidCertMap,
}

/// This node's own `externalNodeID → signed EnodeCertificateMsg` map
/// (§4.4): one entry for a standalone validator, one per peered proxy
/// for a proxied validator.
pub struct EnodeCertificateMsgMap {
    state: Mutex<(Version, HashMap<NodeId, Envelope>)>,
}

impl EnodeCertificateMsgMap {
    /// Construct an empty map at version 0.
    pub fn new() -> Self {
        Self {
            state: Mutex::new((0, HashMap::new())),
        }
    }

    /// Current stored version and a clone of the map.
    pub fn snapshot(&self) -> (Version, HashMap<NodeId, Envelope>) {
        let guard = self.state.lock().expect("enode cert map poisoned");
        (guard.0, guard.1.clone())
    }

    /// `SetEnodeCertificateMsgMap(newMap)`: atomically replace the map
    /// only if every message shares a single version and that version
    /// strictly exceeds the stored one. Returns `true` if installed,
    /// `false` if it was a no-op.
    pub fn set(&self, new_map: HashMap<NodeId, Envelope>) -> Result<bool, EnodeCertError> {
        let mut common_version: Option<Version> = None;
        for envelope in new_map.values() {
            let inner = EnodeCertificateMsg::decode(&envelope.msg)?;
            match common_version {
                None => common_version = Some(inner.version),
                Some(v) if v == inner.version => {}
                Some(_) => return Err(EnodeCertError::InvalidCertMap),
            }
        }
        let Some(version) = common_version else {
            // Empty map: nothing to install, never regresses state.
            return Ok(false);
        };

        let mut guard = self.state.lock().expect("enode cert map poisoned");
        if version <= guard.0 {
            return Ok(false);
        }
        *guard = (version, new_map);
        Ok(true)
    }
}

impl Default for EnodeCertificateMsgMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Build and sign one `EnodeCertificateMsg` envelope binding `url` at
/// `version`, addressed from `self_address`.
pub fn sign_enode_certificate(
    self_address: Address,
    url: &EnodeUrl,
    version: Version,
    sign_hash: impl FnOnce(&[u8; 32]) -> Result<crate::types::Signature, KeystoreError>,
) -> Result<Envelope, EnodeCertError> {
    let inner = EnodeCertificateMsg {
        enode_url: url.to_string(),
        version,
    }
    .encode();
    Envelope::sign(MessageCode::EnodeCertificate, self_address, inner, sign_hash).map_err(EnodeCertError::from)
}

/// `generateEnodeCertificateMsgs(version)`: one signed certificate per
/// externally reachable node id (self for standalone, one per peered
/// proxy for a proxied validator).
pub fn generate_enode_certificate_msgs(
    self_address: Address,
    version: Version,
    urls_by_node: &[(NodeId, EnodeUrl)],
    sign_hash: impl Fn(&[u8; 32]) -> Result<crate::types::Signature, KeystoreError>,
) -> Result<HashMap<NodeId, Envelope>, EnodeCertError> {
    let mut out = HashMap::with_capacity(urls_by_node.len());
    for (node_id, url) in urls_by_node {
        let envelope = sign_enode_certificate(self_address, url, version, &sign_hash)?;
        out.insert(*node_id, envelope);
    }
    Ok(out)
}

/// Parse and verify a received `EnodeCertificateMsg` envelope, returning
/// the signer address, the parsed enode URL, and the claimed version.
pub fn verify_enode_certificate(envelope: &Envelope) -> Result<(Address, EnodeUrl, Version), EnodeCertError> {
    envelope.verify()?;
    let inner = EnodeCertificateMsg::decode(&envelope.msg)?;
    let url = inner.parsed_enode_url()?;
    let address = envelope.address.ok_or(CodecError::Malformed)?;
    Ok((address, url, inner.version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keystore::{FileSecp256k1Backend, SignerBackend};
    use tempfile::tempdir;

    fn url() -> EnodeUrl {
        EnodeUrl::parse(&format!("enode://{}@10.0.0.1:30303", "cd".repeat(64))).unwrap()
    }

    #[test]
    fn set_rejects_mixed_versions() {
        let dir = tempdir().unwrap();
        let backend = FileSecp256k1Backend::load_or_create(&dir.path().join("validator.key")).unwrap();
        let address = backend.address();

        let a = sign_enode_certificate(address, &url(), 10, |h| backend.sign_hash(h)).unwrap();
        let b = sign_enode_certificate(address, &url(), 11, |h| backend.sign_hash(h)).unwrap();

        let mut map = HashMap::new();
        map.insert(NodeId([1u8; 32]), a);
        map.insert(NodeId([2u8; 32]), b);

        let cert_map = EnodeCertificateMsgMap::new();
        assert!(matches!(cert_map.set(map), Err(EnodeCertError::InvalidCertMap)));
    }

    #[test]
    fn set_is_noop_unless_version_strictly_advances() {
        let dir = tempdir().unwrap();
        let backend = FileSecp256k1Backend::load_or_create(&dir.path().join("validator.key")).unwrap();
        let address = backend.address();
        let cert_map = EnodeCertificateMsgMap::new();

        let mut map10 = HashMap::new();
        map10.insert(NodeId([1u8; 32]), sign_enode_certificate(address, &url(), 10, |h| backend.sign_hash(h)).unwrap());
        assert!(cert_map.set(map10.clone()).unwrap());
        assert_eq!(cert_map.snapshot().0, 10);

        assert!(!cert_map.set(map10).unwrap());

        let mut map5 = HashMap::new();
        map5.insert(NodeId([1u8; 32]), sign_enode_certificate(address, &url(), 5, |h| backend.sign_hash(h)).unwrap());
        assert!(!cert_map.set(map5).unwrap());
        assert_eq!(cert_map.snapshot().0, 10);
    }

    #[test]
    fn verify_roundtrip() {
        let dir = tempdir().unwrap();
        let backend = FileSecp256k1Backend::load_or_create(&dir.path().join("validator.key")).unwrap();
        let address = backend.address();
        let envelope = sign_enode_certificate(address, &url(), 42, |h| backend.sign_hash(h)).unwrap();
        let (recovered_addr, parsed_url, version) = verify_enode_certificate(&envelope).unwrap();
        assert_eq!(recovered_addr, address);
        assert_eq!(parsed_url, url());
        assert_eq!(version, 42);
    }
}
