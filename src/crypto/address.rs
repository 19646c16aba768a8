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

//! Address and node-id derivation from secp256k1 public keys.

use crate::types::{Address, NodeId, PublicKey};
use sha3::{Digest, Keccak256};

/// Keccak-256 of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&out);
    buf
}

/// Validator address: Keccak-256 of the uncompressed public key, low 20
/// bytes.
pub fn address_from_public_key(pk: &PublicKey) -> Address {
    let digest = keccak256(&pk.0);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..]);
    Address(out)
}

/// Node id: full Keccak-256 of the uncompressed public key (devp2p
/// `enode.ID` convention, unlike `Address`, not truncated).
pub fn node_id_from_public_key(pk: &PublicKey) -> NodeId {
    NodeId(keccak256(&pk.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_low_20_bytes_of_keccak() {
        let pk = PublicKey([7u8; 64]);
        let addr = address_from_public_key(&pk);
        let full = keccak256(&pk.0);
        assert_eq!(addr.0, full[12..]);
    }

    #[test]
    fn node_id_is_full_32_bytes() {
        let pk = PublicKey([9u8; 64]);
        let nid = node_id_from_public_key(&pk);
        assert_eq!(nid.0, keccak256(&pk.0));
    }
}
