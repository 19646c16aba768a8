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

//! Domain-separated signing payloads (§4.1, §6).

use crate::types::Version;

/// Fixed domain-separation salt prepended to the version-certificate
/// signing tuple, preventing cross-protocol signature confusion (§4.1,
/// §6).
pub const VERSION_CERTIFICATE_SALT: &str = "versionCertificate";

/// Build the bytes signed by a version certificate:
/// `rlp([salt, version])`, hashed with Keccak-256 by the caller before
/// signing (matching the envelope signing convention in `codec.rs`).
pub fn version_certificate_signing_bytes(version: Version) -> Vec<u8> {
    let mut stream = rlp::RlpStream::new_list(2);
    stream.append(&VERSION_CERTIFICATE_SALT);
    stream.append(&version);
    stream.out().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_is_prepended_and_deterministic() {
        let a = version_certificate_signing_bytes(42);
        let b = version_certificate_signing_bytes(42);
        assert_eq!(a, b);
        let c = version_certificate_signing_bytes(43);
        assert_ne!(a, c);
    }
}
