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

//! Round-trip and idempotence properties for the wire codec (spec §8:
//! "Encode-then-decode is identity for every message kind").

use istanbul_announce::codec::{EncryptedEnodeUrl, Envelope, MessageCode, QueryEnodeMsg, VersionCertificatesMsg};
use istanbul_announce::crypto::keystore::{FileSecp256k1Backend, SignerBackend};
use istanbul_announce::types::{Address, Signature, VersionCertificate};
use proptest::prelude::*;

fn dest_addresses() -> impl Strategy<Value = Vec<Address>> {
    proptest::collection::vec(any::<[u8; 20]>(), 0..8).prop_map(|v| v.into_iter().map(Address::from_bytes).collect())
}

proptest! {
    #[test]
    fn query_enode_msg_roundtrips(
        dests in dest_addresses(),
        version in any::<u32>(),
        timestamp in any::<u32>(),
    ) {
        let entries: Vec<EncryptedEnodeUrl> = dests
            .into_iter()
            .enumerate()
            .map(|(i, dest_address)| EncryptedEnodeUrl { dest_address, ciphertext: vec![i as u8; 17] })
            .collect();
        let msg = QueryEnodeMsg { encrypted_enode_urls: entries, version, timestamp };
        let bytes = msg.encode();
        let decoded = QueryEnodeMsg::decode(&bytes).expect("decode");
        prop_assert_eq!(decoded.version, msg.version);
        prop_assert_eq!(decoded.timestamp, msg.timestamp);
        prop_assert_eq!(decoded.encrypted_enode_urls.len(), msg.encrypted_enode_urls.len());
        for (a, b) in decoded.encrypted_enode_urls.iter().zip(msg.encrypted_enode_urls.iter()) {
            prop_assert_eq!(a.dest_address, b.dest_address);
            prop_assert_eq!(&a.ciphertext, &b.ciphertext);
        }
    }

    #[test]
    fn version_certificates_msg_roundtrips(versions in proptest::collection::vec(any::<u32>(), 0..16)) {
        let certs: Vec<VersionCertificate> = versions
            .into_iter()
            .map(|version| VersionCertificate { version, signature: Signature([7u8; 65]) })
            .collect();
        let bytes = VersionCertificatesMsg(certs.clone()).encode();
        let decoded = VersionCertificatesMsg::decode(&bytes).expect("decode");
        prop_assert_eq!(decoded.0.len(), certs.len());
        for (a, b) in decoded.0.iter().zip(certs.iter()) {
            prop_assert_eq!(a.version, b.version);
        }
    }
}

#[test]
fn signed_envelope_roundtrips_and_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FileSecp256k1Backend::load_or_create(&dir.path().join("validator.key")).unwrap();
    let address = backend.address();

    let inner = QueryEnodeMsg { encrypted_enode_urls: vec![], version: 11, timestamp: 22 }.encode();
    let envelope = Envelope::sign(MessageCode::QueryEnode, address, inner.clone(), |h| backend.sign_hash(h)).unwrap();
    let wire = envelope.encode();

    let decoded = Envelope::decode(&wire).unwrap();
    assert_eq!(decoded.code, MessageCode::QueryEnode);
    assert_eq!(decoded.address, Some(address));
    assert_eq!(decoded.msg, inner);
    decoded.verify().expect("signature verifies");
}

#[test]
fn unsigned_envelope_carries_no_address_or_signature_across_the_wire() {
    let inner = VersionCertificatesMsg(vec![]).encode();
    let envelope = Envelope::unsigned(MessageCode::VersionCertificates, inner);
    let decoded = Envelope::decode(&envelope.encode()).unwrap();
    assert!(decoded.address.is_none());
    assert!(decoded.signature.is_none());
}
