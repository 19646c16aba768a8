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

//! End-to-end scenarios across two `AnnounceCore`s wired with `MockTransport`
//! (spec §8): cold-start discovery via query-enode, and version-certificate
//! propagation advancing the val-enode table's highest-known-version.

use std::collections::HashSet;
use std::sync::Arc;

use istanbul_announce::announce::core::AnnounceCore;
use istanbul_announce::announce::handlers::{handle_query_enode, handle_version_certificates};
use istanbul_announce::crypto::domain::version_certificate_signing_bytes;
use istanbul_announce::crypto::keystore::{Keystore, SignerBackend};
use istanbul_announce::membership::StaticSetProvider;
use istanbul_announce::monitoring::metrics::Metrics;
use istanbul_announce::proxy::NoProxy;
use istanbul_announce::tables::{ValEnodeTable, VersionCertificateTable};
use istanbul_announce::transport::MockTransport;
use istanbul_announce::types::{Address, EnodeUrl, VersionCertificate};

fn enode(byte: u8) -> EnodeUrl {
    EnodeUrl::parse(&format!("enode://{}@10.0.0.{byte}:30303", hex::encode([byte; 64]))).unwrap()
}

fn build_core(
    root: &std::path::Path,
    name: &str,
    conn_set: HashSet<Address>,
    self_node: EnodeUrl,
) -> (AnnounceCore, Arc<MockTransport>) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    let db = sled::open(dir.join("db")).unwrap();
    let val_enode_table = ValEnodeTable::open(&db).unwrap();
    let version_certificate_table = VersionCertificateTable::open(&db).unwrap();
    let keystore = Arc::new(Keystore::open(dir.to_str().unwrap()).unwrap());
    let membership = Arc::new(StaticSetProvider::standalone(keystore.address(), conn_set));
    let transport = Arc::new(MockTransport::new(self_node));
    let core = AnnounceCore::new(
        keystore,
        membership,
        Arc::new(NoProxy),
        transport.clone(),
        val_enode_table,
        version_certificate_table,
        Arc::new(Metrics::new().unwrap()),
    );
    (core, transport)
}

#[tokio::test]
async fn cold_start_query_enode_is_answered_and_learned() {
    let root = tempfile::tempdir().unwrap();

    // Probe B first to learn its address and public key, then tear it
    // down; the real B below reloads the same persisted key.
    let (b_probe, _) = build_core(root.path(), "b", HashSet::new(), enode(2));
    let b_addr = b_probe.self_address();
    let b_pubkey = b_probe.keystore.public_key();
    drop(b_probe);

    let mut a_conn_set = HashSet::new();
    a_conn_set.insert(b_addr);
    let (a, a_transport) = build_core(root.path(), "a", a_conn_set, enode(1));
    let a_addr = a.self_address();

    // A already knows of B (e.g. from a prior version certificate): B's
    // public key is on file and A has not yet learned B's enode at the
    // latest known version.
    a.val_enode_table
        .upsert_highest_known_version(&[(b_addr, Some(b_pubkey), 1)])
        .unwrap();

    // B must have both itself and A in its connection set to answer.
    let mut b_conn_set = HashSet::new();
    b_conn_set.insert(a_addr);
    b_conn_set.insert(b_addr);
    let (b, _) = build_core(root.path(), "b", b_conn_set, enode(2));

    a.generate_and_gossip_query_enode(1, false).await.unwrap();

    // Feed A's gossiped query-enode payload to B as an inbound message.
    let payload = {
        let broadcasts = a_transport.broadcasts.lock().unwrap();
        broadcasts.last().expect("A should have gossiped a query-enode message").1.clone()
    };

    handle_query_enode(&b, a_addr, &payload).await.unwrap();

    // B decrypted A's enode url out of the query and learned it.
    let b_entries = b.val_enode_table.get_val_enodes(Some(&[a_addr])).unwrap();
    assert!(b_entries.contains_key(&a_addr), "B should have learned A's enode");
}

#[tokio::test]
async fn version_certificate_gossip_advances_highest_known_version() {
    let root = tempfile::tempdir().unwrap();

    let signer_dir = root.path().join("signer");
    std::fs::create_dir_all(&signer_dir).unwrap();
    let signer = istanbul_announce::crypto::keystore::FileSecp256k1Backend::load_or_create(&signer_dir.join("validator.key")).unwrap();
    let signer_addr = signer.address();

    let mut conn_set = HashSet::new();
    conn_set.insert(signer_addr);
    let (node, _) = build_core(root.path(), "node", conn_set, enode(9));

    let signing_bytes = version_certificate_signing_bytes(42);
    let hash = istanbul_announce::crypto::address::keccak256(&signing_bytes);
    let signature = signer.sign_hash(&hash).unwrap();
    let cert = VersionCertificate { version: 42, signature };

    let inner = istanbul_announce::codec::VersionCertificatesMsg(vec![cert]).encode();
    let envelope = istanbul_announce::codec::Envelope::unsigned(istanbul_announce::codec::MessageCode::VersionCertificates, inner);
    let wire = envelope.encode();

    handle_version_certificates(&node, signer_addr, &wire).await.unwrap();

    let entries = node.val_enode_table.get_val_enodes(Some(&[signer_addr])).unwrap();
    let entry = entries.get(&signer_addr).expect("entry created for the cert's signer");
    assert_eq!(entry.highest_known_version, 42);
    assert!(entry.public_key.is_some(), "recovered public key should be stored");
}
