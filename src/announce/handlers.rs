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

//! Inbound message handlers (§4.7): `handleQueryEnode`,
//! `handleVersionCertificates`, `handleEnodeCertificate`, and the shared
//! `upsertAndGossipVersionCertificateEntries` helper.
//!
//! Every handler is logged-and-continue on error (§7): the caller hands
//! the returned `AnnounceError` to the transport, which may penalize the
//! sender, but nothing here aborts the announce loop.

use tracing::warn;

use crate::announce::core::{now_secs, AnnounceCore, AnnounceError};
use crate::codec::{Envelope, MessageCode, QueryEnodeMsg, VersionCertificatesMsg};
use crate::crypto::domain::version_certificate_signing_bytes;
use crate::crypto::keystore::{recover_address, KeystoreError};
use crate::enode_cert::verify_enode_certificate;
use crate::tables::val_enode::ValEnodeUpsert;
use crate::types::{Address, EnodeUrl, Version, VersionCertificate};

/// Maximum encrypted entries accepted in a single `QueryEnodeMsg`,
/// relative to the connection-set size (§4.7 step 3, §8): defends
/// against DoS amplification.
const QUERY_ENODE_MAX_ENTRIES_MULTIPLE: usize = 2;

/// `handleQueryEnode(fromPeerAddr, payload)` (§4.7).
///
/// Spec note (§9 "Duplicate mark-processed calls"): the source marks
/// processed-by-peer/-by-self twice at the head of this handler; that is
/// a copy-paste artifact and is modeled here as a single idempotent mark.
pub async fn handle_query_enode(core: &AnnounceCore, from_peer: Address, payload: &[u8]) -> Result<(), AnnounceError> {
    core.gossip.mark_processed_by_peer(from_peer, payload);
    if core.gossip.check_processed_by_self(payload) {
        return Ok(());
    }

    let envelope = Envelope::decode(payload)?;
    if envelope.code != MessageCode::QueryEnode {
        return Err(AnnounceError::InvalidMessage);
    }
    envelope.verify()?;
    let sender = envelope.address.ok_or(AnnounceError::InvalidMessage)?;
    let conn_set = core.membership.validator_conn_set();
    if !conn_set.contains(&sender) {
        core.metrics.announce_invalid_envelope_total.inc();
        return Err(AnnounceError::Unauthorized);
    }

    let msg = QueryEnodeMsg::decode(&envelope.msg)?;

    let mut seen_dest = std::collections::HashSet::with_capacity(msg.encrypted_enode_urls.len());
    for entry in &msg.encrypted_enode_urls {
        if !seen_dest.insert(entry.dest_address) {
            core.metrics.announce_invalid_envelope_total.inc();
            return Err(AnnounceError::InvalidMessage);
        }
    }
    if msg.encrypted_enode_urls.len() > QUERY_ENODE_MAX_ENTRIES_MULTIPLE * conn_set.len().max(1) {
        core.metrics.announce_invalid_envelope_total.inc();
        return Err(AnnounceError::InvalidMessage);
    }

    if core.should_announce() {
        let self_addr = core.self_address();
        if let Some(mine) = msg.encrypted_enode_urls.iter().find(|e| e.dest_address == self_addr) {
            match core.keystore.decrypt(&mine.ciphertext) {
                Ok(plaintext) => match std::str::from_utf8(&plaintext).ok().and_then(|s| EnodeUrl::parse(s).ok()) {
                    Some(node) => {
                        core.answer_query_enode_msg(sender, node, msg.version).await?;
                    }
                    None => warn!(from = %sender, "query-enode: decrypted payload is not a valid enode url"),
                },
                Err(e) => warn!(from = %sender, err = ?e, "query-enode: decryption failed, skipping entry"),
            }
        }
    }

    core.gossip.mark_processed_by_self(payload);
    maybe_regossip_query_enode(core, sender, payload).await;
    Ok(())
}

async fn maybe_regossip_query_enode(core: &AnnounceCore, source: Address, payload: &[u8]) {
    let now = now_secs() as u64;
    if !core.gossip.should_regossip_query_enode(source, now) {
        core.metrics.announce_regossip_suppressed_total.inc();
        return;
    }
    if let Err(e) = core.transport.gossip(MessageCode::QueryEnode as u8, payload.to_vec()).await {
        warn!(err = ?e, "query-enode regossip failed");
        return;
    }
    core.gossip.mark_gossiped_query_enode(source, now);
}

/// `handleVersionCertificates(fromPeerAddr, payload)` (§4.7).
pub async fn handle_version_certificates(core: &AnnounceCore, from_peer: Address, payload: &[u8]) -> Result<(), AnnounceError> {
    core.gossip.mark_processed_by_peer(from_peer, payload);
    if core.gossip.check_processed_by_self(payload) {
        return Ok(());
    }
    core.gossip.mark_processed_by_self(payload);

    let envelope = Envelope::decode(payload)?;
    if envelope.code != MessageCode::VersionCertificates {
        return Err(AnnounceError::InvalidMessage);
    }

    let inner = VersionCertificatesMsg::decode(&envelope.msg)?;
    let conn_set = core.membership.validator_conn_set();

    let mut valid = Vec::with_capacity(inner.0.len());
    let mut seen = std::collections::HashSet::new();
    for cert in inner.0 {
        let signing_bytes = version_certificate_signing_bytes(cert.version);
        let hash = crate::crypto::address::keccak256(&signing_bytes);
        let (address, public_key) = match recover_address(&hash, &cert.signature) {
            Ok(v) => v,
            Err(KeystoreError::BadSignature) => continue,
            Err(_) => continue,
        };
        if !conn_set.contains(&address) {
            continue;
        }
        if !seen.insert(address) {
            continue;
        }
        valid.push((address, public_key, cert));
    }

    upsert_and_gossip_version_certificate_entries(core, &valid.iter().map(|(a, _, c)| (*a, c.clone())).collect::<Vec<_>>()).await?;

    // Public keys recovered here are the only source of truth for
    // encrypting future query-enode traffic to these validators, but we
    // only save them if this node itself should be saving URLs (§4.7).
    if core.should_announce() {
        let hk_entries: Vec<_> = valid
            .iter()
            .map(|(addr, pk, cert)| (*addr, Some(pk.clone()), cert.version))
            .collect();
        if !hk_entries.is_empty() {
            core.val_enode_table.upsert_highest_known_version(&hk_entries)?;
        }
    }

    Ok(())
}

/// `upsertAndGossipVersionCertificateEntries(entries)` (§4.7): shared by
/// the inbound handler and `setAndShareUpdatedAnnounceVersion` (§4.6).
pub async fn upsert_and_gossip_version_certificate_entries(
    core: &AnnounceCore,
    entries: &[(Address, VersionCertificate)],
) -> Result<(), AnnounceError> {
    let new_entries = core.version_certificate_table.upsert(entries)?;
    if new_entries.is_empty() {
        return Ok(());
    }

    let self_addr = core.self_address();
    let now = now_secs() as u64;
    let mut to_gossip = Vec::with_capacity(new_entries.len());
    for (address, cert) in new_entries {
        if address != self_addr && !core.gossip.should_regossip_version_certificate(address, now) {
            core.metrics.announce_regossip_suppressed_total.inc();
            continue;
        }
        core.gossip.mark_gossiped_version_certificate(address, now);
        to_gossip.push(cert);
    }

    if to_gossip.is_empty() {
        return Ok(());
    }

    let inner = VersionCertificatesMsg(to_gossip).encode();
    let envelope = Envelope::unsigned(MessageCode::VersionCertificates, inner);
    let wire = envelope.encode();
    core.transport.gossip(MessageCode::VersionCertificates as u8, wire.clone()).await?;
    core.gossip.mark_processed_by_self(&wire);
    core.metrics.announce_version_certificates_sent_total.inc();
    Ok(())
}

/// `handleEnodeCertificate(peer, payload)` (§4.7).
pub async fn handle_enode_certificate(core: &AnnounceCore, _from_peer: Address, payload: &[u8]) -> Result<(), AnnounceError> {
    let envelope = Envelope::decode(payload)?;
    if envelope.code != MessageCode::EnodeCertificate {
        return Err(AnnounceError::InvalidMessage);
    }
    let (address, node, version) = verify_enode_certificate(&envelope)?;

    if core.should_announce() {
        if !core.membership.validator_conn_set().contains(&address) {
            return Err(AnnounceError::Unauthorized);
        }
        core.val_enode_table.upsert_version_and_enode(&[ValEnodeUpsert { address, node, version }])?;
    }

    if core.membership.is_proxied_validator() {
        if let Err(e) = core.proxy.send_val_enodes_share_msg_to_all_proxies().await {
            warn!(err = ?e, "enode-certificate: failed to share val-enodes with proxies");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keystore::{FileSecp256k1Backend, Keystore, SignerBackend};
    use crate::membership::StaticSetProvider;
    use crate::monitoring::metrics::Metrics;
    use crate::proxy::NoProxy;
    use crate::tables::{ValEnodeTable, VersionCertificateTable};
    use crate::transport::MockTransport;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn enode(byte: u8) -> EnodeUrl {
        EnodeUrl::parse(&format!("enode://{}@10.0.0.{byte}:30303", hex::encode([byte; 64]))).unwrap()
    }

    fn make_core(keystore_dir: &std::path::Path, conn_set: HashSet<Address>) -> AnnounceCore {
        let db = sled::open(keystore_dir.join("db")).unwrap();
        let val_enode_table = ValEnodeTable::open(&db).unwrap();
        let version_certificate_table = VersionCertificateTable::open(&db).unwrap();
        let keystore = Arc::new(Keystore::open(keystore_dir.to_str().unwrap()).unwrap());
        let membership = Arc::new(StaticSetProvider::standalone(keystore.address(), conn_set));
        AnnounceCore::new(
            keystore,
            membership,
            Arc::new(NoProxy),
            Arc::new(MockTransport::new(enode(1))),
            val_enode_table,
            version_certificate_table,
            Arc::new(Metrics::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn version_certificate_regossip_dedups_and_advances() {
        let signer_dir = tempfile::tempdir().unwrap();
        let signer = FileSecp256k1Backend::load_or_create(&signer_dir.path().join("validator.key")).unwrap();
        let v2_addr = signer.address();

        let self_dir = tempfile::tempdir().unwrap();
        let mut conn_set = HashSet::new();
        conn_set.insert(v2_addr);
        let core = make_core(self_dir.path(), conn_set);

        let signing_bytes = version_certificate_signing_bytes(100);
        let hash = crate::crypto::address::keccak256(&signing_bytes);
        let sig = signer.sign_hash(&hash).unwrap();
        let cert = VersionCertificate { version: 100, signature: sig };

        upsert_and_gossip_version_certificate_entries(&core, &[(v2_addr, cert.clone())]).await.unwrap();
        assert_eq!(core.version_certificate_table.get_all().unwrap()[&v2_addr].version, 100);

        // Replaying the same version must not re-advance the stored
        // certificate (§8 idempotence).
        upsert_and_gossip_version_certificate_entries(&core, &[(v2_addr, cert)]).await.unwrap();
        assert_eq!(core.version_certificate_table.get_all().unwrap()[&v2_addr].version, 100);
    }

    #[tokio::test]
    async fn query_enode_rejects_duplicate_dest_addresses() {
        let self_dir = tempfile::tempdir().unwrap();
        let core = make_core(self_dir.path(), HashSet::new());

        let dup = Address([5u8; 20]);
        let msg = QueryEnodeMsg {
            encrypted_enode_urls: vec![
                crate::codec::EncryptedEnodeUrl { dest_address: dup, ciphertext: vec![1] },
                crate::codec::EncryptedEnodeUrl { dest_address: dup, ciphertext: vec![2] },
            ],
            version: 1,
            timestamp: 1,
        }
        .encode();
        let sender = core.keystore.clone();
        let envelope = Envelope::sign(MessageCode::QueryEnode, sender.address(), msg, |h| sender.sign_hash(h)).unwrap();

        // sender is not in the (empty) connection set, so this fails
        // unauthorized before the duplicate-entry check is even reached;
        // build a core where the sender is a member instead.
        let mut conn_set = HashSet::new();
        conn_set.insert(core.keystore.address());
        let core = make_core(self_dir.path(), conn_set);
        let result = handle_query_enode(&core, Address([9u8; 20]), &envelope.encode()).await;
        assert!(matches!(result, Err(AnnounceError::InvalidMessage)));
    }
}
