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

//! `AnnounceCore`: the shared context injected into the control loop and
//! inbound handlers (§9 "Global mutable state → explicit context"), plus
//! the two version-update operations driven by the loop.

use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::codec::{CodecError, EncryptedEnodeUrl, Envelope, MessageCode, QueryEnodeMsg};
use crate::crypto::address::keccak256;
use crate::crypto::domain::version_certificate_signing_bytes;
use crate::crypto::ecies;
use crate::crypto::keystore::{FileSecp256k1Backend, Keystore, KeystoreError};
use crate::enode_cert::{generate_enode_certificate_msgs, EnodeCertError, EnodeCertificateMsgMap};
use crate::gossip::GossipCoordinator;
use crate::membership::ValidatorSetProvider;
use crate::monitoring::metrics::Metrics;
use crate::proxy::{ProxyEngine, ProxyError, ProxySpecificPayloads};
use crate::tables::val_enode::ValEnodeUpsert;
use crate::tables::{val_enode::ValEnodeTableError, version_certificate::VersionCertificateTableError, ValEnodeTable, VersionCertificateTable};
use crate::transport::{AnnounceTransport, TransportError};
use crate::types::{Address, EnodeUrl, NodeId, Version, VersionCertificate};

/// Error kinds named in §7: `kStorage`, `kCodec`, `kCrypto`,
/// `kUnauthorized`, `kInvalidMessage`, `kInvalidCertMap`.
#[derive(Debug, Error)]
pub enum AnnounceError {
    /// Val-enode table I/O failure.
    #[error(transparent)]
    ValEnodeStorage(#[from] ValEnodeTableError),
    /// Version-certificate table I/O failure.
    #[error(transparent)]
    VersionCertStorage(#[from] VersionCertificateTableError),
    /// Message encode/decode failure.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Signing, verification, or ECIES failure.
    #[error(transparent)]
    Crypto(#[from] KeystoreError),
    /// Enode-certificate map invariant violation.
    #[error(transparent)]
    EnodeCert(#[from] EnodeCertError),
    /// Sender is not a member of the validator connection set.
    #[error("sender not in validator connection set")]
    Unauthorized,
    /// Message failed a validation bound (duplicate entry, size cap).
    #[error("message failed validation bounds")]
    InvalidMessage,
    /// Outbound transport call failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Proxy engine call failed.
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

/// Seconds since the Unix epoch, truncated to 32 bits (§9 "Time source":
/// this wraps in year 2106, matching the wire `Version` field width).
pub fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

/// Shared context for the announce control loop and inbound handlers: owns
/// the tables, the gossip cooldown/dedup state, the enode-certificate map,
/// and references to the three injected collaborators (transport,
/// membership, proxy).
pub struct AnnounceCore {
    /// This validator's signing identity.
    pub keystore: Arc<Keystore<FileSecp256k1Backend>>,
    /// Consensus membership collaborator.
    pub membership: Arc<dyn ValidatorSetProvider>,
    /// Proxy topology collaborator (no-op `NoProxy` for standalone validators).
    pub proxy: Arc<dyn ProxyEngine>,
    /// Gossip/Multicast/FindPeers/SelfNode transport.
    pub transport: Arc<dyn AnnounceTransport>,
    /// Durable val-enode table.
    pub val_enode_table: ValEnodeTable,
    /// Durable version-certificate table.
    pub version_certificate_table: VersionCertificateTable,
    /// Per-source regossip cooldowns and self/peer dedup.
    pub gossip: GossipCoordinator,
    /// This node's own enode-certificate map.
    pub enode_certs: EnodeCertificateMsgMap,
    /// Currently advertised announce version. The loop is the sole writer.
    pub announce_version: RwLock<Version>,
    /// Metrics sink.
    pub metrics: Arc<Metrics>,
}

impl AnnounceCore {
    /// Construct a fresh context. `announce_version` starts at 0 so the
    /// first `updateAnnounceVersion` call always advances it.
    pub fn new(
        keystore: Arc<Keystore<FileSecp256k1Backend>>,
        membership: Arc<dyn ValidatorSetProvider>,
        proxy: Arc<dyn ProxyEngine>,
        transport: Arc<dyn AnnounceTransport>,
        val_enode_table: ValEnodeTable,
        version_certificate_table: VersionCertificateTable,
        metrics: Arc<Metrics>,
    ) -> Self {
        let self_address = keystore.address();
        Self {
            keystore,
            membership,
            proxy,
            transport,
            val_enode_table,
            version_certificate_table,
            gossip: GossipCoordinator::new(self_address),
            enode_certs: EnodeCertificateMsgMap::new(),
            announce_version: RwLock::new(0),
            metrics,
        }
    }

    /// This process's signing address (always the validator's own
    /// address; for a proxied validator the proxy forwards on its
    /// behalf but never signs).
    pub fn self_address(&self) -> Address {
        self.keystore.address()
    }

    /// `ValidatorConnSet()[selfAddress]`.
    pub fn should_announce(&self) -> bool {
        self.membership.validator_conn_set().contains(&self.self_address())
    }

    /// Current stored announce version.
    pub fn announce_version(&self) -> Version {
        *self.announce_version.read().expect("announce version lock poisoned")
    }

    /// `updateAnnounceVersion`: advance to `now()` if it strictly exceeds
    /// the stored version, sharing the update on success.
    pub async fn update_announce_version(&self) -> Result<(), AnnounceError> {
        let candidate = now_secs();
        if candidate <= self.announce_version() {
            return Ok(());
        }
        self.set_and_share_updated_announce_version(candidate).await?;
        *self.announce_version.write().expect("announce version lock poisoned") = candidate;
        self.metrics.announce_version.set(candidate as i64);
        Ok(())
    }

    /// `setAndShareUpdatedAnnounceVersion(v)` (§4.6).
    pub async fn set_and_share_updated_announce_version(&self, v: Version) -> Result<(), AnnounceError> {
        if !self.should_announce() {
            return Ok(());
        }

        let self_addr = self.self_address();
        let urls_by_node: Vec<(NodeId, EnodeUrl)> = if self.membership.is_proxied_validator() {
            self.proxy.proxy_urls().into_iter().collect()
        } else {
            let node = self.transport.self_node();
            vec![(node.node_id(), node)]
        };

        let keystore = self.keystore.clone();
        let cert_map = generate_enode_certificate_msgs(self_addr, v, &urls_by_node, move |h| keystore.sign_hash(h))?;
        if !self.enode_certs.set(cert_map.clone())? {
            return Ok(());
        }
        self.metrics.announce_enode_certs_sent_total.inc_by(cert_map.len() as u64);

        let conn_set = self.membership.validator_conn_set();
        let dest_addresses: Vec<Address> = conn_set.iter().copied().collect();

        if self.membership.is_proxied_validator() {
            let mut proxy_specific = ProxySpecificPayloads::new();
            let mut proxy_ids = Vec::with_capacity(cert_map.len());
            for (node_id, envelope) in &cert_map {
                proxy_ids.push(*node_id);
                proxy_specific.insert(*node_id, envelope.encode());
            }
            self.proxy
                .send_forward_msg(&proxy_ids, &dest_addresses, MessageCode::EnodeCertificate as u8, Vec::new(), proxy_specific)
                .await?;
        } else if let Some(envelope) = cert_map.values().next() {
            let payload = envelope.encode();
            let entries = self.val_enode_table.get_val_enodes(Some(&dest_addresses))?;
            let targets: Vec<NodeId> = entries.values().filter_map(|e| e.node.as_ref().map(|n| n.node_id())).collect();
            if !targets.is_empty() {
                self.transport.multicast(&targets, MessageCode::EnodeCertificate as u8, payload, false).await?;
            }
        }

        let signing_bytes = version_certificate_signing_bytes(v);
        let hash = keccak256(&signing_bytes);
        let signature = self.keystore.sign_hash(&hash)?;
        let cert = VersionCertificate { version: v, signature };
        crate::announce::handlers::upsert_and_gossip_version_certificate_entries(self, &[(self_addr, cert)]).await?;

        Ok(())
    }

    /// Exponential retry-backoff threshold in seconds for an entry with
    /// `attempts` unanswered query attempts (§4.6, §8): capped at attempt
    /// exponent 5 (≈ 38 minutes).
    fn retry_backoff_threshold_secs(attempts: u32) -> u64 {
        let exponent = attempts.saturating_sub(1).min(5) as i32;
        (5.0_f64 * 1.5_f64.powi(exponent) * 60.0) as u64
    }

    /// `generateAndGossipQueryEnode(version, enforceRetryBackoff)`.
    pub async fn generate_and_gossip_query_enode(&self, version: Version, enforce_retry_backoff: bool) -> Result<(), AnnounceError> {
        let self_addr = self.self_address();
        let entries = self.val_enode_table.get_val_enodes(None)?;
        let now = now_secs() as u64;

        let mut attempted = Vec::new();
        let mut encrypted = Vec::new();

        for (addr, entry) in &entries {
            if *addr == self_addr {
                continue;
            }
            if entry.version == entry.highest_known_version {
                continue;
            }
            let Some(public_key) = &entry.public_key else {
                continue;
            };
            if enforce_retry_backoff
                && entry.num_query_attempts_for_hk_version > 0
                && now.saturating_sub(entry.last_query_timestamp) < Self::retry_backoff_threshold_secs(entry.num_query_attempts_for_hk_version)
            {
                continue;
            }

            let advertised = if self.membership.is_proxied_validator() {
                match self.proxy.get_validator_proxy_assignments().get(addr) {
                    Some(url) => url.clone(),
                    None => continue,
                }
            } else {
                self.transport.self_node()
            };

            let Ok(ciphertext) = ecies::encrypt(public_key, advertised.to_string().as_bytes()) else {
                continue;
            };
            encrypted.push(EncryptedEnodeUrl { dest_address: *addr, ciphertext });
            attempted.push(*addr);
        }

        if encrypted.is_empty() {
            return Ok(());
        }

        let msg = QueryEnodeMsg { encrypted_enode_urls: encrypted, version, timestamp: now_secs() }.encode();
        let keystore = self.keystore.clone();
        let envelope = Envelope::sign(MessageCode::QueryEnode, self_addr, msg, move |h| keystore.sign_hash(h))?;
        let wire = envelope.encode();
        self.transport.gossip(MessageCode::QueryEnode as u8, wire.clone()).await?;
        self.gossip.mark_processed_by_self(&wire);
        self.val_enode_table.update_query_enode_stats(&attempted, now)?;
        self.metrics.announce_query_enode_sent_total.inc();
        Ok(())
    }

    /// `answerQueryEnodeMsg(address, node, version)`.
    pub async fn answer_query_enode_msg(&self, address: Address, node: EnodeUrl, version: Version) -> Result<(), AnnounceError> {
        if !self.membership.is_proxied_validator() {
            let node_id = node.node_id();
            let connected = self.transport.find_peers(Some(&[node_id])).await;
            if connected.contains(&node_id) {
                let (_, cert_map) = self.enode_certs.snapshot();
                if let Some(envelope) = cert_map.values().next() {
                    self.transport
                        .multicast(&[node_id], MessageCode::EnodeCertificate as u8, envelope.encode(), false)
                        .await?;
                }
            }
        }
        self.val_enode_table.upsert_version_and_enode(&[ValEnodeUpsert { address, node, version }])?;
        Ok(())
    }
}
