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

//! Per-source regossip cooldowns and self/peer dedup (§4.5).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::crypto::address::keccak256;
use crate::types::Address;

/// Regossip cooldown for both query-enode and version-certificate
/// sources (§4.5).
pub const REGOSSIP_COOLDOWN_SECS: u64 = 5 * 60;

/// Capacity of the bounded self/peer dedup caches.
const DEDUP_CACHE_CAPACITY: usize = 4096;

/// A bounded FIFO set: inserts evict the oldest entry once capacity is
/// exceeded. Used to dedup message payload hashes without unbounded
/// growth.
struct BoundedSet {
    order: VecDeque<[u8; 32]>,
    members: HashSet<[u8; 32]>,
    capacity: usize,
}

impl BoundedSet {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    fn contains(&self, item: &[u8; 32]) -> bool {
        self.members.contains(item)
    }

    fn insert(&mut self, item: [u8; 32]) {
        if self.members.contains(&item) {
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.order.push_back(item);
        self.members.insert(item);
    }
}

/// Coordinates per-source regossip cooldowns and self/peer dedup caches
/// (§4.5). Each map guards its own mutex; never acquired together.
pub struct GossipCoordinator {
    self_address: Address,
    last_query_enode_gossiped: Mutex<HashMap<Address, u64>>,
    last_version_certificates_gossiped: Mutex<HashMap<Address, u64>>,
    self_recent_messages: Mutex<BoundedSet>,
    processed_by_peer: Mutex<HashMap<Address, BoundedSet>>,
}

/// Hash of a payload used for self/peer dedup bookkeeping.
pub fn payload_hash(payload: &[u8]) -> [u8; 32] {
    keccak256(payload)
}

impl GossipCoordinator {
    /// Construct a coordinator for `self_address`.
    pub fn new(self_address: Address) -> Self {
        Self {
            self_address,
            last_query_enode_gossiped: Mutex::new(HashMap::new()),
            last_version_certificates_gossiped: Mutex::new(HashMap::new()),
            self_recent_messages: Mutex::new(BoundedSet::new(DEDUP_CACHE_CAPACITY)),
            processed_by_peer: Mutex::new(HashMap::new()),
        }
    }

    fn should_regossip(map: &Mutex<HashMap<Address, u64>>, source: Address, self_address: Address, now: u64) -> bool {
        if source == self_address {
            return true;
        }
        let guard = map.lock().expect("gossip map poisoned");
        match guard.get(&source) {
            Some(last) => now.saturating_sub(*last) >= REGOSSIP_COOLDOWN_SECS,
            None => true,
        }
    }

    /// `shouldRegossipQueryEnode(sourceAddress)`.
    pub fn should_regossip_query_enode(&self, source: Address, now: u64) -> bool {
        Self::should_regossip(&self.last_query_enode_gossiped, source, self.self_address, now)
    }

    /// Stamp `source` as gossiped at `now` for the query-enode protocol.
    pub fn mark_gossiped_query_enode(&self, source: Address, now: u64) {
        let mut guard = self.last_query_enode_gossiped.lock().expect("gossip map poisoned");
        guard.insert(source, now);
    }

    /// `shouldRegossipVersionCertificate(sourceAddress)`.
    pub fn should_regossip_version_certificate(&self, source: Address, now: u64) -> bool {
        Self::should_regossip(&self.last_version_certificates_gossiped, source, self.self_address, now)
    }

    /// Stamp `source` as gossiped at `now` for the version-certificate
    /// protocol.
    pub fn mark_gossiped_version_certificate(&self, source: Address, now: u64) {
        let mut guard = self
            .last_version_certificates_gossiped
            .lock()
            .expect("gossip map poisoned");
        guard.insert(source, now);
    }

    /// Prune cooldown entries for addresses no longer in the connection
    /// set, once their cooldown window has elapsed.
    pub fn prune(&self, keep_set: &HashSet<Address>, now: u64) {
        for map in [&self.last_query_enode_gossiped, &self.last_version_certificates_gossiped] {
            let mut guard = map.lock().expect("gossip map poisoned");
            guard.retain(|addr, last| keep_set.contains(addr) || now.saturating_sub(*last) < REGOSSIP_COOLDOWN_SECS);
        }
        let mut peer_guard = self.processed_by_peer.lock().expect("gossip map poisoned");
        peer_guard.retain(|addr, _| keep_set.contains(addr));
    }

    /// `markProcessedBySelf(payload)`.
    pub fn mark_processed_by_self(&self, payload: &[u8]) {
        let mut guard = self.self_recent_messages.lock().expect("gossip map poisoned");
        guard.insert(payload_hash(payload));
    }

    /// `checkProcessedBySelf(payload)`.
    pub fn check_processed_by_self(&self, payload: &[u8]) -> bool {
        let guard = self.self_recent_messages.lock().expect("gossip map poisoned");
        guard.contains(&payload_hash(payload))
    }

    /// `markProcessedByPeer(peerAddr, payload)`.
    pub fn mark_processed_by_peer(&self, peer: Address, payload: &[u8]) {
        let mut guard = self.processed_by_peer.lock().expect("gossip map poisoned");
        let set = guard.entry(peer).or_insert_with(|| BoundedSet::new(DEDUP_CACHE_CAPACITY));
        set.insert(payload_hash(payload));
    }

    /// `checkProcessedByPeer(peerAddr, payload)`.
    pub fn check_processed_by_peer(&self, peer: Address, payload: &[u8]) -> bool {
        let guard = self.processed_by_peer.lock().expect("gossip map poisoned");
        guard
            .get(&peer)
            .map(|set| set.contains(&payload_hash(payload)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_blocks_regossip_within_window_but_not_after() {
        let coordinator = GossipCoordinator::new(Address::ZERO);
        let source = Address([7u8; 20]);
        assert!(coordinator.should_regossip_query_enode(source, 0));
        coordinator.mark_gossiped_query_enode(source, 0);
        assert!(!coordinator.should_regossip_query_enode(source, 4 * 60));
        assert!(coordinator.should_regossip_query_enode(source, 6 * 60));
    }

    #[test]
    fn self_address_always_bypasses_cooldown() {
        let coordinator = GossipCoordinator::new(Address([1u8; 20]));
        let self_addr = Address([1u8; 20]);
        coordinator.mark_gossiped_version_certificate(self_addr, 0);
        assert!(coordinator.should_regossip_version_certificate(self_addr, 1));
    }

    #[test]
    fn self_dedup_marks_and_checks() {
        let coordinator = GossipCoordinator::new(Address::ZERO);
        let payload = b"hello";
        assert!(!coordinator.check_processed_by_self(payload));
        coordinator.mark_processed_by_self(payload);
        assert!(coordinator.check_processed_by_self(payload));
    }

    #[test]
    fn bounded_set_evicts_oldest() {
        let mut set = BoundedSet::new(2);
        set.insert([1u8; 32]);
        set.insert([2u8; 32]);
        set.insert([3u8; 32]);
        assert!(!set.contains(&[1u8; 32]));
        assert!(set.contains(&[2u8; 32]));
        assert!(set.contains(&[3u8; 32]));
    }
}
