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

//! Proxy topology surface consumed by a proxied validator (§5):
//! `GetValidatorProxyAssignments`, `GetProxiesAndValAssignments`,
//! `SendForwardMsg`, `SendValEnodesShareMsgToAllProxies`.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::types::{Address, EnodeUrl, NodeId};

/// Proxy engine errors.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No proxy is assigned for the requested destination.
    #[error("no proxy assignment")]
    NoAssignment,
    /// The underlying transport call failed.
    #[error("transport")]
    Transport,
}

/// One payload addressed to a specific proxy, used by `SendForwardMsg` to
/// carry proxy-specific variants of the same logical message (e.g. one
/// enode certificate per proxy, §4.4 step 3).
pub type ProxySpecificPayloads = HashMap<NodeId, Vec<u8>>;

/// Proxy topology consumed when this node is a proxied validator (§5).
pub trait ProxyEngine: Send + Sync {
    /// `GetValidatorProxyAssignments()`: the proxy node each connection-set
    /// validator address should be reached through.
    fn get_validator_proxy_assignments(&self) -> HashMap<Address, EnodeUrl>;

    /// `GetProxiesAndValAssignments()`: the peered proxy node ids, plus the
    /// validator-address -> proxy-node-id assignment table.
    fn get_proxies_and_val_assignments(&self) -> (Vec<NodeId>, HashMap<Address, NodeId>);

    /// Externally reachable URL of every currently peered proxy, keyed by
    /// its node id. Used to bind one enode certificate per proxy (§4.4).
    fn proxy_urls(&self) -> HashMap<NodeId, EnodeUrl>;

    /// `SendForwardMsg(ids, destAddresses, code, payload, proxySpecificPayloads)`:
    /// ask the named proxies (`ids`) to forward `payload` (or their entry
    /// in `proxy_specific_payloads`, if present) on to `dest_addresses`.
    fn send_forward_msg(
        &self,
        ids: &[NodeId],
        dest_addresses: &[Address],
        code: u8,
        payload: Vec<u8>,
        proxy_specific_payloads: ProxySpecificPayloads,
    ) -> BoxFuture<'_, Result<(), ProxyError>>;

    /// `SendValEnodesShareMsgToAllProxies()`.
    fn send_val_enodes_share_msg_to_all_proxies(&self) -> BoxFuture<'_, Result<(), ProxyError>>;
}

/// Standalone-validator default: this node has no proxies, so every call
/// is either empty or an error.
pub struct NoProxy;

impl ProxyEngine for NoProxy {
    fn get_validator_proxy_assignments(&self) -> HashMap<Address, EnodeUrl> {
        HashMap::new()
    }

    fn get_proxies_and_val_assignments(&self) -> (Vec<NodeId>, HashMap<Address, NodeId>) {
        (Vec::new(), HashMap::new())
    }

    fn proxy_urls(&self) -> HashMap<NodeId, EnodeUrl> {
        HashMap::new()
    }

    fn send_forward_msg(
        &self,
        _ids: &[NodeId],
        _dest_addresses: &[Address],
        _code: u8,
        _payload: Vec<u8>,
        _proxy_specific_payloads: ProxySpecificPayloads,
    ) -> BoxFuture<'_, Result<(), ProxyError>> {
        Box::pin(async { Err(ProxyError::NoAssignment) })
    }

    fn send_val_enodes_share_msg_to_all_proxies(&self) -> BoxFuture<'_, Result<(), ProxyError>> {
        Box::pin(async { Ok(()) })
    }
}

/// A single recorded `SendForwardMsg` call, kept for test assertions.
#[derive(Clone, Debug)]
pub struct RecordedForward {
    /// Proxy node ids targeted.
    pub ids: Vec<NodeId>,
    /// Validator addresses the proxy was asked to forward to.
    pub dest_addresses: Vec<Address>,
    /// Envelope message code.
    pub code: u8,
    /// Default payload used for proxies with no specific override.
    pub payload: Vec<u8>,
    /// Per-proxy payload overrides.
    pub proxy_specific_payloads: ProxySpecificPayloads,
}

/// Fixed proxy-id -> assignment table for a proxied validator, with a
/// recorded call log. Sufficient to exercise every proxy branch of the
/// announce control loop and inbound handlers in tests.
pub struct StaticProxyEngine {
    proxy_urls: HashMap<NodeId, EnodeUrl>,
    validator_assignments: HashMap<Address, NodeId>,
    forwards: Mutex<Vec<RecordedForward>>,
    share_calls: Mutex<u32>,
}

impl StaticProxyEngine {
    /// Construct a proxy table from `proxy_urls` (proxy node id -> its
    /// externally reachable enode) and `validator_assignments` (validator
    /// address -> the proxy node id serving it).
    pub fn new(proxy_urls: HashMap<NodeId, EnodeUrl>, validator_assignments: HashMap<Address, NodeId>) -> Self {
        Self {
            proxy_urls,
            validator_assignments,
            forwards: Mutex::new(Vec::new()),
            share_calls: Mutex::new(0),
        }
    }

    /// Every `SendForwardMsg` call recorded so far, in order.
    pub fn recorded_forwards(&self) -> Vec<RecordedForward> {
        self.forwards.lock().expect("proxy engine poisoned").clone()
    }

    /// Count of `SendValEnodesShareMsgToAllProxies` calls recorded so far.
    pub fn share_call_count(&self) -> u32 {
        *self.share_calls.lock().expect("proxy engine poisoned")
    }
}

impl ProxyEngine for StaticProxyEngine {
    fn get_validator_proxy_assignments(&self) -> HashMap<Address, EnodeUrl> {
        self.validator_assignments
            .iter()
            .filter_map(|(addr, proxy_id)| self.proxy_urls.get(proxy_id).map(|url| (*addr, url.clone())))
            .collect()
    }

    fn get_proxies_and_val_assignments(&self) -> (Vec<NodeId>, HashMap<Address, NodeId>) {
        (self.proxy_urls.keys().copied().collect(), self.validator_assignments.clone())
    }

    fn proxy_urls(&self) -> HashMap<NodeId, EnodeUrl> {
        self.proxy_urls.clone()
    }

    fn send_forward_msg(
        &self,
        ids: &[NodeId],
        dest_addresses: &[Address],
        code: u8,
        payload: Vec<u8>,
        proxy_specific_payloads: ProxySpecificPayloads,
    ) -> BoxFuture<'_, Result<(), ProxyError>> {
        self.forwards.lock().expect("proxy engine poisoned").push(RecordedForward {
            ids: ids.to_vec(),
            dest_addresses: dest_addresses.to_vec(),
            code,
            payload,
            proxy_specific_payloads,
        });
        Box::pin(async { Ok(()) })
    }

    fn send_val_enodes_share_msg_to_all_proxies(&self) -> BoxFuture<'_, Result<(), ProxyError>> {
        *self.share_calls.lock().expect("proxy engine poisoned") += 1;
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enode(byte: u8) -> EnodeUrl {
        EnodeUrl::parse(&format!("enode://{}@10.0.0.{byte}:30303", hex::encode([byte; 64]))).unwrap()
    }

    #[test]
    fn assignment_resolves_through_proxy_table() {
        let proxy_id = NodeId([1u8; 32]);
        let validator = Address([2u8; 20]);
        let mut proxy_urls = HashMap::new();
        proxy_urls.insert(proxy_id, enode(9));
        let mut assignments = HashMap::new();
        assignments.insert(validator, proxy_id);

        let engine = StaticProxyEngine::new(proxy_urls, assignments);
        let resolved = engine.get_validator_proxy_assignments();
        assert_eq!(resolved.get(&validator), Some(&enode(9)));
    }

    #[test]
    fn no_proxy_rejects_forward() {
        let engine = NoProxy;
        let result = futures::executor::block_on(engine.send_forward_msg(&[], &[], 0, vec![], HashMap::new()));
        assert!(matches!(result, Err(ProxyError::NoAssignment)));
    }
}
