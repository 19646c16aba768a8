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

//! The validator announce subsystem of an Istanbul-style BFT consensus
//! layer: a gossip protocol letting validators discover each other's
//! `enode` endpoints without leaking them outside the validator
//! connection set.
//!
//! This crate provides:
//! - The three announce message kinds (`QueryEnodeMsg`,
//!   `VersionCertificatesMsg`, `EnodeCertificateMsg`) over a shared
//!   signed envelope, deterministically RLP-encoded (`codec`)
//! - ECIES-encrypted enode delivery and domain-separated version-
//!   certificate signing over secp256k1/Keccak256 (`crypto`)
//! - Durable per-validator state (`tables`) and per-source regossip
//!   cooldown/dedup bookkeeping (`gossip`)
//! - The announce control loop and inbound handlers (`announce`), driven
//!   by an explicit shared context rather than global mutable state
//! - A libp2p-gossipsub transport, pluggable validator membership and
//!   proxy-topology collaborators (`transport`, `membership`, `proxy`)
//! - Monitoring via Prometheus metrics and structured JSON logging

/// The announce control loop, inbound handlers, and shared context.
pub mod announce;
/// Deterministic wire encoding for the three announce message kinds.
pub mod codec;
/// Node configuration (TOML).
pub mod config;
/// Signing identity, address derivation, ECIES, and domain separation.
pub mod crypto;
/// The enode-certificate map and its single-shared-version invariant.
pub mod enode_cert;
/// Per-source regossip cooldowns and self/peer dedup.
pub mod gossip;
/// Validator connection-set membership.
pub mod membership;
/// Observability (metrics, structured logging helpers).
pub mod monitoring;
/// P2P networking stack (libp2p transport identity).
pub mod networking;
/// Proxy topology for proxied validators.
pub mod proxy;
/// Durable val-enode and version-certificate tables.
pub mod tables;
/// The transport surface the announce subsystem depends on.
pub mod transport;
/// Core data model: addresses, enode URLs, versions, table rows.
pub mod types;
