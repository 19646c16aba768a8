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

//! Prometheus metrics for the announce subsystem and its transport.

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Connected transport peers gauge.
    pub p2p_peers: IntGauge,

    /// This node's currently advertised announce version.
    pub announce_version: IntGauge,
    /// Query-enode messages sent.
    pub announce_query_enode_sent_total: IntCounter,
    /// Version-certificate messages sent.
    pub announce_version_certificates_sent_total: IntCounter,
    /// Enode-certificate messages sent.
    pub announce_enode_certs_sent_total: IntCounter,
    /// Regossips suppressed by the per-source cooldown.
    pub announce_regossip_suppressed_total: IntCounter,
    /// Envelopes that failed to decode or verify.
    pub announce_invalid_envelope_total: IntCounter,
    /// Current row count of the val-enode table.
    pub val_enode_table_size: IntGauge,
    /// Current row count of the version-certificate table.
    pub version_certificate_table_size: IntGauge,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let p2p_peers = IntGauge::new("istanbul_announce_p2p_peers", "Connected transport peers")
            .map_err(|_| MetricsError::Prom)?;

        let announce_version = IntGauge::new("istanbul_announce_version", "Currently advertised announce version")
            .map_err(|_| MetricsError::Prom)?;
        let announce_query_enode_sent_total = IntCounter::new(
            "istanbul_announce_query_enode_sent_total",
            "Query-enode messages sent",
        )
        .map_err(|_| MetricsError::Prom)?;
        let announce_version_certificates_sent_total = IntCounter::new(
            "istanbul_announce_version_certificates_sent_total",
            "Version-certificate messages sent",
        )
        .map_err(|_| MetricsError::Prom)?;
        let announce_enode_certs_sent_total = IntCounter::new(
            "istanbul_announce_enode_certs_sent_total",
            "Enode-certificate messages sent",
        )
        .map_err(|_| MetricsError::Prom)?;
        let announce_regossip_suppressed_total = IntCounter::new(
            "istanbul_announce_regossip_suppressed_total",
            "Regossips suppressed by the per-source cooldown",
        )
        .map_err(|_| MetricsError::Prom)?;
        let announce_invalid_envelope_total = IntCounter::new(
            "istanbul_announce_invalid_envelope_total",
            "Envelopes that failed to decode or verify",
        )
        .map_err(|_| MetricsError::Prom)?;
        let val_enode_table_size = IntGauge::new("istanbul_announce_val_enode_table_size", "Val-enode table row count")
            .map_err(|_| MetricsError::Prom)?;
        let version_certificate_table_size = IntGauge::new(
            "istanbul_announce_version_certificate_table_size",
            "Version-certificate table row count",
        )
        .map_err(|_| MetricsError::Prom)?;

        registry
            .register(Box::new(p2p_peers.clone()))
            .map_err(|_| MetricsError::Prom)?;

        registry
            .register(Box::new(announce_version.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(announce_query_enode_sent_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(announce_version_certificates_sent_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(announce_enode_certs_sent_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(announce_regossip_suppressed_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(announce_invalid_envelope_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(val_enode_table_size.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(version_certificate_table_size.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            p2p_peers,
            announce_version,
            announce_query_enode_sent_total,
            announce_version_certificates_sent_total,
            announce_enode_certs_sent_total,
            announce_regossip_suppressed_total,
            announce_invalid_envelope_total,
            val_enode_table_size,
            version_certificate_table_size,
        })
    }
}
