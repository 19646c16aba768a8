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

//! Node configuration (§9 ambient-stack addition C): a TOML file holding
//! everything `main` needs to construct an `AnnounceCore` and start the
//! control loop. Defaults match spec §4.6's stated periods exactly, so a
//! production deployment needs no overrides; tests shrink them.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::announce::loop_::LoopConfig;
use crate::membership::RegistryPolicy;
use crate::types::Address;

fn default_max_age_ms() -> u64 {
    0
}
fn default_grace_ms() -> u64 {
    60 * 60 * 1000
}
fn default_min_version() -> u32 {
    0
}

/// Configuration errors (`kConfig`/`kIo` per §9 ambient kinds).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The config file did not parse as valid TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// `validator_registry` was configured with a signer address that
    /// does not parse as hex.
    #[error("bad validator_registry.signer_address")]
    BadSignerAddress,
}

/// libp2p transport settings (§9 ambient C; reuses the shape of the
/// teacher's `networking::p2p::P2pConfig`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct P2pSettings {
    /// Listen multiaddr, e.g. `/ip4/0.0.0.0/tcp/30303`.
    pub listen_addr: String,
    /// Bootstrap peer multiaddrs to dial at startup.
    #[serde(default)]
    pub bootstrap: Vec<String>,
    /// This node's externally reachable `enode://` URL, advertised via
    /// `SelfNode`.
    pub self_enode: String,
}

fn default_listen_addr() -> String {
    "/ip4/0.0.0.0/tcp/30303".to_string()
}

impl Default for P2pSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            bootstrap: Vec::new(),
            self_enode: String::new(),
        }
    }
}

/// Signed validator-address registry settings (§9 ambient C/G; same
/// signature scheme as the announce identity, secp256k1 over
/// domain-separated Keccak256, applied to a validator-address set
/// instead of peer ids).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidatorRegistryConfig {
    /// Path to the signed TOML registry file.
    pub path: PathBuf,
    /// Hex-encoded address pinned as the only acceptable registry signer.
    pub signer_address: String,
    /// Max accepted registry age in ms; 0 disables the check.
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,
    /// Grace window past `expires_at_ms` in ms.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// Minimum accepted registry version; 0 accepts any.
    #[serde(default = "default_min_version")]
    pub min_version: u32,
}

/// Tunable timing constants for the control loop (§4.6), expressed in
/// whole seconds so the file stays legible; converted to `Duration` via
/// [`AnnounceConfig::loop_config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopTimingConfig {
    /// *shouldAnnounceCheck* period, seconds (spec: 5).
    #[serde(default = "default_should_announce_check_secs")]
    pub should_announce_check_secs: u64,
    /// *shareCerts* period, seconds (spec: 300).
    #[serde(default = "default_share_certs_secs")]
    pub share_certs_secs: u64,
    /// *pruneTick* period, seconds (spec: 600).
    #[serde(default = "default_prune_secs")]
    pub prune_secs: u64,
    /// *updateVersionTick* period while announcing, seconds (spec: 300).
    #[serde(default = "default_update_version_secs")]
    pub update_version_secs: u64,
    /// Query-enode ticker period in the high-frequency states, seconds
    /// (spec: 60).
    #[serde(default = "default_query_enode_high_freq_secs")]
    pub query_enode_high_freq_secs: u64,
    /// Query-enode ticker period in `LowFreq`, seconds.
    #[serde(default = "default_query_enode_low_freq_secs")]
    pub query_enode_low_freq_secs: u64,
    /// Consensus epoch length in blocks; epochs `<= 10` select the short
    /// first-emission delay and the aggressive initial frequency state
    /// (spec: "5 s when configured epoch <= 10").
    #[serde(default = "default_epoch")]
    pub epoch: u64,
    /// Emissions spent in `HighFreqAfterFirstPeer` before falling back to
    /// `LowFreq` (spec: 10).
    #[serde(default = "default_high_freq_after_first_peer_emissions")]
    pub high_freq_after_first_peer_emissions: u32,
}

fn default_should_announce_check_secs() -> u64 {
    5
}
fn default_share_certs_secs() -> u64 {
    5 * 60
}
fn default_prune_secs() -> u64 {
    10 * 60
}
fn default_update_version_secs() -> u64 {
    5 * 60
}
fn default_query_enode_high_freq_secs() -> u64 {
    60
}
fn default_query_enode_low_freq_secs() -> u64 {
    10 * 60
}
fn default_epoch() -> u64 {
    17280
}
fn default_high_freq_after_first_peer_emissions() -> u32 {
    10
}

impl Default for LoopTimingConfig {
    fn default() -> Self {
        Self {
            should_announce_check_secs: default_should_announce_check_secs(),
            share_certs_secs: default_share_certs_secs(),
            prune_secs: default_prune_secs(),
            update_version_secs: default_update_version_secs(),
            query_enode_high_freq_secs: default_query_enode_high_freq_secs(),
            query_enode_low_freq_secs: default_query_enode_low_freq_secs(),
            epoch: default_epoch(),
            high_freq_after_first_peer_emissions: default_high_freq_after_first_peer_emissions(),
        }
    }
}

/// Top-level node configuration, loaded from a TOML file at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnnounceConfig {
    /// Directory for durable state: the sled database, the validator
    /// signing key (`validator.key`, see `crypto::keystore::Keystore::open`),
    /// the audit log, and the libp2p identity file.
    pub data_dir: PathBuf,
    /// libp2p transport settings.
    #[serde(default)]
    pub p2p: P2pSettings,
    /// Signed validator registry, or `None` to fall back to a static
    /// single-validator connection set (standalone / development mode).
    #[serde(default)]
    pub validator_registry: Option<ValidatorRegistryConfig>,
    /// Control-loop timing constants.
    #[serde(default)]
    pub loop_timing: LoopTimingConfig,
    /// HTTP bind address for `/metrics` and `/healthz`.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9100".to_string()
}

impl AnnounceConfig {
    /// Load and parse a TOML config file.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)?;
        Ok(cfg)
    }

    /// Build the control loop's `LoopConfig` from this file's timing
    /// section.
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            should_announce_check_period: Duration::from_secs(self.loop_timing.should_announce_check_secs),
            share_certs_period: Duration::from_secs(self.loop_timing.share_certs_secs),
            prune_period: Duration::from_secs(self.loop_timing.prune_secs),
            update_version_period: Duration::from_secs(self.loop_timing.update_version_secs),
            query_enode_high_freq_period: Duration::from_secs(self.loop_timing.query_enode_high_freq_secs),
            query_enode_low_freq_period: Duration::from_secs(self.loop_timing.query_enode_low_freq_secs),
            epoch: self.loop_timing.epoch,
            high_freq_after_first_peer_emissions: self.loop_timing.high_freq_after_first_peer_emissions,
        }
    }

    /// Build a `RegistryPolicy` from `validator_registry`, and the pinned
    /// signer address it verifies against. Returns `None` when no
    /// registry is configured.
    pub fn registry_policy(&self) -> Result<Option<(RegistryPolicy, Address)>, ConfigError> {
        let Some(reg) = &self.validator_registry else {
            return Ok(None);
        };
        let signer = Address::from_hex(&reg.signer_address).map_err(|_| ConfigError::BadSignerAddress)?;
        let policy = RegistryPolicy {
            now_ms: 0,
            max_age_ms: reg.max_age_ms,
            grace_ms: reg.grace_ms,
            min_version: reg.min_version,
        };
        Ok(Some((policy, signer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_periods() {
        let timing = LoopTimingConfig::default();
        assert_eq!(timing.should_announce_check_secs, 5);
        assert_eq!(timing.share_certs_secs, 300);
        assert_eq!(timing.prune_secs, 600);
        assert_eq!(timing.update_version_secs, 300);
        assert_eq!(timing.query_enode_high_freq_secs, 60);
        assert_eq!(timing.high_freq_after_first_peer_emissions, 10);
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_src = r#"
            data_dir = "/data"
        "#;
        let cfg: AnnounceConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.p2p.listen_addr, "/ip4/0.0.0.0/tcp/30303");
        assert!(cfg.validator_registry.is_none());
        assert_eq!(cfg.loop_timing.share_certs_secs, 300);
    }

    #[test]
    fn rejects_bad_signer_address() {
        let toml_src = r#"
            data_dir = "/data"

            [validator_registry]
            path = "/data/registry.toml"
            signer_address = "not-hex"
        "#;
        let cfg: AnnounceConfig = toml::from_str(toml_src).unwrap();
        assert!(matches!(cfg.registry_policy(), Err(ConfigError::BadSignerAddress)));
    }
}
