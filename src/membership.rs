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

//! Validator set membership: `ValidatorConnSet`, `IsProxiedValidator`,
//! `Address`, `ValidatorAddress` (§5). A signed, file-backed registry
//! (`RegistrySetProvider`) and a fixed in-memory set (`StaticSetProvider`)
//! both implement the trait.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use thiserror::Error;

use crate::crypto::keystore::{recover_address, KeystoreError};
use crate::types::{Address, Signature};

/// Consensus membership collaborator consumed by the announce subsystem
/// (§5): the current validator connection set and this node's role in it.
pub trait ValidatorSetProvider: Send + Sync {
    /// `ValidatorConnSet()`: the addresses this node should maintain
    /// enode/version-certificate state for.
    fn validator_conn_set(&self) -> HashSet<Address>;
    /// `IsProxiedValidator()`.
    fn is_proxied_validator(&self) -> bool;
    /// `Address()`: this process's own operating address (the proxy's
    /// address when proxied, otherwise the validator's own).
    fn address(&self) -> Address;
    /// `ValidatorAddress()`: the validator address this process is
    /// acting on behalf of (equals `Address()` unless proxied).
    fn validator_address(&self) -> Address;
}

/// Fixed validator set for tests and standalone deployments that do not
/// use the signed registry.
pub struct StaticSetProvider {
    conn_set: HashSet<Address>,
    is_proxied: bool,
    address: Address,
    validator_address: Address,
}

impl StaticSetProvider {
    /// A standalone (non-proxied) validator serving itself.
    pub fn standalone(self_address: Address, conn_set: HashSet<Address>) -> Self {
        Self {
            conn_set,
            is_proxied: false,
            address: self_address,
            validator_address: self_address,
        }
    }

    /// A proxy acting on behalf of `validator_address`.
    pub fn proxy(proxy_address: Address, validator_address: Address, conn_set: HashSet<Address>) -> Self {
        Self {
            conn_set,
            is_proxied: true,
            address: proxy_address,
            validator_address,
        }
    }
}

impl ValidatorSetProvider for StaticSetProvider {
    fn validator_conn_set(&self) -> HashSet<Address> {
        self.conn_set.clone()
    }
    fn is_proxied_validator(&self) -> bool {
        self.is_proxied
    }
    fn address(&self) -> Address {
        self.address
    }
    fn validator_address(&self) -> Address {
        self.validator_address
    }
}

/// Registry verification errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Cannot read the registry file.
    #[error("read registry")]
    Read,
    /// Cannot parse TOML.
    #[error("parse registry")]
    Parse,
    /// Registry version is unsupported.
    #[error("unsupported registry version")]
    UnsupportedVersion,
    /// Missing a required field.
    #[error("missing required field")]
    MissingField,
    /// Registry contains an invalid validator address.
    #[error("invalid validator address")]
    InvalidAddress,
    /// Registry signature does not recover to the pinned signer address.
    #[error("bad registry signature")]
    BadSignature,
    /// Signature bytes malformed.
    #[error(transparent)]
    Keystore(#[from] KeystoreError),
    /// Registry is not valid yet per its `issued_at_ms`.
    #[error("registry not valid yet")]
    NotYetValid,
    /// Registry is expired per its `expires_at_ms` and the policy's grace.
    #[error("registry expired")]
    Expired,
    /// Registry is older than the policy allows.
    #[error("registry too old per policy")]
    TooOld,
}

/// Node-side verification policy for a loaded registry.
#[derive(Clone, Debug)]
pub struct RegistryPolicy {
    /// Current time in ms since UNIX epoch.
    pub now_ms: u64,
    /// Max accepted age (`now - issued_at_ms`) in ms; 0 disables the check.
    pub max_age_ms: u64,
    /// Grace window past `expires_at_ms` in ms; 0 disables the grace.
    pub grace_ms: u64,
    /// Minimum accepted registry version; 0 accepts any supported version.
    pub min_version: u32,
}

impl RegistryPolicy {
    /// A permissive policy pinned to `now_ms`, with no age/expiry limits.
    pub fn permissive(now_ms: u64) -> Self {
        Self { now_ms, max_age_ms: 0, grace_ms: 0, min_version: 0 }
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    version: u32,
    #[serde(default)]
    issued_at_ms: Option<u64>,
    #[serde(default)]
    expires_at_ms: Option<u64>,
    validators: Vec<String>,
    /// Hex-encoded 65-byte recoverable signature over the canonical bytes.
    signature_hex: String,
}

fn canonical_bytes(reg: &RegistryFile, validators: &BTreeSet<Address>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"v1\n");
    out.extend_from_slice(format!("issued_at_ms={}\n", reg.issued_at_ms.unwrap_or(0)).as_bytes());
    out.extend_from_slice(format!("expires_at_ms={}\n", reg.expires_at_ms.unwrap_or(0)).as_bytes());
    out.extend_from_slice(b"validators\n");
    for addr in validators {
        out.extend_from_slice(format!("{addr}\n").as_bytes());
    }
    out
}

fn parse_signature(hex_str: &str) -> Result<Signature, RegistryError> {
    let bytes = hex::decode(hex_str.trim().strip_prefix("0x").unwrap_or(hex_str.trim()))
        .map_err(|_| RegistryError::BadSignature)?;
    if bytes.len() != 65 {
        return Err(RegistryError::BadSignature);
    }
    let mut out = [0u8; 65];
    out.copy_from_slice(&bytes);
    Ok(Signature(out))
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Load, parse, and verify a signed validator registry from `path`,
/// requiring its signature to recover to `signer_address`.
pub fn load_and_verify_registry(
    path: &str,
    signer_address: Address,
    policy: &RegistryPolicy,
) -> Result<HashSet<Address>, RegistryError> {
    let raw = fs::read_to_string(path).map_err(|_| RegistryError::Read)?;
    let reg: RegistryFile = toml::from_str(&raw).map_err(|_| RegistryError::Parse)?;

    if reg.version != 1 {
        return Err(RegistryError::UnsupportedVersion);
    }
    if policy.min_version != 0 && reg.version < policy.min_version {
        return Err(RegistryError::UnsupportedVersion);
    }

    let issued = reg.issued_at_ms.unwrap_or(0);
    let expires = reg.expires_at_ms.unwrap_or(0);
    if issued == 0 || expires == 0 {
        return Err(RegistryError::MissingField);
    }
    if policy.now_ms < issued {
        return Err(RegistryError::NotYetValid);
    }
    if policy.now_ms > expires.saturating_add(policy.grace_ms) {
        return Err(RegistryError::Expired);
    }
    if policy.max_age_ms != 0 && policy.now_ms.saturating_sub(issued) > policy.max_age_ms {
        return Err(RegistryError::TooOld);
    }

    let mut validators = BTreeSet::new();
    for s in &reg.validators {
        validators.insert(Address::from_hex(s).map_err(|_| RegistryError::InvalidAddress)?);
    }

    let signature = parse_signature(&reg.signature_hex)?;
    let msg = canonical_bytes(&reg, &validators);
    let hash = crate::crypto::address::keccak256(&msg);
    let (recovered, _pk) = recover_address(&hash, &signature)?;
    if recovered != signer_address {
        return Err(RegistryError::BadSignature);
    }

    Ok(validators.into_iter().collect())
}

/// Convenience wrapper using wall-clock time for `policy.now_ms`.
pub fn load_and_verify_registry_now(
    path: &str,
    signer_address: Address,
    policy: &RegistryPolicy,
) -> Result<HashSet<Address>, RegistryError> {
    let mut p = policy.clone();
    if p.now_ms == 0 {
        p.now_ms = now_ms();
    }
    load_and_verify_registry(path, signer_address, &p)
}

/// Parse a registry TOML document for syntax/schema only, without
/// verifying its signature. Intended for tooling and fuzzing.
pub fn parse_registry_toml(raw: &str) -> Result<(), RegistryError> {
    let _reg: RegistryFile = toml::from_str(raw).map_err(|_| RegistryError::Parse)?;
    Ok(())
}

/// A `ValidatorSetProvider` backed by a signed, periodically reloaded
/// registry file.
pub struct RegistrySetProvider {
    path: String,
    signer_address: Address,
    policy: RegistryPolicy,
    is_proxied: bool,
    address: Address,
    validator_address: Address,
}

impl RegistrySetProvider {
    /// Construct a provider reading `path`, requiring signatures from
    /// `signer_address`, for a standalone validator.
    pub fn standalone(path: String, signer_address: Address, policy: RegistryPolicy, self_address: Address) -> Self {
        Self {
            path,
            signer_address,
            policy,
            is_proxied: false,
            address: self_address,
            validator_address: self_address,
        }
    }

    /// Construct a provider for a proxy acting on behalf of `validator_address`.
    pub fn proxy(
        path: String,
        signer_address: Address,
        policy: RegistryPolicy,
        proxy_address: Address,
        validator_address: Address,
    ) -> Self {
        Self {
            path,
            signer_address,
            policy,
            is_proxied: true,
            address: proxy_address,
            validator_address,
        }
    }
}

impl ValidatorSetProvider for RegistrySetProvider {
    fn validator_conn_set(&self) -> HashSet<Address> {
        let mut policy = self.policy.clone();
        policy.now_ms = now_ms();
        load_and_verify_registry(&self.path, self.signer_address, &policy).unwrap_or_default()
    }
    fn is_proxied_validator(&self) -> bool {
        self.is_proxied
    }
    fn address(&self) -> Address {
        self.address
    }
    fn validator_address(&self) -> Address {
        self.validator_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keystore::{FileSecp256k1Backend, SignerBackend};

    fn write_registry(path: &std::path::Path, signer: &FileSecp256k1Backend, validators: &[Address], issued_at_ms: u64, expires_at_ms: u64) {
        let mut set = BTreeSet::new();
        for v in validators {
            set.insert(*v);
        }
        let reg = RegistryFile {
            version: 1,
            issued_at_ms: Some(issued_at_ms),
            expires_at_ms: Some(expires_at_ms),
            validators: validators.iter().map(|a| a.to_string()).collect(),
            signature_hex: String::new(),
        };
        let bytes = canonical_bytes(&reg, &set);
        let hash = crate::crypto::address::keccak256(&bytes);
        let sig = signer.sign_hash(&hash).unwrap();
        let toml_body = format!(
            "version = 1\nissued_at_ms = {issued_at_ms}\nexpires_at_ms = {expires_at_ms}\nvalidators = [{}]\nsignature_hex = \"{}\"\n",
            validators.iter().map(|a| format!("\"{a}\"")).collect::<Vec<_>>().join(", "),
            hex::encode(sig.0)
        );
        fs::write(path, toml_body).unwrap();
    }

    #[test]
    fn verifies_well_formed_registry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileSecp256k1Backend::load_or_create(&dir.path().join("signer.key")).unwrap();
        let signer_address = backend.address();
        let validators = vec![Address([1u8; 20]), Address([2u8; 20])];
        let reg_path = dir.path().join("registry.toml");
        write_registry(&reg_path, &backend, &validators, 1_000, 2_000_000_000_000);

        let policy = RegistryPolicy::permissive(1_500);
        let set = load_and_verify_registry(reg_path.to_str().unwrap(), signer_address, &policy).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&validators[0]));
    }

    #[test]
    fn rejects_signature_from_wrong_signer() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileSecp256k1Backend::load_or_create(&dir.path().join("signer.key")).unwrap();
        let wrong_address = Address([99u8; 20]);
        let validators = vec![Address([1u8; 20])];
        let reg_path = dir.path().join("registry.toml");
        write_registry(&reg_path, &backend, &validators, 1_000, 2_000_000_000_000);

        let policy = RegistryPolicy::permissive(1_500);
        let result = load_and_verify_registry(reg_path.to_str().unwrap(), wrong_address, &policy);
        assert!(matches!(result, Err(RegistryError::BadSignature)));
    }

    #[test]
    fn rejects_expired_registry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileSecp256k1Backend::load_or_create(&dir.path().join("signer.key")).unwrap();
        let signer_address = backend.address();
        let validators = vec![Address([1u8; 20])];
        let reg_path = dir.path().join("registry.toml");
        write_registry(&reg_path, &backend, &validators, 1_000, 2_000);

        let policy = RegistryPolicy::permissive(5_000);
        let result = load_and_verify_registry(reg_path.to_str().unwrap(), signer_address, &policy);
        assert!(matches!(result, Err(RegistryError::Expired)));
    }
}
