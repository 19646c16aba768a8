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

//! Durable map: validator address → `ValEnodeEntry` (§3, §4.2).

use std::collections::{HashMap, HashSet};

use sled::transaction::ConflictableTransactionError;
use thiserror::Error;

use crate::types::{Address, EnodeUrl, PublicKey, ValEnodeEntry, Version};

/// Table errors. All are `kStorage` per §7: callers log and continue.
#[derive(Debug, Error)]
pub enum ValEnodeTableError {
    /// Failed to open the backing sled tree.
    #[error("storage open failed")]
    Open,
    /// Read/write/transaction failed against the backing store.
    #[error("storage io failed")]
    Io,
}

/// One `(Address, Node, Version)` upsert, per `UpsertVersionAndEnode`.
#[derive(Clone, Debug)]
pub struct ValEnodeUpsert {
    /// Validator address.
    pub address: Address,
    /// Enode URL learned at `version`.
    pub node: EnodeUrl,
    /// Version at which `node` was learned.
    pub version: Version,
}

/// Durable val-enode table (§4.2). Internally synchronized by sled; no
/// external locking is required.
#[derive(Clone)]
pub struct ValEnodeTable {
    tree: sled::Tree,
}

fn decode_entry(bytes: &[u8]) -> Result<ValEnodeEntry, ValEnodeTableError> {
    bincode::deserialize(bytes).map_err(|_| ValEnodeTableError::Io)
}

fn encode_entry(entry: &ValEnodeEntry) -> Result<Vec<u8>, ValEnodeTableError> {
    bincode::serialize(entry).map_err(|_| ValEnodeTableError::Io)
}

impl ValEnodeTable {
    /// Open (or create) the table inside a shared sled database.
    pub fn open(db: &sled::Db) -> Result<Self, ValEnodeTableError> {
        let tree = db.open_tree("val_enode").map_err(|_| ValEnodeTableError::Open)?;
        Ok(Self { tree })
    }

    /// `GetValEnodes(addresses?)`: all entries, or only the requested
    /// addresses (entries absent from the table are omitted, not
    /// defaulted).
    pub fn get_val_enodes(
        &self,
        addresses: Option<&[Address]>,
    ) -> Result<HashMap<Address, ValEnodeEntry>, ValEnodeTableError> {
        let mut out = HashMap::new();
        match addresses {
            Some(addrs) => {
                for addr in addrs {
                    if let Some(raw) = self.tree.get(addr.as_bytes()).map_err(|_| ValEnodeTableError::Io)? {
                        out.insert(*addr, decode_entry(&raw)?);
                    }
                }
            }
            None => {
                for item in self.tree.iter() {
                    let (k, v) = item.map_err(|_| ValEnodeTableError::Io)?;
                    if k.len() != 20 {
                        continue;
                    }
                    let mut addr = [0u8; 20];
                    addr.copy_from_slice(&k);
                    out.insert(Address::from_bytes(addr), decode_entry(&v)?);
                }
            }
        }
        Ok(out)
    }

    /// `UpsertVersionAndEnode`: per entry, update `node`/`version` if the
    /// incoming version is `>=` stored; advance `highest_known_version`
    /// to the max seen, resetting query-attempt stats on advance.
    pub fn upsert_version_and_enode(&self, entries: &[ValEnodeUpsert]) -> Result<(), ValEnodeTableError> {
        self.tree
            .transaction(|tx| {
                for upsert in entries {
                    let key = upsert.address.as_bytes();
                    let mut entry = match tx.get(key.as_slice())? {
                        Some(raw) => bincode::deserialize(&raw).map_err(|_| {
                            ConflictableTransactionError::Abort(ValEnodeTableError::Io)
                        })?,
                        None => ValEnodeEntry::default(),
                    };

                    if upsert.version >= entry.version {
                        entry.node = Some(upsert.node.clone());
                        entry.version = upsert.version;
                    }

                    let advanced = upsert.version > entry.highest_known_version;
                    entry.highest_known_version = entry.highest_known_version.max(upsert.version);
                    if advanced {
                        entry.num_query_attempts_for_hk_version = 0;
                    }

                    let raw = bincode::serialize(&entry).map_err(|_| {
                        ConflictableTransactionError::Abort(ValEnodeTableError::Io)
                    })?;
                    tx.insert(key.as_slice(), raw)?;
                }
                Ok(())
            })
            .map_err(|e| match e {
                sled::transaction::TransactionError::Abort(inner) => inner,
                sled::transaction::TransactionError::Storage(_) => ValEnodeTableError::Io,
            })
    }

    /// `UpsertHighestKnownVersion`: advance `highest_known_version` only
    /// if strictly greater; fill `public_key` if previously absent.
    pub fn upsert_highest_known_version(
        &self,
        entries: &[(Address, Option<PublicKey>, Version)],
    ) -> Result<(), ValEnodeTableError> {
        self.tree
            .transaction(|tx| {
                for (address, public_key, hk_version) in entries {
                    let key = address.as_bytes();
                    let mut entry = match tx.get(key.as_slice())? {
                        Some(raw) => bincode::deserialize(&raw).map_err(|_| {
                            ConflictableTransactionError::Abort(ValEnodeTableError::Io)
                        })?,
                        None => ValEnodeEntry::default(),
                    };

                    if *hk_version > entry.highest_known_version {
                        entry.highest_known_version = *hk_version;
                        entry.num_query_attempts_for_hk_version = 0;
                    }
                    if entry.public_key.is_none() {
                        entry.public_key = public_key.clone();
                    }

                    let raw = bincode::serialize(&entry).map_err(|_| {
                        ConflictableTransactionError::Abort(ValEnodeTableError::Io)
                    })?;
                    tx.insert(key.as_slice(), raw)?;
                }
                Ok(())
            })
            .map_err(|e| match e {
                sled::transaction::TransactionError::Abort(inner) => inner,
                sled::transaction::TransactionError::Storage(_) => ValEnodeTableError::Io,
            })
    }

    /// `UpdateQueryEnodeStats`: increment the attempt counter and stamp
    /// `last_query_timestamp` for each queried address.
    pub fn update_query_enode_stats(&self, addresses: &[Address], now: u64) -> Result<(), ValEnodeTableError> {
        self.tree
            .transaction(|tx| {
                for address in addresses {
                    let key = address.as_bytes();
                    let Some(raw) = tx.get(key.as_slice())? else {
                        continue;
                    };
                    let mut entry: ValEnodeEntry = bincode::deserialize(&raw).map_err(|_| {
                        ConflictableTransactionError::Abort(ValEnodeTableError::Io)
                    })?;
                    entry.num_query_attempts_for_hk_version =
                        entry.num_query_attempts_for_hk_version.saturating_add(1);
                    entry.last_query_timestamp = now;
                    let raw = bincode::serialize(&entry).map_err(|_| {
                        ConflictableTransactionError::Abort(ValEnodeTableError::Io)
                    })?;
                    tx.insert(key.as_slice(), raw)?;
                }
                Ok(())
            })
            .map_err(|e| match e {
                sled::transaction::TransactionError::Abort(inner) => inner,
                sled::transaction::TransactionError::Storage(_) => ValEnodeTableError::Io,
            })
    }

    /// `PruneEntries(keepSet)`: drop rows whose address is not in
    /// `keep_set`.
    pub fn prune_entries(&self, keep_set: &HashSet<Address>) -> Result<usize, ValEnodeTableError> {
        let mut to_remove = Vec::new();
        for item in self.tree.iter() {
            let (k, _v) = item.map_err(|_| ValEnodeTableError::Io)?;
            if k.len() != 20 {
                continue;
            }
            let mut addr = [0u8; 20];
            addr.copy_from_slice(&k);
            if !keep_set.contains(&Address::from_bytes(addr)) {
                to_remove.push(k);
            }
        }
        for key in &to_remove {
            self.tree.remove(key).map_err(|_| ValEnodeTableError::Io)?;
        }
        Ok(to_remove.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_table() -> (ValEnodeTable, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (ValEnodeTable::open(&db).unwrap(), dir)
    }

    fn enode() -> EnodeUrl {
        EnodeUrl::parse(&format!("enode://{}@10.0.0.1:30303", "ab".repeat(64))).unwrap()
    }

    #[test]
    fn version_never_regresses() {
        let (table, _dir) = open_table();
        let addr = Address([1u8; 20]);
        table
            .upsert_version_and_enode(&[ValEnodeUpsert { address: addr, node: enode(), version: 10 }])
            .unwrap();
        table
            .upsert_version_and_enode(&[ValEnodeUpsert { address: addr, node: enode(), version: 5 }])
            .unwrap();
        let entry = table.get_val_enodes(Some(&[addr])).unwrap().remove(&addr).unwrap();
        assert_eq!(entry.version, 10);
        assert_eq!(entry.highest_known_version, 10);
    }

    #[test]
    fn highest_known_version_resets_attempts_on_advance() {
        let (table, _dir) = open_table();
        let addr = Address([2u8; 20]);
        table
            .upsert_version_and_enode(&[ValEnodeUpsert { address: addr, node: enode(), version: 10 }])
            .unwrap();
        table.update_query_enode_stats(&[addr], 1000).unwrap();
        table.update_query_enode_stats(&[addr], 1001).unwrap();
        let entry = table.get_val_enodes(Some(&[addr])).unwrap().remove(&addr).unwrap();
        assert_eq!(entry.num_query_attempts_for_hk_version, 2);

        table
            .upsert_highest_known_version(&[(addr, None, 20)])
            .unwrap();
        let entry = table.get_val_enodes(Some(&[addr])).unwrap().remove(&addr).unwrap();
        assert_eq!(entry.highest_known_version, 20);
        assert_eq!(entry.num_query_attempts_for_hk_version, 0);
    }

    #[test]
    fn prune_drops_addresses_outside_keep_set() {
        let (table, _dir) = open_table();
        let keep = Address([3u8; 20]);
        let drop = Address([4u8; 20]);
        table
            .upsert_version_and_enode(&[
                ValEnodeUpsert { address: keep, node: enode(), version: 1 },
                ValEnodeUpsert { address: drop, node: enode(), version: 1 },
            ])
            .unwrap();
        let mut keep_set = HashSet::new();
        keep_set.insert(keep);
        let removed = table.prune_entries(&keep_set).unwrap();
        assert_eq!(removed, 1);
        let remaining = table.get_val_enodes(None).unwrap();
        assert!(remaining.contains_key(&keep));
        assert!(!remaining.contains_key(&drop));
    }
}
