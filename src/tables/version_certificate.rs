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

//! Durable map: validator address → latest signed `VersionCertificate`
//! (§3, §4.3).

use std::collections::{HashMap, HashSet};

use sled::transaction::ConflictableTransactionError;
use thiserror::Error;

use crate::types::{Address, VersionCertificate};

/// Table errors (`kStorage` per §7).
#[derive(Debug, Error)]
pub enum VersionCertificateTableError {
    /// Failed to open the backing sled tree.
    #[error("storage open failed")]
    Open,
    /// Read/write/transaction failed against the backing store.
    #[error("storage io failed")]
    Io,
}

/// Durable version-certificate table (§4.3).
#[derive(Clone)]
pub struct VersionCertificateTable {
    tree: sled::Tree,
}

impl VersionCertificateTable {
    /// Open (or create) the table inside a shared sled database.
    pub fn open(db: &sled::Db) -> Result<Self, VersionCertificateTableError> {
        let tree = db
            .open_tree("version_certificate")
            .map_err(|_| VersionCertificateTableError::Open)?;
        Ok(Self { tree })
    }

    /// `GetAll()`.
    pub fn get_all(&self) -> Result<HashMap<Address, VersionCertificate>, VersionCertificateTableError> {
        let mut out = HashMap::new();
        for item in self.tree.iter() {
            let (k, v) = item.map_err(|_| VersionCertificateTableError::Io)?;
            if k.len() != 20 {
                continue;
            }
            let mut addr = [0u8; 20];
            addr.copy_from_slice(&k);
            let cert: VersionCertificate =
                bincode::deserialize(&v).map_err(|_| VersionCertificateTableError::Io)?;
            out.insert(Address::from_bytes(addr), cert);
        }
        Ok(out)
    }

    /// `Upsert(entries) -> newEntries`: keeps, per address, the
    /// certificate with the largest version (ties preserve the
    /// earliest-seen); returns only the entries that strictly advanced
    /// the stored version.
    pub fn upsert(
        &self,
        entries: &[(Address, VersionCertificate)],
    ) -> Result<Vec<(Address, VersionCertificate)>, VersionCertificateTableError> {
        let mut advanced = Vec::new();
        self.tree
            .transaction(|tx| {
                advanced.clear();
                for (address, cert) in entries {
                    let key = address.as_bytes();
                    let stored: Option<VersionCertificate> = match tx.get(key.as_slice())? {
                        Some(raw) => Some(bincode::deserialize(&raw).map_err(|_| {
                            ConflictableTransactionError::Abort(VersionCertificateTableError::Io)
                        })?),
                        None => None,
                    };

                    let should_replace = match &stored {
                        None => true,
                        Some(existing) => cert.version > existing.version,
                    };
                    if !should_replace {
                        continue;
                    }

                    let raw = bincode::serialize(cert).map_err(|_| {
                        ConflictableTransactionError::Abort(VersionCertificateTableError::Io)
                    })?;
                    tx.insert(key.as_slice(), raw)?;
                    advanced.push((*address, cert.clone()));
                }
                Ok(())
            })
            .map_err(|e| match e {
                sled::transaction::TransactionError::Abort(inner) => inner,
                sled::transaction::TransactionError::Storage(_) => VersionCertificateTableError::Io,
            })?;
        Ok(advanced)
    }

    /// `Prune(keepSet)`.
    pub fn prune(&self, keep_set: &HashSet<Address>) -> Result<usize, VersionCertificateTableError> {
        let mut to_remove = Vec::new();
        for item in self.tree.iter() {
            let (k, _v) = item.map_err(|_| VersionCertificateTableError::Io)?;
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
            self.tree.remove(key).map_err(|_| VersionCertificateTableError::Io)?;
        }
        Ok(to_remove.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Signature;

    fn open_table() -> (VersionCertificateTable, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (VersionCertificateTable::open(&db).unwrap(), dir)
    }

    fn cert(version: u32) -> VersionCertificate {
        VersionCertificate { version, signature: Signature([0u8; 65]) }
    }

    #[test]
    fn upsert_keeps_highest_version_and_reports_advances() {
        let (table, _dir) = open_table();
        let addr = Address([9u8; 20]);
        let advanced = table.upsert(&[(addr, cert(100))]).unwrap();
        assert_eq!(advanced.len(), 1);

        let advanced = table.upsert(&[(addr, cert(100))]).unwrap();
        assert!(advanced.is_empty());

        let advanced = table.upsert(&[(addr, cert(200))]).unwrap();
        assert_eq!(advanced.len(), 1);
        assert_eq!(table.get_all().unwrap()[&addr].version, 200);
    }

    #[test]
    fn prune_removes_addresses_outside_keep_set() {
        let (table, _dir) = open_table();
        let keep = Address([1u8; 20]);
        let drop = Address([2u8; 20]);
        table.upsert(&[(keep, cert(1)), (drop, cert(1))]).unwrap();
        let mut keep_set = HashSet::new();
        keep_set.insert(keep);
        let removed = table.prune(&keep_set).unwrap();
        assert_eq!(removed, 1);
        assert!(table.get_all().unwrap().contains_key(&keep));
    }
}
