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

//! Property tests for the durable val-enode table (spec §3/§4.2/§8:
//! "version never regresses", "highest known version is monotone").

use istanbul_announce::tables::val_enode::{ValEnodeTable, ValEnodeUpsert};
use istanbul_announce::types::{Address, EnodeUrl};
use proptest::prelude::*;

fn enode_for(byte: u8) -> EnodeUrl {
    EnodeUrl::parse(&format!("enode://{}@10.0.0.{}:30303", hex::encode([byte; 64]), byte)).unwrap()
}

proptest! {
    #[test]
    fn version_is_monotone_non_decreasing_under_any_upsert_order(
        versions in proptest::collection::vec(0u32..1000, 1..20),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let table = ValEnodeTable::open(&db).unwrap();
        let addr = Address([9u8; 20]);

        let mut max_seen = 0u32;
        for v in versions {
            table
                .upsert_version_and_enode(&[ValEnodeUpsert { address: addr, node: enode_for(1), version: v }])
                .unwrap();
            max_seen = max_seen.max(v);
            let entry = table.get_val_enodes(Some(&[addr])).unwrap().remove(&addr).unwrap();
            prop_assert_eq!(entry.highest_known_version, max_seen);
        }
    }

    #[test]
    fn prune_is_idempotent_and_keeps_exactly_the_keep_set(
        keep_count in 0usize..6,
        drop_count in 0usize..6,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let table = ValEnodeTable::open(&db).unwrap();

        let mut keep_set = std::collections::HashSet::new();
        for i in 0..keep_count {
            let addr = Address([i as u8 + 1; 20]);
            table
                .upsert_version_and_enode(&[ValEnodeUpsert { address: addr, node: enode_for(1), version: 1 }])
                .unwrap();
            keep_set.insert(addr);
        }
        for i in 0..drop_count {
            let addr = Address([100 + i as u8; 20]);
            table
                .upsert_version_and_enode(&[ValEnodeUpsert { address: addr, node: enode_for(1), version: 1 }])
                .unwrap();
        }

        table.prune_entries(&keep_set).unwrap();
        let second_pass_removed = table.prune_entries(&keep_set).unwrap();
        prop_assert_eq!(second_pass_removed, 0);

        let remaining = table.get_val_enodes(None).unwrap();
        prop_assert_eq!(remaining.len(), keep_set.len());
        for addr in remaining.keys() {
            prop_assert!(keep_set.contains(addr));
        }
    }
}
