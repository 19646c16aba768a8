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

//! Generate (or load) this validator's secp256k1 announce identity and
//! print its derived address. Set `ANNOUNCE_KEY_PASSPHRASE` to encrypt
//! the key file at rest.

use std::path::PathBuf;

use anyhow::Result;
use istanbul_announce::crypto::keystore::{FileSecp256k1Backend, SignerBackend};

fn main() -> Result<()> {
    let out_dir = std::env::args().nth(1).unwrap_or_else(|| "data".to_string());
    let mut key_path = PathBuf::from(out_dir);
    std::fs::create_dir_all(&key_path)?;
    key_path.push("validator.key");

    let backend = FileSecp256k1Backend::load_or_create(&key_path)
        .map_err(|e| anyhow::anyhow!("keygen failed: {e}"))?;

    println!("address: {}", backend.address());
    println!("public_key: 0x{}", hex::encode(backend.public_key().0));
    println!("key_path: {}", key_path.display());
    Ok(())
}
