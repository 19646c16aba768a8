#![forbid(unsafe_code)]
#![deny(missing_docs)]
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

//! Keystore: secp256k1 signing, signature recovery, and ECIES decryption,
//! with rate limiting and an audit trail.
//!
//! The validator's static ECDSA identity (§1, §6) lives here. It is
//! distinct from the libp2p transport identity in `networking::p2p_identity`:
//! one authenticates gossip-layer connections, the other authenticates
//! validator-announce messages and decrypts per-destination enode URLs.
//!
//! ## Key encryption format
//! If `ANNOUNCE_KEY_PASSPHRASE` is set, `validator.key` is stored as:
//! `MAGIC(8) || SALT(16) || NONCE(12) || CIPHERTEXT+TAG(..)` where the
//! ciphertext is AES-256-GCM over the raw 32-byte secp256k1 scalar.

use ring::{
    aead,
    pbkdf2,
    rand::{SecureRandom, SystemRandom},
};
use std::{
    fs,
    io::Write,
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, Instant},
};
use thiserror::Error;
use zeroize::Zeroize;

use crate::crypto::address::{address_from_public_key, keccak256};
use crate::crypto::ecies;
use crate::types::{Address, PublicKey, Signature};

use k256::ecdsa::{signature::hazmat::PrehashSigner, RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};

fn env_first(keys: &[&str]) -> Option<String> {
    for &k in keys {
        if let Ok(v) = std::env::var(k) {
            if !v.trim().is_empty() {
                return Some(v);
            }
        }
    }
    None
}

const KEY_FILE_MAGIC: &[u8] = b"ISTNKEY1";
const KEY_SALT_LEN: usize = 16;
const KEY_NONCE_LEN: usize = 12;

const MAX_AUDIT_BYTES: u64 = 32 * 1024 * 1024;
const AUDIT_ROTATE_KEEP: usize = 3;

const PBKDF2_ITERS_DEFAULT: u32 = 100_000;

fn pbkdf2_iters() -> NonZeroU32 {
    let iters = env_first(&["ANNOUNCE_PBKDF2_ITERS"])
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(PBKDF2_ITERS_DEFAULT);
    let iters = iters.clamp(10_000, 10_000_000);
    NonZeroU32::new(iters).unwrap_or_else(|| NonZeroU32::new(PBKDF2_ITERS_DEFAULT).expect("nonzero"))
}

/// Keystore errors.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// File system error.
    #[error("io")]
    Io,
    /// Key bytes did not parse as a valid secp256k1 scalar.
    #[error("invalid key encoding")]
    InvalidKey,
    /// Key file is encrypted but no passphrase was supplied.
    #[error("missing passphrase (set ANNOUNCE_KEY_PASSPHRASE)")]
    MissingPassphrase,
    /// AEAD or KDF failure.
    #[error("crypto")]
    Crypto,
    /// Sign/decrypt call exceeded the rate limit.
    #[error("rate limited")]
    RateLimited,
    /// Signature did not verify.
    #[error("bad signature")]
    BadSignature,
}

/// Signer/decryptor backend abstraction (HSM compatible).
pub trait SignerBackend: Send + Sync {
    /// Uncompressed public key.
    fn public_key(&self) -> PublicKey;
    /// Validator address derived from the public key.
    fn address(&self) -> Address;
    /// Sign a 32-byte prehashed digest, returning a recoverable signature.
    fn sign_hash(&self, hash: &[u8; 32]) -> Result<Signature, KeystoreError>;
    /// Decrypt an ECIES ciphertext addressed to this key.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KeystoreError>;
}

/// File-backed secp256k1 signer.
pub struct FileSecp256k1Backend {
    signing_key: SigningKey,
}

fn rotate_audit_if_needed(path: &Path) {
    let Ok(md) = fs::metadata(path) else {
        return;
    };
    if md.len() <= MAX_AUDIT_BYTES {
        return;
    }
    for i in (1..=AUDIT_ROTATE_KEEP).rev() {
        let dst = PathBuf::from(format!("{}.{}", path.display(), i));
        let src = if i == 1 {
            path.to_path_buf()
        } else {
            PathBuf::from(format!("{}.{}", path.display(), i - 1))
        };
        if src.exists() {
            let _ = fs::rename(&src, &dst);
        }
    }
}

fn set_private_perms_best_effort(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

fn atomic_write_private(path: &Path, bytes: &[u8]) -> Result<(), KeystoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|_| KeystoreError::Io)?;
    }
    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .map_err(|_| KeystoreError::Io)?;
        f.write_all(bytes).map_err(|_| KeystoreError::Io)?;
        let _ = f.sync_all();
    }
    set_private_perms_best_effort(&tmp);
    fs::rename(&tmp, path).map_err(|_| KeystoreError::Io)?;
    set_private_perms_best_effort(path);
    Ok(())
}

fn derive_aes256gcm_key(passphrase: &[u8], salt: &[u8; KEY_SALT_LEN]) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, pbkdf2_iters(), salt, passphrase, &mut out);
    out
}

fn encrypt_key_bytes(passphrase: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, KeystoreError> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; KEY_SALT_LEN];
    rng.fill(&mut salt).map_err(|_| KeystoreError::Crypto)?;
    let mut nonce_bytes = [0u8; KEY_NONCE_LEN];
    rng.fill(&mut nonce_bytes).map_err(|_| KeystoreError::Crypto)?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut key = derive_aes256gcm_key(passphrase, &salt);
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key).map_err(|_| KeystoreError::Crypto)?;
    let less_safe = aead::LessSafeKey::new(unbound);

    let mut in_out = plaintext.to_vec();
    less_safe
        .seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| KeystoreError::Crypto)?;
    key.zeroize();

    let mut out = Vec::with_capacity(KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN + in_out.len());
    out.extend_from_slice(KEY_FILE_MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

fn decrypt_key_bytes(passphrase: &[u8], bytes: &[u8]) -> Result<Vec<u8>, KeystoreError> {
    if bytes.len() < KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN + 16 {
        return Err(KeystoreError::InvalidKey);
    }
    if &bytes[..KEY_FILE_MAGIC.len()] != KEY_FILE_MAGIC {
        return Ok(bytes.to_vec());
    }
    let mut salt = [0u8; KEY_SALT_LEN];
    salt.copy_from_slice(&bytes[KEY_FILE_MAGIC.len()..KEY_FILE_MAGIC.len() + KEY_SALT_LEN]);
    let mut nonce_bytes = [0u8; KEY_NONCE_LEN];
    nonce_bytes.copy_from_slice(
        &bytes[KEY_FILE_MAGIC.len() + KEY_SALT_LEN..KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN],
    );
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut key = derive_aes256gcm_key(passphrase, &salt);
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key).map_err(|_| KeystoreError::Crypto)?;
    let less_safe = aead::LessSafeKey::new(unbound);

    let mut in_out = bytes[KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN..].to_vec();
    let plain = less_safe
        .open_in_place(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| KeystoreError::Crypto)?;
    key.zeroize();
    Ok(plain.to_vec())
}

fn public_key_bytes(signing_key: &SigningKey) -> PublicKey {
    let verifying = VerifyingKey::from(signing_key);
    let point = verifying.to_encoded_point(false);
    let full = point.as_bytes();
    // `full` is 0x04 || X(32) || Y(32); strip the uncompressed-point tag.
    let mut out = [0u8; 64];
    out.copy_from_slice(&full[1..]);
    PublicKey(out)
}

impl FileSecp256k1Backend {
    /// Load or create a secp256k1 key file.
    ///
    /// If `ANNOUNCE_KEY_PASSPHRASE` is set, the key file is encrypted at
    /// rest.
    pub fn load_or_create(path: &Path) -> Result<Self, KeystoreError> {
        let pass = env_first(&["ANNOUNCE_KEY_PASSPHRASE"]);

        if path.exists() {
            let bytes = fs::read(path).map_err(|_| KeystoreError::Io)?;
            let raw = if bytes.starts_with(KEY_FILE_MAGIC) {
                let Some(p) = pass.as_deref() else {
                    return Err(KeystoreError::MissingPassphrase);
                };
                decrypt_key_bytes(p.as_bytes(), &bytes)?
            } else {
                bytes
            };
            let signing_key = SigningKey::from_slice(&raw).map_err(|_| KeystoreError::InvalidKey)?;
            return Ok(Self { signing_key });
        }

        let mut rng = rand_core::OsRng;
        let signing_key = SigningKey::random(&mut rng);
        let mut raw = signing_key.to_bytes().to_vec();

        let on_disk = if let Some(p) = pass.as_deref() {
            let enc = encrypt_key_bytes(p.as_bytes(), &raw)?;
            raw.zeroize();
            enc
        } else {
            raw.clone()
        };
        atomic_write_private(path, &on_disk)?;
        raw.zeroize();

        Ok(Self { signing_key })
    }
}

impl SignerBackend for FileSecp256k1Backend {
    fn public_key(&self) -> PublicKey {
        public_key_bytes(&self.signing_key)
    }

    fn address(&self) -> Address {
        address_from_public_key(&self.public_key())
    }

    fn sign_hash(&self, hash: &[u8; 32]) -> Result<Signature, KeystoreError> {
        let (sig, recid): (EcdsaSignature, RecoveryId) = self
            .signing_key
            .sign_prehash(hash)
            .map_err(|_| KeystoreError::Crypto)?;
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recid.to_byte();
        Ok(Signature(out))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KeystoreError> {
        ecies::decrypt(&self.signing_key, ciphertext).map_err(|_| KeystoreError::Crypto)
    }
}

/// Token-bucket-style rate limiter (deterministic, no external clock
/// dependency beyond `Instant`).
#[derive(Debug)]
struct RateLimiter {
    window_start: Instant,
    count: u32,
    limit_per_sec: u32,
}

impl RateLimiter {
    fn new(limit_per_sec: u32) -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
            limit_per_sec,
        }
    }

    fn allow(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.count = 0;
        }
        if self.count >= self.limit_per_sec {
            return false;
        }
        self.count = self.count.saturating_add(1);
        true
    }
}

/// Keystore wrapper: rate limiting + audit log around a `SignerBackend`.
pub struct Keystore<B: SignerBackend> {
    backend: B,
    limiter: Mutex<RateLimiter>,
    audit_path: PathBuf,
}

impl Keystore<FileSecp256k1Backend> {
    /// Load or create keystore in `data_dir/validator.key`, auditing to
    /// `data_dir/audit.log`.
    pub fn open(data_dir: &str) -> Result<Self, KeystoreError> {
        let mut key_path = PathBuf::from(data_dir);
        key_path.push("validator.key");
        let mut audit_path = PathBuf::from(data_dir);
        audit_path.push("audit.log");

        let backend = FileSecp256k1Backend::load_or_create(&key_path)?;
        Ok(Self {
            backend,
            limiter: Mutex::new(RateLimiter::new(10_000)),
            audit_path,
        })
    }
}

impl<B: SignerBackend> Keystore<B> {
    /// Public key.
    pub fn public_key(&self) -> PublicKey {
        self.backend.public_key()
    }

    /// Validator address.
    pub fn address(&self) -> Address {
        self.backend.address()
    }

    /// Sign a 32-byte digest with rate limiting and an audit trail
    /// (best-effort).
    pub fn sign_hash(&self, hash: &[u8; 32]) -> Result<Signature, KeystoreError> {
        let mut guard = self.limiter.lock().map_err(|_| KeystoreError::RateLimited)?;
        if !guard.allow() {
            return Err(KeystoreError::RateLimited);
        }
        let _ = append_audit(&self.audit_path, "sign", hash);
        self.backend.sign_hash(hash)
    }

    /// Sign arbitrary message bytes (hashes with Keccak-256 first).
    pub fn sign(&self, msg: &[u8]) -> Result<Signature, KeystoreError> {
        self.sign_hash(&keccak256(msg))
    }

    /// Decrypt an ECIES ciphertext addressed to this key.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KeystoreError> {
        let mut guard = self.limiter.lock().map_err(|_| KeystoreError::RateLimited)?;
        if !guard.allow() {
            return Err(KeystoreError::RateLimited);
        }
        let _ = append_audit(&self.audit_path, "decrypt", ciphertext);
        self.backend.decrypt(ciphertext)
    }
}

/// Verify a recoverable signature against a known public key.
pub fn verify_signature(pk: &PublicKey, hash: &[u8; 32], sig: &Signature) -> Result<(), KeystoreError> {
    let (address, recovered) = recover_address(hash, sig)?;
    let expected = address_from_public_key(pk);
    if address == expected && recovered.0 == pk.0 {
        Ok(())
    } else {
        Err(KeystoreError::BadSignature)
    }
}

/// Recover the signing address and public key from a signature over
/// `hash`.
pub fn recover_address(hash: &[u8; 32], sig: &Signature) -> Result<(Address, PublicKey), KeystoreError> {
    let ecdsa_sig = EcdsaSignature::from_slice(&sig.0[..64]).map_err(|_| KeystoreError::BadSignature)?;
    let recid = RecoveryId::from_byte(sig.0[64]).ok_or(KeystoreError::BadSignature)?;
    let verifying =
        VerifyingKey::recover_from_prehash(hash, &ecdsa_sig, recid).map_err(|_| KeystoreError::BadSignature)?;
    let point = verifying.to_encoded_point(false);
    let full = point.as_bytes();
    let mut pk = [0u8; 64];
    pk.copy_from_slice(&full[1..]);
    let pk = PublicKey(pk);
    Ok((address_from_public_key(&pk), pk))
}

fn append_audit(path: &Path, action: &str, msg: &[u8]) -> Result<(), KeystoreError> {
    rotate_audit_if_needed(path);
    let digest = keccak256(msg);
    let line = format!(
        "{{\"action\":\"{}\",\"msg_keccak256\":\"{}\"}}\n",
        action,
        hex::encode(digest)
    );
    let mut f = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|_| KeystoreError::Io)?;
    set_private_perms_best_effort(path);
    f.write_all(line.as_bytes()).map_err(|_| KeystoreError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_recover_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let ks = Keystore::open(dir.path().to_str().unwrap()).unwrap();
        let msg = b"hello announce";
        let hash = keccak256(msg);
        let sig = ks.sign_hash(&hash).unwrap();
        let (addr, pk) = recover_address(&hash, &sig).unwrap();
        assert_eq!(addr, ks.address());
        assert_eq!(pk.0, ks.public_key().0);
        verify_signature(&pk, &hash, &sig).unwrap();
    }

    #[test]
    fn tampered_signature_fails_to_match() {
        let dir = tempfile::tempdir().unwrap();
        let ks = Keystore::open(dir.path().to_str().unwrap()).unwrap();
        let hash = keccak256(b"msg");
        let mut sig = ks.sign_hash(&hash).unwrap();
        sig.0[0] ^= 0xff;
        let other_hash = keccak256(b"other");
        // Either recovery fails outright or recovers a different address;
        // either way it must not equal the signer for a different hash.
        if let Ok((addr, _)) = recover_address(&other_hash, &sig) {
            assert_ne!(addr, ks.address());
        }
    }

    #[test]
    fn reload_persists_identity() {
        let dir = tempfile::tempdir().unwrap();
        let addr1 = Keystore::open(dir.path().to_str().unwrap()).unwrap().address();
        let addr2 = Keystore::open(dir.path().to_str().unwrap()).unwrap().address();
        assert_eq!(addr1, addr2);
    }
}
