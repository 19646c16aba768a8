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

//! ECIES over secp256k1, matching the devp2p/Ethereum convention named in
//! spec §6: concat-KDF (NIST SP 800-56A) with SHA-256 produces a 32-byte
//! (2*KeyLen) key stream split into a 16-byte AES-128 key and a 16-byte
//! `Km` half; the HMAC-SHA256 key is `Sha256(Km)`, not `Km` itself. Cipher
//! is AES-128-CTR, no s1/s2 associated data.
//!
//! Wire format of a ciphertext: `ephemeral_pubkey(65, uncompressed SEC1)
//! || iv(16) || aes_ciphertext(len(plaintext)) || mac(32)`.

use aes::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hmac::{Hmac, Mac};
use k256::ecdsa::SigningKey;
use k256::{PublicKey as K256PublicKey, SecretKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::PublicKey;

type Aes128Ctr = Ctr128BE<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

const EPH_PUBKEY_LEN: usize = 65;
const IV_LEN: usize = 16;
const MAC_LEN: usize = 32;
const KDF_KEY_LEN: usize = 16 + 16; // AES-128 key + raw material for the HMAC key

/// ECIES errors.
#[derive(Debug, Error)]
pub enum EciesError {
    /// Public key bytes were not a valid secp256k1 point.
    #[error("invalid public key")]
    InvalidPublicKey,
    /// Ciphertext shorter than the minimum envelope size.
    #[error("ciphertext too short")]
    Truncated,
    /// MAC did not match.
    #[error("mac mismatch")]
    BadMac,
    /// Random generation or curve arithmetic failed.
    #[error("crypto failure")]
    Crypto,
}

/// NIST SP 800-56A concat-KDF with SHA-256, producing `out_len` bytes of
/// key material from the ECDH shared secret. No optional `s1` context is
/// used (empty), matching spec §6.
fn concat_kdf(shared_secret: &[u8], out_len: usize) -> Vec<u8> {
    let hash_len = 32usize;
    let reps = out_len.div_ceil(hash_len) as u32;
    let mut out = Vec::with_capacity(out_len);
    for counter in 1..=reps {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_be_bytes());
        hasher.update(shared_secret);
        out.extend_from_slice(&hasher.finalize());
    }
    out.truncate(out_len);
    out
}

fn public_key_to_k256(pk: &PublicKey) -> Result<K256PublicKey, EciesError> {
    let mut uncompressed = [0u8; 65];
    uncompressed[0] = 0x04;
    uncompressed[1..].copy_from_slice(&pk.0);
    K256PublicKey::from_sec1_bytes(&uncompressed).map_err(|_| EciesError::InvalidPublicKey)
}

fn k256_to_public_key(pk: &K256PublicKey) -> PublicKey {
    let point = pk.to_encoded_point(false);
    let full = point.as_bytes();
    let mut out = [0u8; 64];
    out.copy_from_slice(&full[1..]);
    PublicKey(out)
}

/// Encrypt `plaintext` to `recipient`'s public key using an ephemeral
/// keypair (fresh per call).
pub fn encrypt(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, EciesError> {
    let recipient_pk = public_key_to_k256(recipient)?;

    let mut rng = rand_core::OsRng;
    let ephemeral_secret = SecretKey::random(&mut rng);
    let ephemeral_public = ephemeral_secret.public_key();

    let shared = k256::ecdh::diffie_hellman(&ephemeral_secret.to_nonzero_scalar(), recipient_pk.as_affine());
    let shared_bytes = shared.raw_secret_bytes();

    let key_material = concat_kdf(shared_bytes.as_slice(), KDF_KEY_LEN);
    let (enc_key, km) = key_material.split_at(16);
    let mac_key = Sha256::digest(km);

    let mut iv = [0u8; IV_LEN];
    ring::rand::SecureRandom::fill(&ring::rand::SystemRandom::new(), &mut iv).map_err(|_| EciesError::Crypto)?;

    let mut buf = plaintext.to_vec();
    let mut cipher = Aes128Ctr::new(enc_key.into(), (&iv).into());
    cipher.apply_keystream(&mut buf);

    let mut mac = HmacSha256::new_from_slice(&mac_key).map_err(|_| EciesError::Crypto)?;
    mac.update(&iv);
    mac.update(&buf);
    let tag = mac.finalize().into_bytes();

    let eph_pubkey = k256_to_public_key(&ephemeral_public);
    let mut out = Vec::with_capacity(EPH_PUBKEY_LEN + IV_LEN + buf.len() + MAC_LEN);
    out.push(0x04);
    out.extend_from_slice(&eph_pubkey.0);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&buf);
    out.extend_from_slice(&tag);
    Ok(out)
}

/// Decrypt a ciphertext produced by `encrypt`, using the recipient's
/// static secret key.
pub fn decrypt(recipient_key: &SigningKey, ciphertext: &[u8]) -> Result<Vec<u8>, EciesError> {
    if ciphertext.len() < EPH_PUBKEY_LEN + IV_LEN + MAC_LEN {
        return Err(EciesError::Truncated);
    }
    let eph_pubkey_bytes = &ciphertext[..EPH_PUBKEY_LEN];
    let iv = &ciphertext[EPH_PUBKEY_LEN..EPH_PUBKEY_LEN + IV_LEN];
    let tag = &ciphertext[ciphertext.len() - MAC_LEN..];
    let body = &ciphertext[EPH_PUBKEY_LEN + IV_LEN..ciphertext.len() - MAC_LEN];

    let ephemeral_public = K256PublicKey::from_sec1_bytes(eph_pubkey_bytes).map_err(|_| EciesError::InvalidPublicKey)?;
    let secret_scalar = SecretKey::from_slice(&recipient_key.to_bytes()).map_err(|_| EciesError::Crypto)?;

    let shared = k256::ecdh::diffie_hellman(&secret_scalar.to_nonzero_scalar(), ephemeral_public.as_affine());
    let shared_bytes = shared.raw_secret_bytes();

    let key_material = concat_kdf(shared_bytes.as_slice(), KDF_KEY_LEN);
    let (enc_key, km) = key_material.split_at(16);
    let mac_key = Sha256::digest(km);

    let mut mac = HmacSha256::new_from_slice(&mac_key).map_err(|_| EciesError::Crypto)?;
    mac.update(iv);
    mac.update(body);
    mac.verify_slice(tag).map_err(|_| EciesError::BadMac)?;

    let mut buf = body.to_vec();
    let mut cipher = Aes128Ctr::new(enc_key.into(), iv.into());
    cipher.apply_keystream(&mut buf);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::address::address_from_public_key;
    use k256::ecdsa::SigningKey;

    fn public_key_of(sk: &SigningKey) -> PublicKey {
        let vk = sk.verifying_key();
        let point = vk.to_encoded_point(false);
        let full = point.as_bytes();
        let mut out = [0u8; 64];
        out.copy_from_slice(&full[1..]);
        PublicKey(out)
    }

    #[test]
    fn roundtrip() {
        let mut rng = rand_core::OsRng;
        let sk = SigningKey::random(&mut rng);
        let pk = public_key_of(&sk);
        let _ = address_from_public_key(&pk);

        let plaintext = b"enode://aabbcc@10.0.0.1:30303";
        let ct = encrypt(&pk, plaintext).unwrap();
        let pt = decrypt(&sk, &ct).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn wrong_key_fails() {
        let mut rng = rand_core::OsRng;
        let sk = SigningKey::random(&mut rng);
        let pk = public_key_of(&sk);
        let other_sk = SigningKey::random(&mut rng);

        let ct = encrypt(&pk, b"secret").unwrap();
        assert!(decrypt(&other_sk, &ct).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_mac() {
        let mut rng = rand_core::OsRng;
        let sk = SigningKey::random(&mut rng);
        let pk = public_key_of(&sk);

        let mut ct = encrypt(&pk, b"secret payload").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xff;
        assert!(matches!(decrypt(&sk, &ct), Err(EciesError::BadMac)));
    }
}
