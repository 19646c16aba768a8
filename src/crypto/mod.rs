#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Cryptographic primitives: secp256k1 identity, Keccak-256 derivation,
//! ECIES, and the on-disk keystore.

pub mod address;
pub mod domain;
pub mod ecies;
pub mod keystore;
