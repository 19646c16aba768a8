#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Networking: persistent libp2p identity used by the announce transport.

pub mod p2p_identity;
