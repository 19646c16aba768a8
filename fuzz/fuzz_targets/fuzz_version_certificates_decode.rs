#![no_main]

//! `VersionCertificatesMsg` decoding must never panic on arbitrary RLP
//! bytes, including deeply nested or truncated lists.

use istanbul_announce::codec::VersionCertificatesMsg;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = VersionCertificatesMsg::decode(data);
});
