#![no_main]

//! `QueryEnodeMsg` decoding must never panic on arbitrary RLP bytes.

use istanbul_announce::codec::QueryEnodeMsg;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = QueryEnodeMsg::decode(data);
});
