#![no_main]

//! Envelope decoding must never panic on arbitrary bytes, and a
//! successfully decoded envelope must survive a re-encode/re-decode
//! cycle unchanged.

use istanbul_announce::codec::Envelope;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = Envelope::decode(data) {
        let re_encoded = envelope.encode();
        let re_decoded = Envelope::decode(&re_encoded).expect("a decoded envelope must re-decode");
        assert_eq!(envelope.code, re_decoded.code);
        assert_eq!(envelope.address, re_decoded.address);
        assert_eq!(envelope.msg, re_decoded.msg);
        assert_eq!(envelope.signature, re_decoded.signature);
    }
});
