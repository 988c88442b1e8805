//! Fuzz harness for `RequestHeader::decode`.
//!
//! Arbitrary bytes must either decode into a header whose fields fit the
//! fixed layout or be rejected; decoding never panics.

#![no_main]
use libfuzzer_sys::fuzz_target;
use sealkeep_daemon::protocol::{HEADER_LEN, RequestHeader};

fuzz_target!(|data: &[u8]| {
    let Ok(header) = RequestHeader::decode(data) else {
        return;
    };

    assert_eq!(data.len(), HEADER_LEN);
    assert!(!header.path.contains('\0'));

    // A decoded header re-encodes to the same command and length fields.
    if let Ok(encoded) = header.encode() {
        assert_eq!(encoded.len(), HEADER_LEN);
        assert_eq!(encoded[..4], data[..4]);
    }
});
