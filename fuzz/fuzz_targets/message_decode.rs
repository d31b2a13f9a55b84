//! Fuzz the consensus wire decoder with untrusted bytes.
//!
//! Goals:
//! - Decoding never panics or allocates past the configured limits.
//! - Anything that decodes re-encodes to a message that decodes the same.

#![no_main]

use {
    dbft_consensus::{DbftConfig, DecodeLimits, SignedMessage},
    libfuzzer_sys::fuzz_target,
};

fuzz_target!(|data: &[u8]| {
    let limits = DecodeLimits::from(&DbftConfig::default());
    let Ok(message) = SignedMessage::decode(data, &limits) else {
        return;
    };

    let encoded = message
        .encode()
        .expect("decoded message must re-encode");
    let decoded = SignedMessage::decode(&encoded, &limits)
        .expect("re-encoded message must decode");
    assert_eq!(decoded, message);
    assert!(encoded.len() <= limits.max_message_size);
});
