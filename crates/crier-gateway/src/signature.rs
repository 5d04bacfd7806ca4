//! Webhook signature validation.
//!
//! The keyed hash is computed over the raw, unparsed body bytes; any
//! transformation before hashing would invalidate the signature. Mismatch is
//! a `false`, never an error: the caller acknowledges the request either way
//! so the shared secret cannot be probed.

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Header carrying the hex-encoded HMAC-SHA-256 of the request body.
pub const SIGNATURE_HEADER: &str = "X-Phabricator-Webhook-Signature";

/// True iff `presented_hex` is the HMAC-SHA-256 of `raw_body` under
/// `secret`. Comparison happens on the decoded bytes in constant time.
pub fn verify_signature(secret: &str, raw_body: &[u8], presented_hex: &str) -> bool {
    let Ok(signature) = decode_hex(presented_hex) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&signature).is_ok()
}

fn decode_hex(raw: &str) -> Result<Vec<u8>, ()> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() % 2 != 0 {
        return Err(());
    }
    (0..trimmed.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&trimmed[index..index + 2], 16).map_err(|_| ()))
        .collect()
}
