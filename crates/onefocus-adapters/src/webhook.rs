//! HMAC-SHA256 verification of inbound webhook payloads.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn verify_hex_digest(secret: &str, body: &[u8], hex_signature: &str) -> bool {
    let Ok(expected) = hex::decode(hex_signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Checks a `sha256=<hex>` header over the raw request body.
pub fn verify_github_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(header) = header else {
        return false;
    };
    match header.split_once('=') {
        Some(("sha256", sig)) if !sig.is_empty() => verify_hex_digest(secret, body, sig),
        _ => false,
    }
}

/// Accepts `<algo>=<hex>` or a bare hex digest. The algorithm label is not
/// checked; the digest is always HMAC-SHA256.
pub fn verify_clickup_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(header) = header else {
        return false;
    };
    let sig = match header.split_once('=') {
        Some((_, sig)) => sig,
        None => header,
    };
    !sig.is_empty() && verify_hex_digest(secret, body, sig)
}
