// SPDX-License-Identifier: MIT OR Apache-2.0
//! HMAC-SHA256 over the raw request body.
//!
//! The construction is built directly over `sha2`; the comparison is
//! constant-time.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const BLOCK_SIZE: usize = 64;

/// Compute HMAC-SHA256 (RFC 2104) of `message` under `key`.
#[must_use]
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut block_key = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        block_key[..32].copy_from_slice(&Sha256::digest(key));
    } else {
        block_key[..key.len()].copy_from_slice(key);
    }

    let mut inner = Sha256::new();
    let ipad: Vec<u8> = block_key.iter().map(|b| b ^ 0x36).collect();
    inner.update(&ipad);
    inner.update(message);
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    let opad: Vec<u8> = block_key.iter().map(|b| b ^ 0x5c).collect();
    outer.update(&opad);
    outer.update(inner_hash);

    outer.finalize().into()
}

/// Render the `X-Hub-Signature` value for a body.
#[must_use]
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    format!("sha256={}", hex::encode(hmac_sha256(secret.as_bytes(), body)))
}

/// Verify a `sha256=<hex>` signature header against the raw body in
/// constant time. The `sha256=` prefix is optional, as some backends
/// send the bare digest.
#[must_use]
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let supplied = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(supplied) = hex::decode(supplied) else {
        return false;
    };
    let expected = hmac_sha256(secret.as_bytes(), body);
    supplied.len() == expected.len() && bool::from(supplied.ct_eq(&expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4231 test vectors pin the construction.
    #[test]
    fn rfc4231_test_case_1() {
        let key = [0x0b_u8; 20];
        let mac = hmac_sha256(&key, b"Hi There");
        assert_eq!(
            hex::encode(mac),
            "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7"
        );
    }

    #[test]
    fn rfc4231_test_case_2() {
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn long_keys_are_hashed_first() {
        let key = [0xaa_u8; 131];
        let mac = hmac_sha256(&key, b"Test Using Larger Than Block-Size Key - Hash Key First");
        assert_eq!(
            hex::encode(mac),
            "60e431591ee0b67f0d8a26aacbf5b77f8e0bc6213728c5140546040f0ee37f54"
        );
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let body = br#"{"webhookEvent":"jira:issue_created"}"#;
        let header = sign_body("s3cret", body);
        assert!(header.starts_with("sha256="));
        assert!(verify_signature("s3cret", body, &header));
    }

    #[test]
    fn tampered_body_or_wrong_secret_fails() {
        let body = b"payload";
        let header = sign_body("s3cret", body);
        assert!(!verify_signature("s3cret", b"payload2", &header));
        assert!(!verify_signature("other", body, &header));
        assert!(!verify_signature("s3cret", body, "sha256=nothex"));
    }

    #[test]
    fn bare_digest_without_prefix_is_accepted() {
        let body = b"payload";
        let bare = hex::encode(hmac_sha256(b"s3cret", body));
        assert!(verify_signature("s3cret", body, &bare));
    }
}
