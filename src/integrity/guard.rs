// src/integrity/guard.rs
//! HMAC integrity guard for issued keys.
//!
//! Binds every issued key to a keyed HMAC-SHA256 tag so that redemption
//! attempts with guessed or forged keys fail before the store is ever
//! consulted. Keys are minted as `BODY.TAG` where BODY is 16 characters of
//! `[A-Z0-9]` and TAG is the URL-safe base64 encoding of the truncated
//! HMAC tag.
//!
//! Uses the following cryptographic primitives:
//! - HMAC-SHA256 (via `ring`)
//! - Constant-time comparison (via `ring::constant_time`)
//! - Cryptographically secure random number generation (via `rand`)

use rand::Rng;
use ring::constant_time::verify_slices_are_equal;
use ring::hmac;

/// Characters used for the random key body (matches the issued-key
/// alphabet users type in).
const KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of the random key body in characters.
const KEY_BODY_LEN: usize = 16;

/// HMAC tag bytes kept after truncation (128-bit tags).
const TAG_LEN: usize = 16;

/// Separator between key body and signature tag.
const SEPARATOR: char = '.';

/// Keyed signer/verifier for issued keys.
///
/// Holds the process-wide HMAC secret, loaded once at startup and passed
/// into this constructor. The secret is never exposed or logged.
///
/// # Security Notes
/// - Signatures are deterministic: the same body always yields the same tag
/// - Verification is constant-time and does not leak partial-match timing
/// - Without the secret, forging a redeemable key requires breaking
///   HMAC-SHA256
pub struct IntegrityGuard {
    /// HMAC-SHA256 signing key derived from the configured secret
    key: hmac::Key,
}

impl IntegrityGuard {
    /// Creates a new guard from the shared secret.
    ///
    /// # Arguments
    /// * `secret` - Opaque secret bytes injected by process configuration
    pub fn new(secret: &[u8]) -> Self {
        IntegrityGuard {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    /// Computes the signature tag for a key body.
    ///
    /// # Arguments
    /// * `body` - The random key body (the part before the separator)
    ///
    /// # Returns
    /// URL-safe base64 encoding of the truncated HMAC-SHA256 tag.
    pub fn sign(&self, body: &str) -> String {
        let tag = hmac::sign(&self.key, body.as_bytes());
        base64::encode_config(&tag.as_ref()[..TAG_LEN], base64::URL_SAFE_NO_PAD)
    }

    /// Verifies a signature tag against a key body.
    ///
    /// # Arguments
    /// * `body` - The key body the tag claims to sign
    /// * `tag` - URL-safe base64 tag to check
    ///
    /// # Returns
    /// `true` only if the tag decodes and matches the recomputed HMAC.
    /// The byte comparison is constant-time; tag length is not secret.
    pub fn verify(&self, body: &str, tag: &str) -> bool {
        let presented = match base64::decode_config(tag, base64::URL_SAFE_NO_PAD) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let expected = hmac::sign(&self.key, body.as_bytes());
        verify_slices_are_equal(&expected.as_ref()[..TAG_LEN], &presented).is_ok()
    }

    /// Mints a fresh signed key.
    ///
    /// # Returns
    /// A key string in `BODY.TAG` form with a random 16-character body and
    /// its HMAC tag. The body is drawn from a CSPRNG.
    pub fn mint(&self) -> String {
        let mut rng = rand::thread_rng();
        let body: String = (0..KEY_BODY_LEN)
            .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
            .collect();
        let tag = self.sign(&body);
        format!("{}{}{}", body, SEPARATOR, tag)
    }

    /// Verifies a full `BODY.TAG` key string.
    ///
    /// # Arguments
    /// * `key` - The key string as presented by the redeeming user
    ///
    /// # Returns
    /// `false` if the separator is missing, the tag is malformed, or the
    /// HMAC does not match. This check never touches the store.
    pub fn verify_key(&self, key: &str) -> bool {
        match key.split_once(SEPARATOR) {
            Some((body, tag)) => self.verify(body, tag),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> IntegrityGuard {
        IntegrityGuard::new(b"test-secret")
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let g = guard();
        let tag = g.sign("ABC123");
        assert!(g.verify("ABC123", &tag));
    }

    #[test]
    fn test_sign_is_deterministic() {
        let g = guard();
        assert_eq!(g.sign("ABC123"), g.sign("ABC123"));
    }

    #[test]
    fn test_verify_rejects_mutated_tag() {
        let g = guard();
        let tag = g.sign("ABC123");

        // Flip each character of the tag in turn; every mutation must fail.
        for i in 0..tag.len() {
            let mut mutated: Vec<char> = tag.chars().collect();
            mutated[i] = if mutated[i] == 'A' { 'B' } else { 'A' };
            let mutated: String = mutated.into_iter().collect();
            if mutated != tag {
                assert!(!g.verify("ABC123", &mutated), "mutation at {} accepted", i);
            }
        }
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let tag = guard().sign("ABC123");
        let other = IntegrityGuard::new(b"different-secret");
        assert!(!other.verify("ABC123", &tag));
    }

    #[test]
    fn test_verify_rejects_malformed_tag() {
        let g = guard();
        assert!(!g.verify("ABC123", "not!base64!!"));
        assert!(!g.verify("ABC123", ""));
    }

    #[test]
    fn test_mint_produces_verifiable_key() {
        let g = guard();
        let key = g.mint();
        assert!(g.verify_key(&key));

        let (body, _) = key.split_once('.').unwrap();
        assert_eq!(body.len(), KEY_BODY_LEN);
        assert!(body.bytes().all(|b| KEY_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_verify_key_rejects_missing_tag() {
        let g = guard();
        assert!(!g.verify_key("ABC123"));
        assert!(!g.verify_key(""));
        assert!(!g.verify_key("ABC123."));
    }
}
