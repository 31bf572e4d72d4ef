//! Keyed hashing and token generation primitives.
//!
//! Nothing in this module logs or returns raw secrets; callers receive
//! either high-entropy random material (to hand out exactly once) or
//! keyed hashes safe to persist.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, Rng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Normalize a caller-supplied identity (email) before hashing: trim and
/// Unicode-aware lowercase, so `" A@B.com "` and `"a@b.com"` collide.
pub fn normalize_identity(value: &str) -> String {
    value.trim().to_lowercase()
}

/// HMAC-SHA256 over `value`, encoded as unpadded base64url.
pub fn keyed_hash(secret: &str, value: &str) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(value.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Purpose-namespaced keyed hash: `derive(s, "ip", v)` hashes `"ip:" + v`,
/// so hashes minted for one purpose cannot be correlated against another.
pub fn derive(secret: &str, purpose: &str, value: &str) -> Result<String, anyhow::Error> {
    keyed_hash(secret, &format!("{}:{}", purpose, value))
}

/// Challenge-bound OTP hash. Binding the challenge id into the digest means
/// a stolen hash cannot be replayed against a different challenge.
pub fn otp_hash(secret: &str, otp: &str, challenge_id: Uuid) -> Result<String, anyhow::Error> {
    keyed_hash(secret, &format!("{}{}", otp, challenge_id))
}

/// Uniformly random 6-digit OTP, leading zeros included.
pub fn random_otp() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

/// High-entropy URL-safe bearer token (32 bytes from the OS RNG).
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Constant-time string comparison for hash checks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "an-absolutely-minimal-test-secret-string";

    #[test]
    fn normalization_collapses_case_and_whitespace() {
        assert_eq!(normalize_identity("  User@Example.COM "), "user@example.com");
        assert_eq!(normalize_identity("ÅSA@example.com"), "åsa@example.com");
    }

    #[test]
    fn keyed_hash_is_deterministic_and_secret_dependent() {
        let a = keyed_hash(SECRET, "a@b.com").unwrap();
        let b = keyed_hash(SECRET, "a@b.com").unwrap();
        let c = keyed_hash("different-secret-that-is-long-enough!!", "a@b.com").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        // Unpadded base64url of 32 bytes.
        assert_eq!(a.len(), 43);
        assert!(!a.contains('='));
    }

    #[test]
    fn derive_separates_purposes() {
        let ip = derive(SECRET, "ip", "10.0.0.1").unwrap();
        let ua = derive(SECRET, "ua", "10.0.0.1").unwrap();
        assert_ne!(ip, ua);
    }

    #[test]
    fn otp_hash_binds_challenge_id() {
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        let h1 = otp_hash(SECRET, "042099", c1).unwrap();
        let h2 = otp_hash(SECRET, "042099", c2).unwrap();
        assert_ne!(h1, h2);
        assert_eq!(h1, otp_hash(SECRET, "042099", c1).unwrap());
    }

    #[test]
    fn otp_is_exactly_six_ascii_digits() {
        for _ in 0..1000 {
            let otp = random_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn tokens_are_unique_and_urlsafe() {
        let t1 = random_token();
        let t2 = random_token();
        assert_ne!(t1, t2);
        assert_eq!(t1.len(), 43);
        assert!(t1
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
    }

    #[test]
    fn constant_time_eq_matches_semantics() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
