//! Auth cookie signing/verification (C9 support): opaque
//! `<nonce>.<hex-hmac>` value, `hmac = HMAC-SHA256(secret, nonce)`.
//!
//! Grounded on `sha2` already being a teacher-adjacent dependency
//! (`Tonksthebear-trybotster/cli`); `hmac` is the matching RustCrypto
//! family crate. Verification uses `hmac::Mac::verify_slice`, which is
//! constant-time by construction — no separate `subtle` dependency is
//! needed even though `subtle` appears in the `deepgram-wsh` manifest.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

const NONCE_BYTES: usize = 24;

/// Generate a fresh signed cookie value for the given secret.
pub fn sign_new(secret: &[u8]) -> String {
    let mut nonce = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut nonce);
    let nonce_hex = hex_encode(&nonce);
    let mac = compute_mac(secret, &nonce_hex);
    format!("{nonce_hex}.{}", hex_encode(&mac))
}

/// Verify a cookie value previously produced by `sign_new` against `secret`.
pub fn verify(secret: &[u8], cookie_value: &str) -> Result<(), AuthError> {
    let (nonce_hex, mac_hex) = cookie_value.split_once('.').ok_or(AuthError::Malformed)?;
    if nonce_hex.is_empty() || mac_hex.is_empty() {
        return Err(AuthError::Malformed);
    }
    let given_mac = hex_decode(mac_hex).map_err(|_| AuthError::BadNonce)?;

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(nonce_hex.as_bytes());
    mac.verify_slice(&given_mac).map_err(|_| AuthError::BadSignature)
}

fn compute_mac(secret: &[u8], nonce_hex: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(nonce_hex.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

/// Generate a random secret suitable for `--auth-secret` when the flag is
/// unset (process restarts invalidate all outstanding cookies).
pub fn random_secret() -> Vec<u8> {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_and_verifies_round_trip() {
        let secret = b"super-secret-key";
        let cookie = sign_new(secret);
        assert!(verify(secret, &cookie).is_ok());
    }

    #[test]
    fn rejects_wrong_secret() {
        let cookie = sign_new(b"secret-a");
        assert!(verify(b"secret-b", &cookie).is_err());
    }

    #[test]
    fn rejects_malformed_cookie() {
        assert!(verify(b"secret", "not-a-valid-cookie").is_err());
        assert!(verify(b"secret", "").is_err());
        assert!(verify(b"secret", ".").is_err());
    }

    #[test]
    fn rejects_odd_length_mac_without_panicking() {
        let cookie = sign_new(b"secret");
        let (nonce, mac) = cookie.split_once('.').unwrap();
        let truncated = format!("{nonce}.{}", &mac[..mac.len() - 1]);
        assert!(verify(b"secret", &truncated).is_err());
    }

    #[test]
    fn rejects_tampered_nonce() {
        let secret = b"super-secret-key";
        let cookie = sign_new(secret);
        let (nonce, mac) = cookie.split_once('.').unwrap();
        let tampered = format!("{}ff.{}", nonce, mac);
        assert!(verify(secret, &tampered).is_err());
    }
}
