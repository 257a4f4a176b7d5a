//! RFC 6238 time-based one-time passwords (HMAC-SHA1, 30 second step, 6 digits).

use chrono::{DateTime, Utc};
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

pub const SECRET_BYTES: usize = 20;
pub const STEP_SECONDS: i64 = 30;
pub const DIGITS: u32 = 6;
/// Accepted clock drift, in steps, on either side of the current one.
pub const SKEW_STEPS: i64 = 1;

/// Fresh 160-bit secret, base32 without padding.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

fn decode_secret(secret: &str) -> Option<Vec<u8>> {
    let cleaned: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    BASE32_NOPAD.decode(cleaned.as_bytes()).ok()
}

pub fn counter_at(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(STEP_SECONDS)
}

fn hotp(key: &[u8], counter: u64) -> Option<u32> {
    let mut mac = HmacSha1::new_from_slice(key).ok()?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | (digest[offset + 3] as u32);

    Some(binary % 10u32.pow(DIGITS))
}

/// Code for a given step counter. `None` when the secret is not valid base32.
pub fn code_at(secret: &str, counter: i64) -> Option<String> {
    if counter < 0 {
        return None;
    }
    let key = decode_secret(secret)?;
    let value = hotp(&key, counter as u64)?;
    Some(format!("{:0width$}", value, width = DIGITS as usize))
}

pub fn current_code(secret: &str, now: DateTime<Utc>) -> Option<String> {
    code_at(secret, counter_at(now))
}

/// Check `code` against the steps in `[now - skew, now + skew]`.
pub fn verify_at(secret: &str, code: &str, now: DateTime<Utc>, skew: i64) -> bool {
    let code = code.trim();
    if code.len() != DIGITS as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let Some(key) = decode_secret(secret) else {
        return false;
    };

    let current = counter_at(now);
    let mut matched = false;
    for counter in (current - skew)..=(current + skew) {
        if counter < 0 {
            continue;
        }
        if let Some(value) = hotp(&key, counter as u64) {
            let expected = format!("{:0width$}", value, width = DIGITS as usize);
            // Every candidate is compared so timing does not reveal which step matched.
            matched |= bool::from(expected.as_bytes().ct_eq(code.as_bytes()));
        }
    }
    matched
}

/// `otpauth://` URI understood by authenticator apps.
pub fn provisioning_uri(issuer: &str, account: &str, secret: &str) -> String {
    format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}&algorithm=SHA1&digits={}&period={}",
        urlencoding::encode(issuer),
        urlencoding::encode(account),
        secret,
        urlencoding::encode(issuer),
        DIGITS,
        STEP_SECONDS
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // ASCII "12345678901234567890", the RFC 6238 SHA-1 test key.
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn matches_rfc_vectors() {
        assert_eq!(current_code(RFC_SECRET, at(59)).unwrap(), "287082");
        assert_eq!(current_code(RFC_SECRET, at(1_111_111_109)).unwrap(), "081804");
        assert_eq!(current_code(RFC_SECRET, at(1_234_567_890)).unwrap(), "005924");
        assert_eq!(current_code(RFC_SECRET, at(2_000_000_000)).unwrap(), "279037");
    }

    #[test]
    fn accepts_one_step_of_drift() {
        let now = at(1_700_000_000);
        let counter = counter_at(now);

        let previous = code_at(RFC_SECRET, counter - 1).unwrap();
        let next = code_at(RFC_SECRET, counter + 1).unwrap();
        let stale = code_at(RFC_SECRET, counter - 2).unwrap();

        assert!(verify_at(RFC_SECRET, &previous, now, SKEW_STEPS));
        assert!(verify_at(RFC_SECRET, &next, now, SKEW_STEPS));
        assert!(!verify_at(RFC_SECRET, &stale, now, SKEW_STEPS));
    }

    #[test]
    fn rejects_malformed_input() {
        let now = at(59);
        assert!(!verify_at(RFC_SECRET, "28708", now, SKEW_STEPS));
        assert!(!verify_at(RFC_SECRET, "28708a", now, SKEW_STEPS));
        assert!(!verify_at("not base32!", "287082", now, SKEW_STEPS));
        assert!(verify_at(&RFC_SECRET.to_lowercase(), " 287082 ", now, SKEW_STEPS));
    }

    #[test]
    fn generated_secret_is_160_bits_of_base32() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 32);
        assert_eq!(decode_secret(&secret).unwrap().len(), SECRET_BYTES);
        assert_ne!(secret, generate_secret());
    }

    #[test]
    fn provisioning_uri_escapes_labels() {
        let uri = provisioning_uri("License Console", "admin@example.com", "ABC");
        assert!(uri.starts_with("otpauth://totp/License%20Console:admin%40example.com?"));
        assert!(uri.contains("secret=ABC"));
        assert!(uri.contains("issuer=License%20Console"));
    }
}
