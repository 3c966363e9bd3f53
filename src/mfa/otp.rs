//! Time-based and random one-time code primitives.
//!
//! Pure functions, no storage: attempt counting and single-use semantics are
//! the challenge layer's job. Out-of-range parameters are programming errors
//! and fail fast instead of returning a runtime `Result`.

use rand::{Rng, RngCore, rngs::OsRng};
use totp_rs::{Algorithm, TOTP};

/// RFC 6238 defaults used across the platform.
pub const TOTP_DIGITS: usize = 6;
pub const TOTP_STEP_SECONDS: u64 = 30;

/// Accept the current step plus one step of clock skew on either side.
const TOTP_SKEW_STEPS: u8 = 1;

/// 160-bit secrets, per the RFC 4226 recommendation.
const TOTP_SECRET_LEN: usize = 20;

/// Bounds for the out-of-band numeric code length.
pub const OTP_MIN_DIGITS: usize = 4;
pub const OTP_MAX_DIGITS: usize = 8;

/// Provisioning payload handed to the caller exactly once at enrollment.
#[derive(Debug, Clone)]
pub struct TotpProvisioning {
    pub secret_base32: String,
    pub otpauth_uri: String,
}

/// Generate a new random TOTP secret. Caller-opaque bytes.
#[must_use]
pub fn generate_totp_secret() -> Vec<u8> {
    let mut secret = [0u8; TOTP_SECRET_LEN];
    OsRng.fill_bytes(&mut secret);
    secret.to_vec()
}

/// Compute the code for `secret` at unix time `at`.
///
/// # Panics
/// Panics when `digits` is outside 6..=8, `step_seconds` is zero, or the
/// secret is shorter than 128 bits.
#[must_use]
pub fn compute_totp(secret: &[u8], step_seconds: u64, digits: usize, at: u64) -> String {
    totp(secret, digits, step_seconds, None, "user".to_string()).generate(at)
}

/// Check `code` against `secret` at unix time `at`, tolerating one step of
/// clock skew on either side. No side effects on failure.
///
/// # Panics
/// Panics when the secret is shorter than 128 bits.
#[must_use]
pub fn verify_totp(secret: &[u8], code: &str, at: u64) -> bool {
    totp(
        secret,
        TOTP_DIGITS,
        TOTP_STEP_SECONDS,
        None,
        "user".to_string(),
    )
    .check(code, at)
}

/// Build the QR-encodable otpauth:// URI and base32 secret for enrollment.
///
/// # Panics
/// Panics when the secret is shorter than 128 bits.
#[must_use]
pub fn provisioning(secret: &[u8], issuer: &str, account: &str) -> TotpProvisioning {
    // otpauth URIs reserve ':' as the issuer/account separator.
    let issuer = issuer.replace(':', "_");
    let account = account.replace(':', "_");
    let totp = totp(
        secret,
        TOTP_DIGITS,
        TOTP_STEP_SECONDS,
        Some(issuer),
        account,
    );
    TotpProvisioning {
        secret_base32: totp.get_secret_base32(),
        otpauth_uri: totp.get_url(),
    }
}

/// Generate a random numeric code for SMS/Email delivery.
///
/// # Panics
/// Panics when `digits` is outside 4..=8.
#[must_use]
pub fn generate_numeric_otp(digits: usize) -> String {
    assert!(
        (OTP_MIN_DIGITS..=OTP_MAX_DIGITS).contains(&digits),
        "numeric OTP length must be within {OTP_MIN_DIGITS}..={OTP_MAX_DIGITS}"
    );
    let mut rng = OsRng;
    (0..digits)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

fn totp(
    secret: &[u8],
    digits: usize,
    step_seconds: u64,
    issuer: Option<String>,
    account: String,
) -> TOTP {
    assert!((6..=8).contains(&digits), "TOTP digits must be within 6..=8");
    assert!(step_seconds > 0, "TOTP step must be positive");
    assert!(
        secret.len() * 8 >= 128,
        "TOTP secret must be at least 128 bits"
    );
    TOTP::new(
        Algorithm::SHA1,
        digits,
        TOTP_SKEW_STEPS,
        step_seconds,
        secret.to_vec(),
        issuer,
        account,
    )
    .expect("TOTP parameters validated above")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: [u8; 20] = [0xA7; 20];

    #[test]
    fn computed_code_verifies_at_same_time() {
        let at = 3_000; // step 100
        let code = compute_totp(&SECRET, TOTP_STEP_SECONDS, TOTP_DIGITS, at);
        assert_eq!(code.len(), TOTP_DIGITS);
        assert!(verify_totp(&SECRET, &code, at));
    }

    #[test]
    fn one_step_of_skew_is_tolerated() {
        let at = 3_000;
        let code = compute_totp(&SECRET, TOTP_STEP_SECONDS, TOTP_DIGITS, at);
        assert!(verify_totp(&SECRET, &code, at + TOTP_STEP_SECONDS));
        assert!(verify_totp(&SECRET, &code, at - TOTP_STEP_SECONDS));
    }

    #[test]
    fn two_steps_of_skew_are_rejected() {
        let at = 3_000;
        let code = compute_totp(&SECRET, TOTP_STEP_SECONDS, TOTP_DIGITS, at);
        assert!(!verify_totp(&SECRET, &code, at + 2 * TOTP_STEP_SECONDS));
        assert!(!verify_totp(&SECRET, &code, at - 2 * TOTP_STEP_SECONDS));
    }

    #[test]
    fn twenty_five_seconds_of_drift_stays_within_the_window() {
        let at = 12_345;
        let code = compute_totp(&SECRET, TOTP_STEP_SECONDS, TOTP_DIGITS, at);
        assert!(verify_totp(&SECRET, &code, at + 25));
        assert!(!verify_totp(&SECRET, &code, at + 120));
    }

    #[test]
    fn generated_secrets_are_distinct_and_sized() {
        let first = generate_totp_secret();
        let second = generate_totp_secret();
        assert_eq!(first.len(), 20);
        assert_ne!(first, second);
    }

    #[test]
    fn numeric_otp_is_digits_only() {
        let code = generate_numeric_otp(6);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|ch| ch.is_ascii_digit()));
    }

    #[test]
    fn provisioning_uri_carries_issuer_and_secret() {
        let payload = provisioning(&SECRET, "Gardi", "alice@example.com");
        assert!(payload.otpauth_uri.starts_with("otpauth://totp/"));
        assert!(payload.otpauth_uri.contains("Gardi"));
        assert!(!payload.secret_base32.is_empty());
    }

    #[test]
    #[should_panic(expected = "numeric OTP length")]
    fn numeric_otp_rejects_short_lengths() {
        let _ = generate_numeric_otp(3);
    }

    #[test]
    #[should_panic(expected = "numeric OTP length")]
    fn numeric_otp_rejects_long_lengths() {
        let _ = generate_numeric_otp(9);
    }

    #[test]
    #[should_panic(expected = "TOTP step")]
    fn zero_step_fails_fast() {
        let _ = compute_totp(&SECRET, 0, TOTP_DIGITS, 0);
    }
}
