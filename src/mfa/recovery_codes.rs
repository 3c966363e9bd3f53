//! Recovery code generation and verification helpers.
//!
//! Codes use an alphabet without ambiguous glyphs and are displayed in
//! grouped form (`XXXX-XXXX-XXXX`). Only Argon2id hashes, salted and mixed
//! with a server-side pepper, are ever stored.

use anyhow::{Context, Result, anyhow};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretBox};
use uuid::Uuid;

pub const DEFAULT_CODE_COUNT: usize = 10;
const CODE_LEN: usize = 12;
const CODE_GROUP_SIZE: usize = 4;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Server-side pepper mixed into every recovery code hash.
pub struct Pepper(SecretBox<Vec<u8>>);

impl Pepper {
    /// Random ephemeral pepper for development and tests. Stored hashes
    /// become unverifiable after a restart.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(SecretBox::new(Box::new(bytes)))
    }

    /// Load a pepper from its base64 representation.
    ///
    /// # Errors
    /// Returns an error when the input is not base64 or is empty.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| anyhow!("recovery pepper is not valid base64"))?;
        if bytes.is_empty() {
            return Err(anyhow!("recovery pepper must not be empty"));
        }
        Ok(Self(SecretBox::new(Box::new(bytes))))
    }

    fn bytes(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for Pepper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pepper(***)")
    }
}

/// A freshly generated batch: plaintext codes (returned to the caller exactly
/// once) and the hashes that get stored.
#[derive(Debug)]
pub struct GeneratedCodes {
    pub batch_id: Uuid,
    pub codes: Vec<String>,
    pub hashes: Vec<String>,
}

/// Generate `count` recovery codes hashed under `pepper`.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn generate_batch(count: usize, pepper: &Pepper) -> Result<GeneratedCodes> {
    let mut codes = Vec::with_capacity(count);
    let mut hashes = Vec::with_capacity(count);
    for _ in 0..count {
        let code = generate_code(&mut OsRng)?;
        let hash = hash_code(&code, pepper)?;
        codes.push(code);
        hashes.push(hash);
    }
    Ok(GeneratedCodes {
        batch_id: Uuid::new_v4(),
        codes,
        hashes,
    })
}

/// Strip separators, uppercase, and validate shape.
///
/// # Errors
/// Returns an error when the input cannot be a recovery code.
pub fn normalize(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != CODE_LEN {
        return Err(anyhow!("invalid recovery code length"));
    }
    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| CODE_ALPHABET.contains(ch))
    {
        return Err(anyhow!("invalid recovery code characters"));
    }
    Ok(normalized)
}

/// Render a normalized code in grouped display form.
///
/// # Errors
/// Returns an error when the input has the wrong length.
pub fn format_grouped(normalized: &str) -> Result<String> {
    if normalized.len() != CODE_LEN {
        return Err(anyhow!("invalid recovery code length"));
    }
    let mut grouped = String::with_capacity(CODE_LEN + CODE_LEN / CODE_GROUP_SIZE);
    for (index, chunk) in normalized.as_bytes().chunks(CODE_GROUP_SIZE).enumerate() {
        if index > 0 {
            grouped.push('-');
        }
        grouped.push_str(std::str::from_utf8(chunk).context("invalid recovery code chunk")?);
    }
    Ok(grouped)
}

/// Verify a submitted code against one stored hash.
///
/// # Errors
/// Returns an error when the input is malformed or the stored hash cannot be
/// parsed.
pub fn verify_code(submitted: &str, stored_hash: &str, pepper: &Pepper) -> Result<bool> {
    let normalized = normalize(submitted)?;
    let parsed =
        PasswordHash::new(stored_hash).map_err(|_| anyhow!("invalid recovery code hash"))?;
    Ok(argon2id(pepper)?
        .verify_password(normalized.as_bytes(), &parsed)
        .is_ok())
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut raw = [0u8; CODE_LEN];
    rng.fill_bytes(&mut raw);
    let mut normalized = String::with_capacity(CODE_LEN);
    for byte in raw {
        let index = usize::from(byte) % CODE_ALPHABET.len();
        if let Some(&alphabet_byte) = CODE_ALPHABET.get(index) {
            normalized.push(alphabet_byte as char);
        }
    }
    format_grouped(&normalized)
}

fn hash_code(code: &str, pepper: &Pepper) -> Result<String> {
    let normalized = normalize(code)?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2id(pepper)?
        .hash_password(normalized.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash recovery code"))?
        .to_string();
    Ok(hash)
}

fn argon2id(pepper: &Pepper) -> Result<Argon2<'_>> {
    Argon2::new_with_secret(
        pepper.bytes(),
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::default(),
    )
    .map_err(|_| anyhow!("failed to initialize Argon2id"))
}
