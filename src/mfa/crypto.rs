//! Sealing of factor secrets at rest.
//!
//! TOTP secrets are encrypted with ChaCha20-Poly1305 under a master key
//! before they touch storage. The AAD binds each ciphertext to its
//! (tenant, user, factor) row so a sealed secret cannot be replayed into a
//! different record.

use anyhow::{Result, anyhow};
use base64::Engine;
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretBox};
use uuid::Uuid;

use super::{
    error::{Error, Result as MfaResult},
    models::{AuthContext, MfaFactor},
    otp,
};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// The key every factor secret is sealed under.
///
/// Held in a zeroizing container; never logged, never serialized.
pub struct MasterKey(SecretBox<[u8; KEY_LEN]>);

impl MasterKey {
    /// Random ephemeral key for development and tests. Secrets sealed with
    /// it do not survive a restart.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(SecretBox::new(Box::new(key)))
    }

    /// Load a key from its base64 representation (32 bytes once decoded).
    ///
    /// # Errors
    /// Returns an error when the input is not base64 or has the wrong size.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| anyhow!("master key is not valid base64"))?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| anyhow!("master key must be {KEY_LEN} bytes"))?;
        Ok(Self(SecretBox::new(Box::new(key))))
    }

    fn bytes(&self) -> &[u8; KEY_LEN] {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(***)")
    }
}

/// Seal `plaintext` under the master key. Returns `nonce || ciphertext`.
///
/// # Errors
/// Returns an error if encryption fails.
pub fn seal_secret(
    key: &MasterKey,
    plaintext: &[u8],
    tenant_id: Uuid,
    user_id: Uuid,
    factor_id: Uuid,
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.bytes())
        .map_err(|_| anyhow!("invalid master key length"))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = binding_aad(tenant_id, user_id, factor_id);
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|err| anyhow!("sealing failure: {err}"))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a sealed secret. Expects `nonce || ciphertext` produced by
/// [`seal_secret`] with the same binding identifiers.
///
/// # Errors
/// Returns an error if the blob is malformed, the key is wrong, or the
/// binding identifiers do not match.
pub fn open_secret(
    key: &MasterKey,
    sealed: &[u8],
    tenant_id: Uuid,
    user_id: Uuid,
    factor_id: Uuid,
) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(anyhow!("sealed secret is too short"));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = ChaCha20Poly1305::new_from_slice(key.bytes())
        .map_err(|_| anyhow!("invalid master key length"))?;

    let aad = binding_aad(tenant_id, user_id, factor_id);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|err| anyhow!("unsealing failure: {err}"))
}

/// Unseal the factor's TOTP secret and check `code` against it at unix time
/// `at`. Shared by enrollment completion and login verification.
pub(crate) fn verify_sealed_totp(
    key: &MasterKey,
    ctx: &AuthContext,
    factor: &MfaFactor,
    code: &str,
    at: u64,
) -> MfaResult<()> {
    let sealed = factor
        .secret
        .as_ref()
        .ok_or_else(|| Error::Storage(anyhow!("totp factor has no sealed secret")))?;
    let secret = open_secret(key, sealed.as_bytes(), ctx.tenant_id, ctx.user_id, factor.id)?;
    if otp::verify_totp(&secret, code, at) {
        Ok(())
    } else {
        Err(Error::InvalidCode)
    }
}

fn binding_aad(tenant_id: Uuid, user_id: Uuid, factor_id: Uuid) -> Vec<u8> {
    format!("factor-secret:v1|{tenant_id}|{user_id}|{factor_id}").into_bytes()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = MasterKey::generate();
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();
        let factor = Uuid::new_v4();

        let sealed = seal_secret(&key, b"shared-totp-seed-123", tenant, user, factor).unwrap();
        assert_ne!(sealed, b"shared-totp-seed-123");

        let opened = open_secret(&key, &sealed, tenant, user, factor).unwrap();
        assert_eq!(opened, b"shared-totp-seed-123");
    }

    #[test]
    fn open_fails_for_a_different_factor_row() {
        let key = MasterKey::generate();
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();

        let sealed = seal_secret(&key, b"seed", tenant, user, Uuid::new_v4()).unwrap();
        assert!(open_secret(&key, &sealed, tenant, user, Uuid::new_v4()).is_err());
    }

    #[test]
    fn open_fails_on_tampered_ciphertext() {
        let key = MasterKey::generate();
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();
        let factor = Uuid::new_v4();

        let mut sealed = seal_secret(&key, b"seed", tenant, user, factor).unwrap();
        if let Some(byte) = sealed.last_mut() {
            *byte ^= 0xFF;
        }
        assert!(open_secret(&key, &sealed, tenant, user, factor).is_err());
    }

    #[test]
    fn master_key_base64_round_trip() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        let key = MasterKey::from_base64(&encoded).unwrap();
        assert_eq!(key.bytes(), &[7u8; 32]);
        assert!(MasterKey::from_base64("too-short").is_err());
    }

    #[test]
    fn master_key_debug_stays_opaque() {
        let key = MasterKey::generate();
        assert_eq!(format!("{key:?}"), "MasterKey(***)");
    }
}
