//! Recovery code vault.
//!
//! Single-use backup credentials for when the primary factor is unavailable.
//! Generation returns the plaintext codes exactly once and atomically
//! replaces any prior set; consumption marks a code used without deleting it.
//! There is no attempt lockout here: the codes are high-entropy and the
//! finite count is the scarce resource.

use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use super::{
    audit::{AuditEntry, AuditLog},
    error::{Error, Result},
    models::{AuthContext, RecoveryCode, RecoveryCodeSet},
    recovery_codes::{self, Pepper},
    store::RecoveryCodeStore,
};

#[derive(Clone)]
pub struct RecoveryVault {
    store: Arc<dyn RecoveryCodeStore>,
    pepper: Arc<Pepper>,
    audit: Arc<dyn AuditLog>,
    code_count: usize,
}

impl RecoveryVault {
    #[must_use]
    pub fn new(
        store: Arc<dyn RecoveryCodeStore>,
        pepper: Arc<Pepper>,
        audit: Arc<dyn AuditLog>,
        code_count: usize,
    ) -> Self {
        Self {
            store,
            pepper,
            audit,
            code_count,
        }
    }

    /// Generate a fresh set, replacing any prior one. The returned plaintext
    /// codes are never retrievable again.
    ///
    /// Re-authentication before regeneration is the orchestrator's job, not
    /// the vault's.
    ///
    /// # Errors
    /// Returns an error when hashing or storage fails.
    pub async fn generate(&self, ctx: &AuthContext) -> Result<Vec<String>> {
        let batch = recovery_codes::generate_batch(self.code_count, &self.pepper)?;
        let now = Utc::now();
        let set = RecoveryCodeSet {
            user_id: ctx.user_id,
            tenant_id: ctx.tenant_id,
            batch_id: batch.batch_id,
            generated_at: now,
            codes: batch
                .hashes
                .into_iter()
                .map(|hash| RecoveryCode {
                    hash,
                    used_at: None,
                })
                .collect(),
        };
        self.store.replace_set(set).await?;

        self.audit
            .record(&AuditEntry::new(ctx.user_id, ctx.tenant_id, "recovery_codes_generated"));
        Ok(batch.codes)
    }

    /// Consume one unused code.
    ///
    /// # Errors
    /// `InvalidRecoveryCode` on malformed input, no match, or reuse.
    pub async fn consume(&self, ctx: &AuthContext, submitted: &str) -> Result<()> {
        if recovery_codes::normalize(submitted).is_err() {
            return Err(Error::InvalidRecoveryCode);
        }

        let Some(set) = self.store.get_set(ctx.user_id).await? else {
            return Err(Error::InvalidRecoveryCode);
        };

        for code in set.unused() {
            match recovery_codes::verify_code(submitted, &code.hash, &self.pepper) {
                Ok(true) => {
                    // Lost races surface as reuse and fall through to the
                    // generic failure.
                    if self
                        .store
                        .mark_used(ctx.user_id, set.batch_id, &code.hash, Utc::now())
                        .await?
                    {
                        self.audit.record(&AuditEntry::new(
                            ctx.user_id,
                            ctx.tenant_id,
                            "recovery_code_consumed",
                        ));
                        return Ok(());
                    }
                    break;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(user_id = %ctx.user_id, "recovery code check failed: {err:#}");
                }
            }
        }

        self.audit
            .record(&AuditEntry::new(ctx.user_id, ctx.tenant_id, "recovery_code_rejected"));
        Err(Error::InvalidRecoveryCode)
    }

    /// How many codes remain unused, for caller-facing warnings.
    ///
    /// # Errors
    /// Returns an error when storage fails.
    pub async fn remaining(&self, ctx: &AuthContext) -> Result<usize> {
        Ok(self
            .store
            .get_set(ctx.user_id)
            .await?
            .map_or(0, |set| set.unused().count()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mfa::audit::TracingAuditLog;
    use crate::mfa::store::MemoryStore;
    use uuid::Uuid;

    fn vault(store: Arc<MemoryStore>) -> RecoveryVault {
        RecoveryVault::new(
            store,
            Arc::new(Pepper::generate()),
            Arc::new(TracingAuditLog),
            4,
        )
    }

    fn context() -> AuthContext {
        AuthContext::new(Uuid::new_v4(), Uuid::new_v4(), Vec::new())
    }

    #[tokio::test]
    async fn codes_are_strictly_single_use() {
        let vault = vault(Arc::new(MemoryStore::new()));
        let ctx = context();

        let codes = vault.generate(&ctx).await.unwrap();
        assert_eq!(codes.len(), 4);

        vault.consume(&ctx, &codes[0]).await.unwrap();
        let err = vault.consume(&ctx, &codes[0]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRecoveryCode));

        assert_eq!(vault.remaining(&ctx).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn regeneration_invalidates_the_old_set() {
        let vault = vault(Arc::new(MemoryStore::new()));
        let ctx = context();

        let old_codes = vault.generate(&ctx).await.unwrap();
        let new_codes = vault.generate(&ctx).await.unwrap();

        let err = vault.consume(&ctx, &old_codes[0]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRecoveryCode));

        vault.consume(&ctx, &new_codes[0]).await.unwrap();
    }

    #[tokio::test]
    async fn malformed_and_unknown_codes_are_rejected() {
        let vault = vault(Arc::new(MemoryStore::new()));
        let ctx = context();
        vault.generate(&ctx).await.unwrap();

        let err = vault.consume(&ctx, "nope").await.unwrap_err();
        assert!(matches!(err, Error::InvalidRecoveryCode));

        let err = vault.consume(&ctx, "ABCD-EFGH-JKLM").await.unwrap_err();
        assert!(matches!(err, Error::InvalidRecoveryCode));
    }

    #[tokio::test]
    async fn consuming_without_a_set_fails() {
        let vault = vault(Arc::new(MemoryStore::new()));
        let ctx = context();
        let err = vault.consume(&ctx, "ABCD-EFGH-JKLM").await.unwrap_err();
        assert!(matches!(err, Error::InvalidRecoveryCode));
    }
}
