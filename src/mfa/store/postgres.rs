//! PostgreSQL store.
//!
//! Runtime sqlx queries over the schema in `db/sql/01_gardi.sql`. The
//! conditional-update guards (`WHERE ... RETURNING`) are what make attempt
//! accounting and consumption race-free across instances.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{
    ChallengeStore, FactorStore, PolicyStore, RecoveryCodeStore, TrustedDeviceStore,
};
use crate::mfa::models::{
    ChallengePurpose, FactorType, MfaFactor, OtpChallenge, RecoveryCode, RecoveryCodeSet,
    TenantMfaPolicy, TrustedDevice,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FactorStore for PgStore {
    async fn insert_pending(&self, factor: MfaFactor) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // A fresh enrollment replaces any stale pending attempt of the type.
        sqlx::query(
            r"
            DELETE FROM mfa_factors
            WHERE user_id = $1
              AND factor_type = $2
              AND status = 'pending'
            ",
        )
        .bind(factor.user_id)
        .bind(factor.factor_type.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            INSERT INTO mfa_factors
                (id, user_id, tenant_id, factor_type, status, secret, destination, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(factor.id)
        .bind(factor.user_id)
        .bind(factor.tenant_id)
        .bind(factor.factor_type.as_str())
        .bind(factor.status.as_str())
        .bind(factor.secret.as_ref().map(|sealed| sealed.as_bytes().to_vec()))
        .bind(factor.destination.as_deref())
        .bind(factor.created_at)
        .execute(&mut *tx)
        .await
        .context("failed to insert pending factor")?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, user_id: Uuid, factor_id: Uuid) -> Result<Option<MfaFactor>> {
        sqlx::query_as::<_, MfaFactor>(
            "SELECT * FROM mfa_factors WHERE id = $1 AND user_id = $2",
        )
        .bind(factor_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch factor")
    }

    async fn get_pending(
        &self,
        user_id: Uuid,
        factor_type: FactorType,
    ) -> Result<Option<MfaFactor>> {
        sqlx::query_as::<_, MfaFactor>(
            r"
            SELECT * FROM mfa_factors
            WHERE user_id = $1
              AND factor_type = $2
              AND status = 'pending'
            ORDER BY created_at DESC
            LIMIT 1
            ",
        )
        .bind(user_id)
        .bind(factor_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch pending factor")
    }

    async fn get_active(
        &self,
        user_id: Uuid,
        factor_type: FactorType,
    ) -> Result<Option<MfaFactor>> {
        sqlx::query_as::<_, MfaFactor>(
            r"
            SELECT * FROM mfa_factors
            WHERE user_id = $1
              AND factor_type = $2
              AND status = 'active'
            LIMIT 1
            ",
        )
        .bind(user_id)
        .bind(factor_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch active factor")
    }

    async fn list_active(&self, user_id: Uuid, tenant_id: Uuid) -> Result<Vec<MfaFactor>> {
        sqlx::query_as::<_, MfaFactor>(
            r"
            SELECT * FROM mfa_factors
            WHERE user_id = $1
              AND tenant_id = $2
              AND status = 'active'
            ORDER BY created_at ASC
            ",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list active factors")
    }

    async fn activate(
        &self,
        user_id: Uuid,
        factor_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<MfaFactor>> {
        let mut tx = self.pool.begin().await?;

        // Demote any other active factor of the same type first, so the
        // one-active-per-type invariant holds even across a racing enroll.
        sqlx::query(
            r"
            UPDATE mfa_factors
            SET status = 'disabled'
            WHERE user_id = $1
              AND status = 'active'
              AND factor_type = (SELECT factor_type FROM mfa_factors WHERE id = $2)
              AND id != $2
            ",
        )
        .bind(user_id)
        .bind(factor_id)
        .execute(&mut *tx)
        .await?;

        let activated = sqlx::query_as::<_, MfaFactor>(
            r"
            UPDATE mfa_factors
            SET status = 'active',
                activated_at = $3
            WHERE id = $1
              AND user_id = $2
              AND status = 'pending'
            RETURNING *
            ",
        )
        .bind(factor_id)
        .bind(user_id)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to activate factor")?;

        tx.commit().await?;
        Ok(activated)
    }

    async fn disable(&self, user_id: Uuid, factor_id: Uuid) -> Result<bool> {
        let row = sqlx::query(
            r"
            UPDATE mfa_factors
            SET status = 'disabled'
            WHERE id = $1
              AND user_id = $2
              AND status = 'active'
            RETURNING id
            ",
        )
        .bind(factor_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to disable factor")?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl ChallengeStore for PgStore {
    async fn replace(&self, challenge: OtpChallenge) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM mfa_challenges WHERE user_id = $1 AND purpose = $2")
            .bind(challenge.user_id)
            .bind(challenge.purpose.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r"
            INSERT INTO mfa_challenges
                (id, user_id, tenant_id, purpose, factor_type, code_hash,
                 expires_at, attempts_remaining, consumed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(challenge.id)
        .bind(challenge.user_id)
        .bind(challenge.tenant_id)
        .bind(challenge.purpose.as_str())
        .bind(challenge.factor_type.as_str())
        .bind(&challenge.code_hash)
        .bind(challenge.expires_at)
        .bind(challenge.attempts_remaining)
        .bind(challenge.consumed_at)
        .bind(challenge.created_at)
        .execute(&mut *tx)
        .await
        .context("failed to insert challenge")?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_current(
        &self,
        user_id: Uuid,
        purpose: ChallengePurpose,
    ) -> Result<Option<OtpChallenge>> {
        sqlx::query_as::<_, OtpChallenge>(
            r"
            SELECT * FROM mfa_challenges
            WHERE user_id = $1
              AND purpose = $2
            LIMIT 1
            ",
        )
        .bind(user_id)
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch challenge")
    }

    async fn spend_attempt(&self, challenge_id: Uuid) -> Result<i32> {
        let row = sqlx::query(
            r"
            UPDATE mfa_challenges
            SET attempts_remaining = attempts_remaining - 1
            WHERE id = $1
              AND attempts_remaining > 0
            RETURNING attempts_remaining
            ",
        )
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to spend challenge attempt")?;
        Ok(row.map_or(0, |row| row.get::<i32, _>("attempts_remaining")))
    }

    async fn consume(&self, challenge_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let row = sqlx::query(
            r"
            UPDATE mfa_challenges
            SET consumed_at = $2,
                attempts_remaining = 0
            WHERE id = $1
              AND consumed_at IS NULL
              AND attempts_remaining > 0
              AND expires_at > $2
            RETURNING id
            ",
        )
        .bind(challenge_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .context("failed to consume challenge")?;
        Ok(row.is_some())
    }

    async fn invalidate(&self, user_id: Uuid, purpose: ChallengePurpose) -> Result<()> {
        sqlx::query("DELETE FROM mfa_challenges WHERE user_id = $1 AND purpose = $2")
            .bind(user_id)
            .bind(purpose.as_str())
            .execute(&self.pool)
            .await
            .context("failed to invalidate challenge")?;
        Ok(())
    }
}

#[async_trait]
impl RecoveryCodeStore for PgStore {
    async fn replace_set(&self, set: RecoveryCodeSet) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM mfa_recovery_codes WHERE user_id = $1")
            .bind(set.user_id)
            .execute(&mut *tx)
            .await?;

        for (position, code) in set.codes.iter().enumerate() {
            sqlx::query(
                r"
                INSERT INTO mfa_recovery_codes
                    (user_id, tenant_id, batch_id, position, code_hash, used_at, generated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(set.user_id)
            .bind(set.tenant_id)
            .bind(set.batch_id)
            .bind(i32::try_from(position).unwrap_or(i32::MAX))
            .bind(&code.hash)
            .bind(code.used_at)
            .bind(set.generated_at)
            .execute(&mut *tx)
            .await
            .context("failed to insert recovery code")?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_set(&self, user_id: Uuid) -> Result<Option<RecoveryCodeSet>> {
        let rows = sqlx::query(
            r"
            SELECT tenant_id, batch_id, code_hash, used_at, generated_at
            FROM mfa_recovery_codes
            WHERE user_id = $1
            ORDER BY position ASC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list recovery codes")?;

        let Some(first) = rows.first() else {
            return Ok(None);
        };

        let set = RecoveryCodeSet {
            user_id,
            tenant_id: first.get("tenant_id"),
            batch_id: first.get("batch_id"),
            generated_at: first.get("generated_at"),
            codes: rows
                .iter()
                .map(|row| RecoveryCode {
                    hash: row.get("code_hash"),
                    used_at: row.get("used_at"),
                })
                .collect(),
        };
        Ok(Some(set))
    }

    async fn mark_used(
        &self,
        user_id: Uuid,
        batch_id: Uuid,
        code_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let row = sqlx::query(
            r"
            UPDATE mfa_recovery_codes
            SET used_at = $4
            WHERE user_id = $1
              AND batch_id = $2
              AND code_hash = $3
              AND used_at IS NULL
            RETURNING user_id
            ",
        )
        .bind(user_id)
        .bind(batch_id)
        .bind(code_hash)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .context("failed to consume recovery code")?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl TrustedDeviceStore for PgStore {
    async fn upsert(&self, device: TrustedDevice) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO mfa_trusted_devices
                (id, user_id, tenant_id, fingerprint_hash, user_agent, ip_address,
                 created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, tenant_id, fingerprint_hash) DO UPDATE
            SET expires_at = EXCLUDED.expires_at,
                user_agent = EXCLUDED.user_agent,
                ip_address = EXCLUDED.ip_address
            ",
        )
        .bind(device.id)
        .bind(device.user_id)
        .bind(device.tenant_id)
        .bind(&device.fingerprint_hash)
        .bind(device.user_agent.as_deref())
        .bind(device.ip_address.as_deref())
        .bind(device.created_at)
        .bind(device.expires_at)
        .execute(&self.pool)
        .await
        .context("failed to upsert trusted device")?;
        Ok(())
    }

    async fn find(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        fingerprint_hash: &[u8],
    ) -> Result<Option<TrustedDevice>> {
        sqlx::query_as::<_, TrustedDevice>(
            r"
            SELECT * FROM mfa_trusted_devices
            WHERE user_id = $1
              AND tenant_id = $2
              AND fingerprint_hash = $3
            LIMIT 1
            ",
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(fingerprint_hash)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch trusted device")
    }
}

#[async_trait]
impl PolicyStore for PgStore {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<TenantMfaPolicy>> {
        sqlx::query_as::<_, TenantMfaPolicy>(
            "SELECT * FROM mfa_tenant_policies WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch tenant policy")
    }

    async fn upsert(&self, policy: TenantMfaPolicy) -> Result<()> {
        let roles: Vec<String> = policy.required_for_roles.iter().cloned().collect();
        let types: Vec<String> = policy
            .allowed_factor_types
            .iter()
            .map(|factor_type| factor_type.as_str().to_string())
            .collect();

        sqlx::query(
            r"
            INSERT INTO mfa_tenant_policies
                (tenant_id, required_for_roles, allowed_factor_types,
                 grace_period_days, enforced_from)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id) DO UPDATE
            SET required_for_roles = EXCLUDED.required_for_roles,
                allowed_factor_types = EXCLUDED.allowed_factor_types,
                grace_period_days = EXCLUDED.grace_period_days,
                enforced_from = EXCLUDED.enforced_from
            ",
        )
        .bind(policy.tenant_id)
        .bind(&roles)
        .bind(&types)
        .bind(i32::try_from(policy.grace_period_days).unwrap_or(i32::MAX))
        .bind(policy.enforced_from)
        .execute(&self.pool)
        .await
        .context("failed to upsert tenant policy")?;
        Ok(())
    }
}
