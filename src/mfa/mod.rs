//! Multi-factor authentication core.
//!
//! Flow Overview:
//! 1) A login attempt asks the orchestrator whether a challenge is needed,
//!    consulting tenant policy and the trusted device registry.
//! 2) If one is, the challenge issuer creates and dispatches a code (or the
//!    user computes a TOTP locally / falls back to a recovery code).
//! 3) The matching verifier checks the submission; on success the caller is
//!    signaled to mint a session and may register the device as trusted.
//!
//! Security boundaries:
//! - Codes and recovery codes are stored hashed; TOTP secrets are sealed
//!   under a master key before they touch storage.
//! - Challenges are single-use, time-bounded, and attempt-limited, enforced
//!   by atomic conditional updates in the store.
//! - Every operation takes an explicit [`models::AuthContext`]; nothing is
//!   read from ambient request state.

pub mod audit;
pub mod challenge;
pub mod crypto;
pub mod devices;
pub mod directory;
pub mod enrollment;
pub mod error;
pub mod login;
pub mod models;
pub mod notify;
pub mod otp;
pub mod policy;
pub mod rate_limit;
pub mod recovery;
pub mod recovery_codes;
pub mod store;

use std::sync::Arc;

use audit::AuditLog;
use challenge::{ChallengeConfig, ChallengeService};
use crypto::MasterKey;
use devices::DeviceRegistry;
use directory::UserDirectory;
use enrollment::EnrollmentService;
use login::LoginOrchestrator;
use notify::Notifier;
use policy::PolicyService;
use recovery::RecoveryVault;
use recovery_codes::Pepper;
use store::StoreHandles;

/// Core-wide configuration.
#[derive(Clone, Debug)]
pub struct MfaConfig {
    issuer: String,
    challenge: ChallengeConfig,
    recovery_code_count: usize,
}

impl MfaConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: "gardi".to_string(),
            challenge: ChallengeConfig::new(),
            recovery_code_count: recovery_codes::DEFAULT_CODE_COUNT,
        }
    }

    /// Issuer label shown in authenticator apps.
    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_challenge(mut self, challenge: ChallengeConfig) -> Self {
        self.challenge = challenge;
        self
    }

    #[must_use]
    pub fn with_recovery_code_count(mut self, count: usize) -> Self {
        self.recovery_code_count = count;
        self
    }
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The wired-up MFA services, shared by the API layer and embedders.
#[derive(Clone)]
pub struct MfaCore {
    pub enrollment: EnrollmentService,
    pub challenges: ChallengeService,
    pub recovery: RecoveryVault,
    pub devices: DeviceRegistry,
    pub policies: PolicyService,
    pub login: LoginOrchestrator,
}

impl MfaCore {
    #[must_use]
    pub fn new(
        stores: StoreHandles,
        directory: Arc<dyn UserDirectory>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLog>,
        master_key: MasterKey,
        pepper: Pepper,
        config: MfaConfig,
    ) -> Self {
        let master_key = Arc::new(master_key);
        let pepper = Arc::new(pepper);

        let challenges =
            ChallengeService::new(stores.challenges.clone(), notifier, config.challenge);
        let policies = PolicyService::new(stores.policies.clone());
        let recovery = RecoveryVault::new(
            stores.recovery.clone(),
            pepper,
            audit.clone(),
            config.recovery_code_count,
        );
        let devices = DeviceRegistry::new(stores.devices.clone());
        let enrollment = EnrollmentService::new(
            stores.factors.clone(),
            challenges.clone(),
            policies.clone(),
            directory.clone(),
            audit.clone(),
            master_key.clone(),
            config.issuer,
        );
        let login = LoginOrchestrator::new(
            stores.factors,
            challenges.clone(),
            recovery.clone(),
            devices.clone(),
            policies.clone(),
            directory,
            audit,
            master_key,
        );

        Self {
            enrollment,
            challenges,
            recovery,
            devices,
            policies,
            login,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mfa::audit::TracingAuditLog;
    use crate::mfa::directory::NullDirectory;
    use crate::mfa::notify::LogNotifier;
    use crate::mfa::store::MemoryStore;

    #[test]
    fn config_builders_apply() {
        let config = MfaConfig::new()
            .with_issuer("Acme".to_string())
            .with_recovery_code_count(12);
        assert_eq!(config.issuer, "Acme");
        assert_eq!(config.recovery_code_count, 12);
    }

    #[tokio::test]
    async fn core_wires_up_over_the_memory_store() {
        let core = MfaCore::new(
            StoreHandles::from_memory(Arc::new(MemoryStore::new())),
            Arc::new(NullDirectory),
            Arc::new(LogNotifier),
            Arc::new(TracingAuditLog),
            MasterKey::generate(),
            Pepper::generate(),
            MfaConfig::new(),
        );
        let ctx = models::AuthContext::new(uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), Vec::new());
        assert!(core.enrollment.list(&ctx).await.expect("empty list").is_empty());
    }
}
