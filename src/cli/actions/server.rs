use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::warn;

use crate::api::{self, ApiState};
use crate::mfa::{
    MfaConfig, MfaCore,
    audit::TracingAuditLog,
    crypto::MasterKey,
    directory::NullDirectory,
    notify::LogNotifier,
    rate_limit::NoopRateLimiter,
    recovery_codes::Pepper,
    store::{MemoryStore, PgStore, StoreHandles},
};

pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub issuer: String,
    pub allowed_origin: Option<String>,
    pub master_key: Option<SecretString>,
    pub recovery_pepper: Option<SecretString>,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("port", &self.port)
            .field("dsn", &self.dsn)
            .field("issuer", &self.issuer)
            .field("allowed_origin", &self.allowed_origin)
            .field("master_key", &"***")
            .field("recovery_pepper", &"***")
            .finish()
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if key material is malformed, the database is
/// unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let master_key = match &args.master_key {
        Some(encoded) => MasterKey::from_base64(encoded.expose_secret())
            .context("invalid GARDI_MASTER_KEY")?,
        None => {
            warn!("no master key configured; sealed secrets will not survive a restart");
            MasterKey::generate()
        }
    };
    let pepper = match &args.recovery_pepper {
        Some(encoded) => Pepper::from_base64(encoded.expose_secret())
            .context("invalid GARDI_RECOVERY_PEPPER")?,
        None => {
            warn!("no recovery pepper configured; stored recovery codes will not survive a restart");
            Pepper::generate()
        }
    };

    let (stores, pool) = match &args.dsn {
        Some(dsn) => {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(dsn)
                .await
                .context("Failed to connect to database")?;
            (
                StoreHandles::from_postgres(Arc::new(PgStore::new(pool.clone()))),
                Some(pool),
            )
        }
        None => {
            warn!("no database configured; using the in-memory store");
            (StoreHandles::from_memory(Arc::new(MemoryStore::new())), None)
        }
    };

    let core = MfaCore::new(
        stores,
        Arc::new(NullDirectory),
        Arc::new(LogNotifier),
        Arc::new(TracingAuditLog),
        master_key,
        pepper,
        MfaConfig::new().with_issuer(args.issuer.clone()),
    );

    let state = Arc::new(ApiState::new(core, Arc::new(NoopRateLimiter), pool));

    api::serve(state, args.port, args.allowed_origin).await
}
