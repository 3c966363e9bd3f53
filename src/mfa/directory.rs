//! User record lookup, consumed from the platform's user service.
//!
//! The MFA core only needs delivery destinations and the first-login
//! timestamp that drives grace-period evaluation. Modeled as a capability
//! trait so tests and single-binary deployments can run without the real
//! service.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// The slice of a user record this core consumes.
#[derive(Debug, Clone, Default)]
pub struct UserRecord {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_login_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn lookup(&self, user_id: Uuid) -> Result<Option<UserRecord>>;
}

/// Directory that knows nobody. Enrollment then requires destinations to be
/// supplied in the request, and no grace period applies.
#[derive(Clone, Debug)]
pub struct NullDirectory;

#[async_trait]
impl UserDirectory for NullDirectory {
    async fn lookup(&self, _user_id: Uuid) -> Result<Option<UserRecord>> {
        Ok(None)
    }
}

/// Fixed in-memory directory for tests and local development.
#[derive(Default)]
pub struct StaticDirectory {
    users: HashMap<Uuid, UserRecord>,
}

impl StaticDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, user_id: Uuid, record: UserRecord) -> Self {
        self.users.insert(user_id, record);
        self
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn lookup(&self, user_id: Uuid) -> Result<Option<UserRecord>> {
        Ok(self.users.get(&user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_directory_knows_nobody() {
        let directory = NullDirectory;
        assert!(directory.lookup(Uuid::new_v4()).await.expect("no failure").is_none());
    }

    #[tokio::test]
    async fn static_directory_returns_seeded_records() {
        let user = Uuid::new_v4();
        let directory = StaticDirectory::new().with_user(
            user,
            UserRecord {
                email: Some("alice@example.com".to_string()),
                ..UserRecord::default()
            },
        );
        let record = directory
            .lookup(user)
            .await
            .expect("no failure")
            .expect("seeded");
        assert_eq!(record.email.as_deref(), Some("alice@example.com"));
    }
}
