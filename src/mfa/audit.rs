//! Audit trail for factor lifecycle and verification outcomes.

use uuid::Uuid;

/// One auditable event. Never carries code values or secrets.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub action: &'static str,
    pub factor_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditEntry {
    #[must_use]
    pub fn new(user_id: Uuid, tenant_id: Uuid, action: &'static str) -> Self {
        Self {
            user_id,
            tenant_id,
            action,
            factor_id: None,
            ip_address: None,
            user_agent: None,
        }
    }

    #[must_use]
    pub fn with_factor(mut self, factor_id: Uuid) -> Self {
        self.factor_id = Some(factor_id);
        self
    }

    #[must_use]
    pub fn with_client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }
}

/// Audit sink abstraction; recording must never fail a request.
pub trait AuditLog: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Default sink: structured tracing events.
#[derive(Clone, Debug)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            user_id = %entry.user_id,
            tenant_id = %entry.tenant_id,
            action = entry.action,
            factor_id = entry.factor_id.map(|id| id.to_string()),
            ip = entry.ip_address.as_deref(),
            "mfa audit"
        );
    }
}
