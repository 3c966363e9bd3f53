//! Out-of-band code delivery abstraction.
//!
//! The transport (SMS gateway, mail service) lives outside this core. The
//! challenge issuer persists first and then hands the code to a `Notifier`;
//! delivery failures are logged and never fail the request, since a retried
//! issue invalidates the stale challenge anyway.

use anyhow::Result;
use std::sync::Mutex;
use tracing::{debug, info};

use super::models::{ChallengePurpose, FactorType};

/// Delivery channel for a one-time code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyChannel {
    Sms,
    Email,
}

impl NotifyChannel {
    /// The channel a factor type delivers over, if any.
    #[must_use]
    pub fn for_factor(factor_type: FactorType) -> Option<Self> {
        match factor_type {
            FactorType::Sms => Some(Self::Sms),
            FactorType::Email => Some(Self::Email),
            FactorType::Totp => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }
}

/// A code ready for delivery.
#[derive(Clone, Debug)]
pub struct CodeNotification {
    pub channel: NotifyChannel,
    pub destination: String,
    pub code: String,
    pub purpose: ChallengePurpose,
}

/// Code delivery abstraction.
pub trait Notifier: Send + Sync {
    /// Deliver a code or return an error to be logged by the caller.
    fn send(&self, notification: &CodeNotification) -> Result<()>;
}

/// Local dev sender that logs instead of delivering. The code itself only
/// appears at debug level.
#[derive(Clone, Debug)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notification: &CodeNotification) -> Result<()> {
        info!(
            channel = notification.channel.as_str(),
            destination = %notification.destination,
            purpose = notification.purpose.as_str(),
            "code dispatch stub"
        );
        debug!(code = %notification.code, "dispatch stub code");
        Ok(())
    }
}

/// Records notifications instead of sending them. Used by tests to read the
/// code a challenge was issued with.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<CodeNotification>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications recorded so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<CodeNotification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// The most recently recorded code, if any.
    #[must_use]
    pub fn last_code(&self) -> Option<String> {
        self.sent
            .lock()
            .ok()
            .and_then(|sent| sent.last().map(|notification| notification.code.clone()))
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: &CodeNotification) -> Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        Ok(())
    }
}
