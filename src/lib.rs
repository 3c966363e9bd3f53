//! # Gardi (Multi-Factor Authentication Core)
//!
//! `gardi` is the multi-factor authentication authority of a multi-tenant
//! platform. It owns factor enrollment, one-time code challenges, recovery
//! codes, trusted devices, and per-tenant enforcement policy; the
//! surrounding platform (user accounts, sessions, notification transports)
//! is consumed through narrow capability traits.
//!
//! ## Factor Model
//!
//! Users enroll factors of three types: `totp` (authenticator apps), `sms`,
//! and `email`. A factor moves `pending → active` on verified enrollment and
//! `active → disabled` on explicit user action; disabled rows are kept for
//! their audit trail. At most one factor per type is active per user.
//!
//! ## Login Flow
//!
//! A login attempt asks the orchestrator for its gate: no challenge needed,
//! waived by a trusted device, enrollment required by tenant policy, or a
//! challenge against one of the user's active factors. Challenges are
//! single-use, time-bounded, and attempt-limited; recovery codes are the
//! one-shot fallback when the primary factor is unavailable.
//!
//! ## Security Posture
//!
//! - TOTP secrets are sealed (ChaCha20-Poly1305 under a master key) before
//!   storage and returned to the caller exactly once at provisioning.
//! - Out-of-band codes and device fingerprints are stored as hashes;
//!   recovery codes as salted, peppered Argon2id hashes.
//! - Storage contracts make single-use and attempt budgets atomic, so
//!   concurrent verifications cannot overspend them.

pub mod api;
pub mod cli;
pub mod mfa;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
