//! Rate limiting primitives for MFA flows.

use uuid::Uuid;

#[derive(Clone, Copy, Debug)]
pub enum RateLimitAction {
    SendCode,
    VerifyCode,
    Recovery,
    Enroll,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
    fn check_user(&self, user_id: Uuid, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn check_user(&self, _user_id: Uuid, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}
