//! Named policy presets for the platform's guarded operations.
//!
//! Every preset is built from the same [`Policy`] primitive and differs
//! only in scope, ceiling, window, and key derivation. Ceilings listed
//! here are defaults; the configuration file can override any of them
//! per scope.

use std::time::Duration;

use crate::error::Result;

use super::key::KeyStrategy;
use super::policy::Policy;

const GENERAL_MAX: u64 = 300;
const GENERAL_WINDOW: Duration = Duration::from_secs(15 * 60);

const SENSITIVE_MAX: u64 = 30;
const SENSITIVE_WINDOW: Duration = Duration::from_secs(15 * 60);

const LOGIN_MAX: u64 = 5;
const LOGIN_WINDOW: Duration = Duration::from_secs(15 * 60);

const REGISTRATION_MAX: u64 = 3;
const REGISTRATION_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

const SUBMISSIONS_MAX: u64 = 20;
const SUBMISSIONS_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

const MESSAGES_MAX: u64 = 30;
const MESSAGES_WINDOW: Duration = Duration::from_secs(60);

const SEARCH_MAX: u64 = 60;
const SEARCH_WINDOW: Duration = Duration::from_secs(60);

const API_SUSTAINED_MAX: u64 = 100;
const API_BURST_MAX: u64 = 10;
const API_WINDOW: Duration = Duration::from_secs(15 * 60);

/// General traffic ceiling: 300 requests per 15 minutes, keyed by user
/// falling back to address.
pub fn general() -> Result<Policy> {
    Policy::new("general", GENERAL_WINDOW, GENERAL_MAX, KeyStrategy::User)
}

/// Stricter ceiling for a named sensitive operation: 30 per 15 minutes.
pub fn sensitive(scope: impl Into<String>) -> Result<Policy> {
    Policy::new(scope, SENSITIVE_WINDOW, SENSITIVE_MAX, KeyStrategy::User)
}

/// Authentication attempts: 5 per 15 minutes per address.
///
/// Pair with the middleware's successful-response exemption so only
/// failed attempts count toward the ceiling.
pub fn login() -> Result<Policy> {
    Policy::new("login", LOGIN_WINDOW, LOGIN_MAX, KeyStrategy::Address)
}

/// Account creation: 3 per rolling 24 hours per address.
pub fn registration() -> Result<Policy> {
    Policy::new(
        "registration",
        REGISTRATION_WINDOW,
        REGISTRATION_MAX,
        KeyStrategy::Address,
    )
}

/// Application submissions: 20 per rolling 24 hours per authenticated
/// identity.
pub fn submissions() -> Result<Policy> {
    Policy::new(
        "submissions",
        SUBMISSIONS_WINDOW,
        SUBMISSIONS_MAX,
        KeyStrategy::User,
    )
}

/// Chat-like traffic: 30 messages per minute.
pub fn messages() -> Result<Policy> {
    Policy::new("messages", MESSAGES_WINDOW, MESSAGES_MAX, KeyStrategy::User)
}

/// Search traffic: 60 queries per minute.
pub fn search() -> Result<Policy> {
    Policy::new("search", SEARCH_WINDOW, SEARCH_MAX, KeyStrategy::User)
}

/// Burst-and-sustained pair for external API callers, keyed by supplied
/// credential: 10 burst admissions gated behind 100 sustained per
/// 15 minutes.
///
/// Returned as `(sustained, burst)`, the order [`TieredLimiter::new`]
/// expects.
///
/// [`TieredLimiter::new`]: super::limiter::TieredLimiter::new
pub fn api_tier() -> Result<(Policy, Policy)> {
    let sustained = Policy::new(
        "api-sustained",
        API_WINDOW,
        API_SUSTAINED_MAX,
        KeyStrategy::Credential,
    )?;
    let burst = Policy::new("api-burst", API_WINDOW, API_BURST_MAX, KeyStrategy::Credential)?;
    Ok((sustained, burst))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_carry_their_documented_ceilings() {
        assert_eq!(general().unwrap().max(), 300);
        assert_eq!(login().unwrap().max(), 5);
        assert_eq!(registration().unwrap().max(), 3);
        assert_eq!(submissions().unwrap().max(), 20);
        assert_eq!(messages().unwrap().max(), 30);
        assert_eq!(search().unwrap().max(), 60);
    }

    #[test]
    fn test_day_scoped_presets_use_rolling_windows() {
        assert_eq!(registration().unwrap().window(), Duration::from_secs(86400));
        assert_eq!(submissions().unwrap().window(), Duration::from_secs(86400));
    }

    #[test]
    fn test_sensitive_takes_its_scope_name() {
        let policy = sensitive("password-reset").unwrap();
        assert_eq!(policy.scope(), "password-reset");
        assert_eq!(policy.max(), 30);
    }

    #[test]
    fn test_api_tier_scopes_never_collide() {
        let (sustained, burst) = api_tier().unwrap();

        assert_eq!(sustained.max(), 100);
        assert_eq!(burst.max(), 10);
        assert_eq!(sustained.window(), burst.window());
        assert_ne!(sustained.scope(), burst.scope());
    }
}
