//! Admission checks against a policy, and the tiered composite.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, trace};

use super::clock::Clock;
use super::context::RequestContext;
use super::policy::Policy;
use super::store::CounterStore;

/// Outcome of one admission check.
///
/// Denial is a normal value, never an error: callers branch on `admitted`
/// and surface the rest as retry metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// Ceiling of the policy that produced this decision
    pub limit: u64,
    /// Admissions left in the current window, floored at zero
    pub remaining: u64,
    /// When the current window closes
    pub reset_at: Instant,
    /// Time until the window closes, measured at check time
    pub retry_after: Duration,
    /// Whether this check recorded an observation in the store
    pub counted: bool,
}

impl Decision {
    /// Admission granted by an exemption, with no observation recorded.
    fn exempt(limit: u64, now: Instant) -> Self {
        Self {
            admitted: true,
            limit,
            remaining: limit,
            reset_at: now,
            retry_after: Duration::ZERO,
            counted: false,
        }
    }
}

/// An admission gate the boundary layer can consult.
///
/// This trait abstracts over the single-policy [`Limiter`] and the
/// [`TieredLimiter`] composite so the middleware works with either.
#[async_trait]
pub trait Gate: Send + Sync {
    /// Decide whether this request may proceed, recording it in the store.
    async fn check(&self, ctx: &RequestContext) -> Decision;

    /// Give back the observation recorded for this request.
    ///
    /// Applied after the fact when the response outcome exempts the
    /// request from counting.
    async fn refund(&self, ctx: &RequestContext);

    /// Forget this client's counter for the policy's scope.
    async fn reset(&self, ctx: &RequestContext);
}

/// Enforces one policy against the shared counter store.
pub struct Limiter {
    policy: Policy,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl Limiter {
    /// Create a limiter over a policy, store, and clock.
    pub fn new(policy: Policy, store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            store,
            clock,
        }
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }
}

#[async_trait]
impl Gate for Limiter {
    async fn check(&self, ctx: &RequestContext) -> Decision {
        if self.policy.skips(ctx) {
            trace!(scope = %self.policy.scope(), "Request exempt, admitting without counting");
            return Decision::exempt(self.policy.max(), self.clock.now());
        }

        let key = self.policy.lookup_key(ctx);
        let now = self.clock.now();

        trace!(key = %key, "Checking admission");

        let state = self.store.observe(&key, self.policy.window(), now).await;
        let admitted = state.count <= self.policy.max();
        let remaining = self.policy.max().saturating_sub(state.count);

        if !admitted {
            debug!(
                key = %key,
                count = state.count,
                limit = self.policy.max(),
                "Ceiling exceeded"
            );
        }

        Decision {
            admitted,
            limit: self.policy.max(),
            remaining,
            reset_at: state.window_end,
            retry_after: state.window_end.saturating_duration_since(now),
            counted: true,
        }
    }

    async fn refund(&self, ctx: &RequestContext) {
        // An exempt request recorded nothing, so there is nothing to give back.
        if self.policy.skips(ctx) {
            return;
        }

        let key = self.policy.lookup_key(ctx);
        trace!(key = %key, "Refunding one observation");
        self.store.decrement(&key).await;
    }

    async fn reset(&self, ctx: &RequestContext) {
        let key = self.policy.lookup_key(ctx);
        debug!(key = %key, "Resetting counter");
        self.store.remove(&key).await;
    }
}

/// Burst ceiling gated behind a sustained ceiling.
///
/// The sustained limiter is always consulted first and its denial stands
/// on its own: once sustained traffic is at its ceiling the burst limiter
/// is not evaluated and records nothing. The burst limiter only ever
/// observes requests the sustained limiter admitted. When both admit, the
/// decision with fewer remaining admissions is returned so retry metadata
/// always reflects the tighter constraint.
pub struct TieredLimiter {
    sustained: Limiter,
    burst: Limiter,
}

impl TieredLimiter {
    /// Compose a sustained limiter with a burst limiter.
    pub fn new(sustained: Limiter, burst: Limiter) -> Self {
        Self { sustained, burst }
    }
}

#[async_trait]
impl Gate for TieredLimiter {
    async fn check(&self, ctx: &RequestContext) -> Decision {
        let sustained = self.sustained.check(ctx).await;
        if !sustained.admitted {
            return sustained;
        }

        let burst = self.burst.check(ctx).await;
        if !burst.admitted {
            return burst;
        }

        if burst.remaining <= sustained.remaining {
            burst
        } else {
            sustained
        }
    }

    async fn refund(&self, ctx: &RequestContext) {
        // Refunds only apply to requests that were admitted, and an
        // admitted request was observed by both tiers.
        self.sustained.refund(ctx).await;
        self.burst.refund(ctx).await;
    }

    async fn reset(&self, ctx: &RequestContext) {
        self.sustained.reset(ctx).await;
        self.burst.reset(ctx).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::MockClock;
    use crate::ratelimit::key::KeyStrategy;
    use crate::ratelimit::policy::skip_for_role;
    use crate::ratelimit::store::MemoryStore;

    fn limiter_fixture(scope: &str, max: u64, window: Duration) -> (Limiter, Arc<MemoryStore>, MockClock) {
        let store = Arc::new(MemoryStore::new());
        let clock = MockClock::new();
        let policy = Policy::new(scope, window, max, KeyStrategy::Address).unwrap();
        let limiter = Limiter::new(policy, store.clone(), Arc::new(clock.clone()));
        (limiter, store, clock)
    }

    fn ctx() -> RequestContext {
        RequestContext::new("/auth/login").with_address("203.0.113.9")
    }

    #[tokio::test]
    async fn test_sixth_observation_in_window_is_denied() {
        let (limiter, _, clock) = limiter_fixture("login", 5, Duration::from_secs(60));
        let window_opens = clock.now();

        // Five calls at t = 0..4s all pass.
        for i in 1..=5u64 {
            let decision = limiter.check(&ctx()).await;
            assert!(decision.admitted);
            assert_eq!(decision.remaining, 5 - i);
            clock.advance(Duration::from_secs(1));
        }

        // The sixth call at t = 5s is over the ceiling.
        let decision = limiter.check(&ctx()).await;
        assert!(!decision.admitted);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.limit, 5);
        assert_eq!(decision.reset_at, window_opens + Duration::from_secs(60));
        assert_eq!(decision.retry_after, Duration::from_secs(55));
    }

    #[tokio::test]
    async fn test_window_resets_after_expiry() {
        let (limiter, store, clock) = limiter_fixture("login", 5, Duration::from_secs(60));

        for _ in 0..5 {
            limiter.check(&ctx()).await;
        }

        // At t = 61s the old window is stale: fresh window, count back to 1.
        clock.advance(Duration::from_secs(61));
        let decision = limiter.check(&ctx()).await;

        assert!(decision.admitted);
        assert_eq!(decision.remaining, 4);

        let state = store.peek("203.0.113.9:login").await.unwrap();
        assert_eq!(state.count, 1);
        assert_eq!(state.window_start, clock.now());
    }

    #[tokio::test]
    async fn test_denied_observations_still_count() {
        let (limiter, store, _) = limiter_fixture("login", 2, Duration::from_secs(60));

        for _ in 0..5 {
            limiter.check(&ctx()).await;
        }

        let state = store.peek("203.0.113.9:login").await.unwrap();
        assert_eq!(state.count, 5);
    }

    #[tokio::test]
    async fn test_exempt_request_never_touches_the_store() {
        let store = Arc::new(MemoryStore::new());
        let clock = MockClock::new();
        let policy = Policy::new("general", Duration::from_secs(900), 300, KeyStrategy::User)
            .unwrap()
            .with_skip(skip_for_role("admin"));
        let limiter = Limiter::new(policy, store.clone(), Arc::new(clock.clone()));

        let admin = RequestContext::new("/jobs").with_user("u1").with_role("admin");
        let decision = limiter.check(&admin).await;

        assert!(decision.admitted);
        assert!(!decision.counted);
        assert_eq!(decision.remaining, 300);
        assert!(store.is_empty());

        // A refund for an exempt request is a no-op as well.
        limiter.refund(&admin).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_refund_returns_one_observation() {
        let (limiter, store, _) = limiter_fixture("login", 5, Duration::from_secs(60));

        limiter.check(&ctx()).await;
        limiter.check(&ctx()).await;
        limiter.refund(&ctx()).await;

        let state = store.peek("203.0.113.9:login").await.unwrap();
        assert_eq!(state.count, 1);
    }

    #[tokio::test]
    async fn test_reset_forgets_the_counter() {
        let (limiter, store, _) = limiter_fixture("login", 5, Duration::from_secs(60));

        limiter.check(&ctx()).await;
        limiter.reset(&ctx()).await;

        assert!(store.peek("203.0.113.9:login").await.is_none());

        let decision = limiter.check(&ctx()).await;
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn test_concurrent_checks_admit_at_most_the_ceiling() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(MockClock::new());
        let policy = Policy::new("general", Duration::from_secs(60), 50, KeyStrategy::Address).unwrap();
        let limiter = Arc::new(Limiter::new(policy, store, clock));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                let mut admitted = 0u64;
                for _ in 0..20 {
                    if limiter.check(&ctx()).await.admitted {
                        admitted += 1;
                    }
                }
                admitted
            }));
        }

        let mut total_admitted = 0;
        for handle in handles {
            total_admitted += handle.await.unwrap();
        }

        // 200 attempts against a ceiling of 50: admissions never exceed it.
        assert_eq!(total_admitted, 50);
    }

    fn tiered_fixture(
        sustained_max: u64,
        burst_max: u64,
    ) -> (TieredLimiter, Arc<MemoryStore>, MockClock) {
        let store = Arc::new(MemoryStore::new());
        let clock = MockClock::new();
        let window = Duration::from_secs(900);

        let sustained = Limiter::new(
            Policy::new("api-sustained", window, sustained_max, KeyStrategy::Credential).unwrap(),
            store.clone(),
            Arc::new(clock.clone()),
        );
        let burst = Limiter::new(
            Policy::new("api-burst", window, burst_max, KeyStrategy::Credential).unwrap(),
            store.clone(),
            Arc::new(clock.clone()),
        );

        (TieredLimiter::new(sustained, burst), store, clock)
    }

    fn api_ctx() -> RequestContext {
        RequestContext::new("/api/jobs").with_credential("key-abc")
    }

    #[tokio::test]
    async fn test_sustained_denial_leaves_burst_unevaluated() {
        let (tiered, store, _) = tiered_fixture(2, 10);

        assert!(tiered.check(&api_ctx()).await.admitted);
        assert!(tiered.check(&api_ctx()).await.admitted);

        let denied = tiered.check(&api_ctx()).await;
        assert!(!denied.admitted);
        assert_eq!(denied.limit, 2);

        // The burst counter saw only the two admitted requests.
        let burst = store.peek("key-abc:api-burst").await.unwrap();
        assert_eq!(burst.count, 2);
    }

    #[tokio::test]
    async fn test_burst_ceiling_denies_when_sustained_allows() {
        let (tiered, _, _) = tiered_fixture(100, 2);

        assert!(tiered.check(&api_ctx()).await.admitted);
        assert!(tiered.check(&api_ctx()).await.admitted);

        let denied = tiered.check(&api_ctx()).await;
        assert!(!denied.admitted);
        assert_eq!(denied.limit, 2);
    }

    #[tokio::test]
    async fn test_tiered_reports_the_tighter_decision_when_both_admit() {
        let (tiered, _, _) = tiered_fixture(100, 10);

        let decision = tiered.check(&api_ctx()).await;

        assert!(decision.admitted);
        assert_eq!(decision.limit, 10);
        assert_eq!(decision.remaining, 9);
    }

    #[tokio::test]
    async fn test_tiered_refund_returns_observations_to_both_tiers() {
        let (tiered, store, _) = tiered_fixture(100, 10);

        tiered.check(&api_ctx()).await;
        tiered.check(&api_ctx()).await;
        tiered.refund(&api_ctx()).await;

        let sustained = store.peek("key-abc:api-sustained").await.unwrap();
        let burst = store.peek("key-abc:api-burst").await.unwrap();
        assert_eq!(sustained.count, 1);
        assert_eq!(burst.count, 1);
    }

    #[tokio::test]
    async fn test_tiered_reset_forgets_both_tiers() {
        let (tiered, store, _) = tiered_fixture(100, 10);

        tiered.check(&api_ctx()).await;
        tiered.reset(&api_ctx()).await;

        assert!(store.peek("key-abc:api-sustained").await.is_none());
        assert!(store.peek("key-abc:api-burst").await.is_none());
    }
}
