//! Admission policies: scope, window, ceiling, and key derivation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, TurnstileError};

use super::context::RequestContext;
use super::key::KeyStrategy;

/// Predicate deciding that a request is exempt from counting.
pub type SkipPredicate = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Immutable throttling configuration for one scope.
///
/// A policy never changes after construction; anything tunable is decided
/// when the composition root builds it.
#[derive(Clone)]
pub struct Policy {
    /// Scope discriminator mixed into every lookup key
    scope: String,
    /// Length of one counting window
    window: Duration,
    /// Observations admitted per window; the count above this denies
    max: u64,
    /// Identity derivation for the lookup key
    key_strategy: KeyStrategy,
    /// Optional exemption, evaluated before the store is touched
    skip: Option<SkipPredicate>,
}

impl Policy {
    /// Create a validated policy.
    ///
    /// Non-positive ceilings and windows are configuration mistakes and
    /// fail here, at startup, rather than surfacing per request.
    pub fn new(
        scope: impl Into<String>,
        window: Duration,
        max: u64,
        key_strategy: KeyStrategy,
    ) -> Result<Self> {
        let scope = scope.into();
        if scope.is_empty() {
            return Err(TurnstileError::Policy(
                "scope name must not be empty".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(TurnstileError::Policy(format!(
                "window must be a positive duration for scope `{}`",
                scope
            )));
        }
        if max == 0 {
            return Err(TurnstileError::Policy(format!(
                "ceiling must be positive for scope `{}`",
                scope
            )));
        }

        Ok(Self {
            scope,
            window,
            max,
            key_strategy,
            skip: None,
        })
    }

    /// Attach an exemption predicate.
    ///
    /// When the predicate returns true the request is admitted without
    /// touching the counter store.
    pub fn with_skip(mut self, skip: SkipPredicate) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Rebuild this policy with a different ceiling and window.
    ///
    /// Used to apply per-scope configuration overrides on top of a preset;
    /// the new values go through the same validation as construction.
    pub fn with_ceiling(self, max: u64, window: Duration) -> Result<Self> {
        let rebuilt = Policy::new(self.scope, window, max, self.key_strategy)?;
        Ok(Self {
            skip: self.skip,
            ..rebuilt
        })
    }

    /// Scope discriminator for this policy.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Length of one counting window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Observations admitted per window.
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Whether this request is exempt from counting.
    pub fn skips(&self, ctx: &RequestContext) -> bool {
        self.skip.as_ref().is_some_and(|skip| skip(ctx))
    }

    /// The counter key this request maps to.
    pub fn lookup_key(&self, ctx: &RequestContext) -> String {
        self.key_strategy.lookup_key(ctx, &self.scope)
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("scope", &self.scope)
            .field("window", &self.window)
            .field("max", &self.max)
            .field("key_strategy", &self.key_strategy)
            .field("skip", &self.skip.is_some())
            .finish()
    }
}

/// Exemption for callers holding an elevated role.
pub fn skip_for_role(role: impl Into<String>) -> SkipPredicate {
    let role = role.into();
    Arc::new(move |ctx: &RequestContext| ctx.role.as_deref() == Some(role.as_str()))
}
