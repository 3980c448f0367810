//! Trust rules that exempt requests from throttling entirely.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Result, TurnstileError};

use super::context::RequestContext;

/// Which request field a trust rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustField {
    /// Peer network address
    Address,
    /// User-agent string
    UserAgent,
}

/// One trust rule as written in the configuration file.
///
/// Exactly one of `contains` or `pattern` must be set; this is checked
/// when the rule is compiled, not when the file is parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustRuleConfig {
    /// Field the rule inspects
    pub field: TrustField,
    /// Literal substring test
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    /// Regular-expression test
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone)]
enum TrustMatcher {
    Substring(String),
    Pattern(Regex),
}

/// A compiled trust rule.
#[derive(Debug, Clone)]
pub struct TrustRule {
    field: TrustField,
    matcher: TrustMatcher,
}

impl TrustRule {
    /// Rule matching when `field` contains the given literal.
    pub fn substring(field: TrustField, literal: impl Into<String>) -> Self {
        Self {
            field,
            matcher: TrustMatcher::Substring(literal.into()),
        }
    }

    /// Rule matching when `field` matches the given pattern.
    ///
    /// The pattern is compiled here so a malformed one fails at startup.
    pub fn pattern(field: TrustField, pattern: &str) -> Result<Self> {
        let compiled = Regex::new(pattern).map_err(|e| {
            TurnstileError::Config(format!("invalid trust rule pattern `{}`: {}", pattern, e))
        })?;
        Ok(Self {
            field,
            matcher: TrustMatcher::Pattern(compiled),
        })
    }

    /// Compile one configured rule.
    pub fn compile(config: &TrustRuleConfig) -> Result<Self> {
        match (&config.contains, &config.pattern) {
            (Some(literal), None) => Ok(Self::substring(config.field, literal)),
            (None, Some(pattern)) => Self::pattern(config.field, pattern),
            _ => Err(TurnstileError::Config(
                "trust rule must set exactly one of `contains` or `pattern`".to_string(),
            )),
        }
    }

    fn matches(&self, ctx: &RequestContext) -> bool {
        let value = match self.field {
            TrustField::Address => ctx.address.as_deref(),
            TrustField::UserAgent => ctx.user_agent.as_deref(),
        };
        let Some(value) = value else {
            return false;
        };

        match &self.matcher {
            TrustMatcher::Substring(literal) => value.contains(literal.as_str()),
            TrustMatcher::Pattern(pattern) => pattern.is_match(value),
        }
    }
}

/// Ordered list of trust rules consulted before any limiter runs.
///
/// The first matching rule wins; any match bypasses throttling, so
/// trusted traffic never writes to the counter store.
#[derive(Debug, Clone, Default)]
pub struct TrustRules {
    rules: Vec<TrustRule>,
}

impl TrustRules {
    /// A rule set from already-compiled rules.
    pub fn new(rules: Vec<TrustRule>) -> Self {
        Self { rules }
    }

    /// Compile a configured rule list, failing fast on a malformed entry.
    pub fn compile(configs: &[TrustRuleConfig]) -> Result<Self> {
        let rules = configs.iter().map(TrustRule::compile).collect::<Result<_>>()?;
        Ok(Self { rules })
    }

    /// Whether this request bypasses throttling.
    pub fn is_trusted(&self, ctx: &RequestContext) -> bool {
        let trusted = self.rules.iter().any(|rule| rule.matches(ctx));
        if trusted {
            trace!(route = %ctx.route, "Request matches a trust rule");
        }
        trusted
    }

    /// Number of compiled rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the rule set is empty.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
