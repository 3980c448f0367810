//! Configuration management for Turnstile.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{Policy, TrustRuleConfig, TrustRules};

/// Main configuration for the Turnstile server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Throttling configuration
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            throttle: ThrottleConfig::default(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

/// Throttling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Seconds between sweeper passes over the counter store
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Request header carrying an external caller's credential
    #[serde(default = "default_credential_header")]
    pub credential_header: String,

    /// Trust rules evaluated before any limiter
    #[serde(default)]
    pub trusted: Vec<TrustRuleConfig>,

    /// Per-scope ceiling overrides applied on top of the presets
    #[serde(default)]
    pub limits: HashMap<String, LimitOverride>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            credential_header: default_credential_header(),
            trusted: Vec::new(),
            limits: HashMap::new(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_credential_header() -> String {
    "x-api-key".to_string()
}

/// Ceiling override for one scope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitOverride {
    /// Observations admitted per window
    pub max: u64,
    /// Window length in seconds
    pub window_secs: u64,
}

impl TurnstileConfig {
    /// Load configuration from a file path.
    ///
    /// The loaded configuration is validated before it is returned, so a
    /// malformed file aborts startup.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TurnstileConfig =
            serde_yaml::from_str(&contents).map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every tunable and compile every pattern, failing fast.
    pub fn validate(&self) -> Result<()> {
        self.throttle.validate()
    }
}

impl ThrottleConfig {
    /// Check tunables and compile trust patterns, failing fast.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(TurnstileError::Config(
                "sweep interval must be positive".to_string(),
            ));
        }
        if self.credential_header.is_empty() {
            return Err(TurnstileError::Config(
                "credential header name must not be empty".to_string(),
            ));
        }
        for (scope, limit) in &self.limits {
            if limit.max == 0 {
                return Err(TurnstileError::Config(format!(
                    "limit override for scope `{}` must have a positive ceiling",
                    scope
                )));
            }
            if limit.window_secs == 0 {
                return Err(TurnstileError::Config(format!(
                    "limit override for scope `{}` must have a positive window",
                    scope
                )));
            }
        }
        TrustRules::compile(&self.trusted)?;
        Ok(())
    }

    /// Interval between sweeper passes.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Compile the configured trust rules.
    pub fn trust_rules(&self) -> Result<TrustRules> {
        TrustRules::compile(&self.trusted)
    }

    /// Apply this configuration's override for the policy's scope, if any.
    pub fn apply_override(&self, policy: Policy) -> Result<Policy> {
        match self.limits.get(policy.scope()) {
            Some(limit) => policy.with_ceiling(limit.max, Duration::from_secs(limit.window_secs)),
            None => Ok(policy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::presets;

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();

        assert_eq!(config.server.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.throttle.sweep_interval_secs, 300);
        assert_eq!(config.throttle.credential_header, "x-api-key");
        assert!(config.throttle.trusted.is_empty());
        assert!(config.throttle.limits.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parses_full_yaml() {
        let yaml = r#"
server:
  bind_addr: "0.0.0.0:9000"
throttle:
  sweep_interval_secs: 60
  credential_header: "x-client-key"
  trusted:
    - field: address
      contains: "10.0."
    - field: user_agent
      pattern: "(?i)statuscake"
  limits:
    login:
      max: 10
      window_secs: 600
"#;
        let config: TurnstileConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.bind_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.throttle.sweep_interval_secs, 60);
        assert_eq!(config.throttle.trusted.len(), 2);
        assert_eq!(config.throttle.limits["login"].max, 10);
    }

    #[test]
    fn test_zero_sweep_interval_is_rejected() {
        let config = ThrottleConfig {
            sweep_interval_secs: 0,
            ..ThrottleConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_override_ceiling_is_rejected() {
        let mut config = ThrottleConfig::default();
        config.limits.insert(
            "login".to_string(),
            LimitOverride {
                max: 0,
                window_secs: 600,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_trust_pattern_is_rejected() {
        let config = ThrottleConfig {
            trusted: vec![TrustRuleConfig {
                field: crate::ratelimit::TrustField::Address,
                contains: None,
                pattern: Some("10.0.[".to_string()),
            }],
            ..ThrottleConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_override_rebuilds_the_policy() {
        let mut config = ThrottleConfig::default();
        config.limits.insert(
            "login".to_string(),
            LimitOverride {
                max: 10,
                window_secs: 600,
            },
        );

        let policy = config.apply_override(presets::login().unwrap()).unwrap();
        assert_eq!(policy.max(), 10);
        assert_eq!(policy.window(), Duration::from_secs(600));

        let untouched = config.apply_override(presets::search().unwrap()).unwrap();
        assert_eq!(untouched.max(), 60);
    }
}
