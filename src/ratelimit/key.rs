//! Lookup-key derivation from request identity.

use std::fmt;
use std::sync::Arc;

use super::context::RequestContext;

/// Identity used when a request carries no usable signal at all.
///
/// Anonymous traffic with no discernible source shares one counter rather
/// than escaping accounting.
pub const FALLBACK_IDENTITY: &str = "unknown";

/// How a policy derives a client identity from the request context.
///
/// The identity is composed with the policy's scope into the final lookup
/// key, so two policies never share a counter even for the same client.
#[derive(Clone)]
pub enum KeyStrategy {
    /// Key by peer network address.
    Address,
    /// Key by authenticated user id, falling back to the network address.
    User,
    /// Key by supplied external credential, falling back to the network
    /// address.
    Credential,
    /// Key by a caller-provided derivation.
    Custom(Arc<dyn Fn(&RequestContext) -> String + Send + Sync>),
}

impl KeyStrategy {
    /// Derive the client identity for this request.
    ///
    /// Never returns an empty string: when every preferred signal is
    /// absent the stable [`FALLBACK_IDENTITY`] is used instead.
    pub fn identity(&self, ctx: &RequestContext) -> String {
        let derived = match self {
            KeyStrategy::Address => nonempty(&ctx.address).map(str::to_string),
            KeyStrategy::User => nonempty(&ctx.user_id)
                .or_else(|| nonempty(&ctx.address))
                .map(str::to_string),
            KeyStrategy::Credential => nonempty(&ctx.credential)
                .or_else(|| nonempty(&ctx.address))
                .map(str::to_string),
            KeyStrategy::Custom(derive) => {
                let identity = derive(ctx);
                if identity.is_empty() {
                    None
                } else {
                    Some(identity)
                }
            }
        };

        derived.unwrap_or_else(|| FALLBACK_IDENTITY.to_string())
    }

    /// Compose the full lookup key for this request under a scope.
    pub fn lookup_key(&self, ctx: &RequestContext, scope: &str) -> String {
        format!("{}:{}", self.identity(ctx), scope)
    }
}

impl fmt::Debug for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStrategy::Address => write!(f, "Address"),
            KeyStrategy::User => write!(f, "User"),
            KeyStrategy::Credential => write!(f, "Credential"),
            KeyStrategy::Custom(_) => write!(f, "Custom"),
        }
    }
}

fn nonempty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
