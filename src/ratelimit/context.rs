//! Request-scoped facts the boundary layer hands to the engine.

/// Everything the engine may inspect about one inbound request.
///
/// The HTTP adapter builds one of these per request; the engine itself
/// never looks at the request object. All identity fields are optional
/// because any of them can be absent on a given request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Peer network address, formatted by the boundary layer
    pub address: Option<String>,
    /// Authenticated user id, when a session or token resolved one
    pub user_id: Option<String>,
    /// External credential supplied with the request, such as an API key
    pub credential: Option<String>,
    /// User-agent string, when present
    pub user_agent: Option<String>,
    /// Role of the authenticated user, when known
    pub role: Option<String>,
    /// Route or action label, for logging and diagnostics
    pub route: String,
}

impl RequestContext {
    /// Create a context for the given route with no identity signals.
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            ..Self::default()
        }
    }

    /// Attach the peer network address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Attach the authenticated user id.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach an external credential.
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Attach the user-agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Attach the authenticated user's role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}
