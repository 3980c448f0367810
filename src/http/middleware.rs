//! Tower middleware that gates requests through a limiter.

use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::BoxFuture;
use serde_json::json;
use tower::{Layer, Service};
use tracing::debug;

use crate::ratelimit::{Decision, Gate, RequestContext, TrustRules};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const DEFAULT_CREDENTIAL_HEADER: &str = "x-api-key";
const DENIAL_MESSAGE: &str = "Too many requests. Please try again later.";

/// Authenticated caller identity, installed as a request extension by the
/// application's authentication middleware.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// Stable user id
    pub id: String,
    /// Role, when the application assigns one
    pub role: Option<String>,
}

/// Layer that guards a route (or a whole router) with an admission gate.
#[derive(Clone)]
pub struct ThrottleLayer {
    gate: Arc<dyn Gate>,
    trust: Arc<TrustRules>,
    credential_header: String,
    skip_successful: bool,
    skip_failed: bool,
}

impl ThrottleLayer {
    /// Guard requests with the given gate.
    pub fn new(gate: Arc<dyn Gate>) -> Self {
        Self {
            gate,
            trust: Arc::new(TrustRules::default()),
            credential_header: DEFAULT_CREDENTIAL_HEADER.to_string(),
            skip_successful: false,
            skip_failed: false,
        }
    }

    /// Consult these trust rules before the gate; trusted requests pass
    /// through without touching the counter store.
    pub fn with_trust_rules(mut self, trust: Arc<TrustRules>) -> Self {
        self.trust = trust;
        self
    }

    /// Read the caller's credential from this header instead of the
    /// default `x-api-key`.
    pub fn with_credential_header(mut self, name: impl Into<String>) -> Self {
        self.credential_header = name.into();
        self
    }

    /// Refund the observation when the response reports success.
    ///
    /// With this set on a login route, only failed attempts accumulate
    /// toward the ceiling.
    pub fn skip_successful(mut self) -> Self {
        self.skip_successful = true;
        self
    }

    /// Refund the observation when the response reports failure.
    pub fn skip_failed(mut self) -> Self {
        self.skip_failed = true;
        self
    }
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = ThrottleService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ThrottleService {
            inner,
            gate: self.gate.clone(),
            trust: self.trust.clone(),
            credential_header: self.credential_header.clone(),
            skip_successful: self.skip_successful,
            skip_failed: self.skip_failed,
        }
    }
}

/// Middleware service produced by [`ThrottleLayer`].
#[derive(Clone)]
pub struct ThrottleService<S> {
    inner: S,
    gate: Arc<dyn Gate>,
    trust: Arc<TrustRules>,
    credential_header: String,
    skip_successful: bool,
    skip_failed: bool,
}

impl<S> Service<Request> for ThrottleService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let gate = self.gate.clone();
        let trust = self.trust.clone();
        let credential_header = self.credential_header.clone();
        let skip_successful = self.skip_successful;
        let skip_failed = self.skip_failed;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let ctx = build_context(&req, &credential_header);

            if trust.is_trusted(&ctx) {
                return inner.call(req).await;
            }

            let decision = gate.check(&ctx).await;
            if !decision.admitted {
                debug!(route = %ctx.route, "Request throttled");
                return Ok(too_many_requests(&decision));
            }

            let mut response = inner.call(req).await?;
            stamp_rate_limit_headers(response.headers_mut(), &decision);

            if decision.counted && outcome_exempt(response.status(), skip_successful, skip_failed)
            {
                gate.refund(&ctx).await;
            }

            Ok(response)
        })
    }
}

/// Assemble the engine's view of this request.
fn build_context(req: &Request<Body>, credential_header: &str) -> RequestContext {
    let auth = req.extensions().get::<AuthUser>();

    RequestContext {
        address: req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip().to_string()),
        user_id: auth.map(|user| user.id.clone()),
        credential: header_value(req.headers(), credential_header),
        user_agent: header_value(req.headers(), header::USER_AGENT.as_str()),
        role: auth.and_then(|user| user.role.clone()),
        route: req.uri().path().to_string(),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn outcome_exempt(status: StatusCode, skip_successful: bool, skip_failed: bool) -> bool {
    if status.is_success() {
        skip_successful
    } else {
        skip_failed
    }
}

fn too_many_requests(decision: &Decision) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "success": false,
            "message": DENIAL_MESSAGE,
        })),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert(header::RETRY_AFTER, HeaderValue::from(reset_secs(decision)));
    stamp_rate_limit_headers(headers, decision);

    response
}

/// Stamp the gate's verdict onto the response. When gates are nested, the
/// innermost gate stamps first and its headers stand.
fn stamp_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    if headers.contains_key(&X_RATELIMIT_LIMIT) {
        return;
    }
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_secs(decision)));
}

/// Seconds until the window closes, rounded up to whole seconds.
fn reset_secs(decision: &Decision) -> u64 {
    let retry_after = decision.retry_after;
    retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)
}
