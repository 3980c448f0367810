//! HTTP server wiring the throttles around the application routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::info;

use crate::error::Result;
use crate::ratelimit::{Gate, TrustRules};

use super::middleware::ThrottleLayer;

/// Admission gates for each guarded route group.
///
/// The handlers behind these routes are stand-ins for the application
/// proper; the throttling wired around them is the point.
pub struct RouteGates {
    /// Ceiling applied to the whole router
    pub general: Arc<dyn Gate>,
    /// Login attempts; successful attempts are refunded
    pub login: Arc<dyn Gate>,
    /// Account creation
    pub registration: Arc<dyn Gate>,
    /// Application submissions
    pub submissions: Arc<dyn Gate>,
    /// Search queries
    pub search: Arc<dyn Gate>,
    /// Chat messages
    pub messages: Arc<dyn Gate>,
    /// Credentialed API callers, burst gated behind sustained
    pub api: Arc<dyn Gate>,
}

/// Build the application router with throttles attached.
pub fn create_router(
    gates: RouteGates,
    trust: Arc<TrustRules>,
    credential_header: &str,
) -> Router {
    let throttle = |gate: Arc<dyn Gate>| {
        ThrottleLayer::new(gate)
            .with_trust_rules(trust.clone())
            .with_credential_header(credential_header)
    };

    Router::new()
        .route("/health", get(health))
        .route(
            "/auth/login",
            post(login).layer(throttle(gates.login).skip_successful()),
        )
        .route(
            "/auth/register",
            post(register).layer(throttle(gates.registration)),
        )
        .route(
            "/applications",
            post(submit_application).layer(throttle(gates.submissions)),
        )
        .route("/search", get(search).layer(throttle(gates.search)))
        .route("/messages", post(send_message).layer(throttle(gates.messages)))
        .route("/api/jobs", get(list_jobs).layer(throttle(gates.api)))
        .layer(throttle(gates.general))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn login() -> Json<Value> {
    Json(json!({ "success": true }))
}

async fn register() -> Json<Value> {
    Json(json!({ "success": true }))
}

async fn submit_application() -> Json<Value> {
    Json(json!({ "success": true }))
}

async fn search() -> Json<Value> {
    Json(json!({ "success": true, "results": [] }))
}

async fn send_message() -> Json<Value> {
    Json(json!({ "success": true }))
}

async fn list_jobs() -> Json<Value> {
    Json(json!({ "success": true, "jobs": [] }))
}

/// HTTP server for the throttled application.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Router with throttles already attached
    router: Router,
}

impl HttpServer {
    /// Create a server for the given address and router.
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await?;
        Ok(())
    }
}
