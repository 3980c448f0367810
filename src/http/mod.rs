//! HTTP boundary: throttling middleware and the server.

mod middleware;
mod server;

pub use middleware::{AuthUser, ThrottleLayer, ThrottleService};
pub use server::{create_router, HttpServer, RouteGates};
