//! Turnstile - Scoped Request Throttling
//!
//! This crate implements the throttling engine of a web platform: a shared
//! in-memory counter store keyed by derived client identity, per-scope
//! policies over fixed windows, trust-rule bypass, periodic expiry, and
//! a tower middleware that enforces it all at the HTTP boundary.

pub mod http;
pub mod ratelimit;
pub mod config;
pub mod error;
