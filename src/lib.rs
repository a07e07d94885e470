//! api-guard - API token authentication and per-identity rate limiting
//!
//! This crate guards an administrative HTTP surface with long-lived API tokens.
//! Each token belongs to an identity with its own per-minute quota, enforced by
//! an in-process token bucket. Requests without a token can optionally fall back
//! to an upstream session login.

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod otel;
pub mod server;
