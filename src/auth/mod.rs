//! Authentication system for api-guard
//!
//! This module provides API token authentication and per-identity rate limiting:
//! - Secret generation, hashing and verification
//! - Prefix-indexed token verification against the identity store
//! - Token-bucket rate limiting keyed by identity
//! - The admit/deny decision and identity lifecycle

pub mod manager;
pub mod ratelimit;
pub mod secret;
pub mod verifier;

pub use manager::{Admission, AuthManager};
pub use ratelimit::{RateLimiterRegistry, TokenBucket};
pub use secret::{
    generate_secret, hash_secret, secret_prefix, verify_secret, GeneratedSecret, HashError,
    SECRET_LENGTH, SECRET_PREFIX_LENGTH,
};
pub use verifier::TokenVerifier;
