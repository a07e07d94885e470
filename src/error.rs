//! Application error types for api-guard
//!
//! This module defines the error types used throughout the application.
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Request-path authentication errors
///
/// Every variant except `RateLimited` is reported to the caller through the
/// same generic response, so the variants only matter for logs and metrics.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    /// No token presented and no session fallback available
    #[error("Missing API token")]
    MissingToken,

    /// Presented string fails the minimum length check
    #[error("Malformed API token")]
    MalformedToken,

    /// No enabled, live identity owns the token prefix
    #[error("Unknown or disabled identity")]
    UnknownOrDisabledIdentity,

    /// Prefix matched but the secret did not
    #[error("Secret mismatch")]
    SecretMismatch,

    /// Verified identity exceeded its quota
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Identity store failed during lookup
    #[error("Identity store unavailable")]
    StoreUnavailable,
}

impl AuthError {
    /// Short label used for metrics and structured logs
    pub fn outcome(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::MalformedToken => "malformed_token",
            AuthError::UnknownOrDisabledIdentity => "unknown_identity",
            AuthError::SecretMismatch => "secret_mismatch",
            AuthError::RateLimited => "rate_limited",
            AuthError::StoreUnavailable => "store_unavailable",
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Async connection error
    #[error("Database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Administrative identity lifecycle errors
///
/// Unlike `AuthError` these are surfaced with detail so an operator can fix
/// the input.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Identity name empty after trimming
    #[error("Name can not be empty")]
    EmptyName,

    /// A live identity already uses the name
    #[error("Identity already exists: {0}")]
    DuplicateName(String),

    /// No live identity with the id
    #[error("Identity not found: {0}")]
    NotFound(i64),

    /// Secret generation or hashing failed
    #[error("Secret hashing failed: {0}")]
    Hash(String),

    /// Underlying persistence failure
    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl IdentityError {
    /// Map a store error for an operation keyed by identity id
    pub(crate) fn for_id(id: i64, error: DbError) -> Self {
        match error {
            DbError::NotFound => IdentityError::NotFound(id),
            other => IdentityError::Database(other),
        }
    }
}
