//! Domain models for api-guard
//!
//! This module contains the core domain models used throughout the application.

pub mod identity;
pub mod settings;

// Re-export commonly used types
pub use identity::{
    normalize_quota, CreateIdentityRequest, CreatedIdentity, Identity, IdentityInfo, NewIdentity,
};
pub use settings::{
    ContextUser, RateSettings, SessionUser, SETTING_DEFAULT_QUOTA, SETTING_TOKEN_ONLY,
};
