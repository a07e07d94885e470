//! Global rate settings and request-scoped user models

use serde::{Deserialize, Serialize};

/// Settings key for the token-only policy
pub const SETTING_TOKEN_ONLY: &str = "api_token_only";

/// Settings key for the default per-minute quota
pub const SETTING_DEFAULT_QUOTA: &str = "api_default_rate_limit";

/// Process-wide rate settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSettings {
    /// Require a verified token for every protected request
    pub token_only: bool,

    /// Quota applied to identities without their own (0 = unlimited)
    pub default_quota_per_minute: i64,
}

impl RateSettings {
    /// Snapshot used when the settings store cannot be read.
    ///
    /// Requires tokens and leaves quotas unlimited.
    pub const FAIL_CLOSED: RateSettings = RateSettings {
        token_only: true,
        default_quota_per_minute: 0,
    };
}

/// User established by an upstream session layer
///
/// Session middleware inserts this into request extensions before the API
/// gate runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: i64,
    pub username: String,
}

/// Generic "logged in user" visible to downstream handlers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextUser {
    pub id: i64,
    pub username: String,
}

impl From<SessionUser> for ContextUser {
    fn from(user: SessionUser) -> Self {
        Self {
            id: user.id,
            username: user.username,
        }
    }
}
