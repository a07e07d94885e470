//! Identity-related domain models
//!
//! This module defines models for API identities, their creation requests and
//! the safe views returned to administrators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// API identity stored in database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Immutable identity ID
    pub id: i64,

    /// Unique human-readable name
    pub name: String,

    /// Hashed secret (argon2id PHC string)
    #[serde(skip_serializing, default)]
    pub secret_hash: String,

    /// First characters of the plaintext secret, used to index lookups
    pub secret_prefix: String,

    /// Per-minute quota (0 = use the global default)
    pub quota_per_minute: i64,

    /// Whether the identity may authenticate
    pub enabled: bool,

    /// When the identity was created
    pub created_at: DateTime<Utc>,

    /// When the identity last authenticated successfully
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// Create an enabled identity (mostly useful in tests)
    pub fn new(
        id: i64,
        name: impl Into<String>,
        secret_prefix: impl Into<String>,
        secret_hash: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            secret_hash: secret_hash.into(),
            secret_prefix: secret_prefix.into(),
            quota_per_minute: 0,
            enabled: true,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    /// Set the per-minute quota
    pub fn with_quota(mut self, quota_per_minute: i64) -> Self {
        self.quota_per_minute = normalize_quota(quota_per_minute);
        self
    }

    /// Set the enabled flag
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Negative quotas are stored as 0
pub fn normalize_quota(quota_per_minute: i64) -> i64 {
    quota_per_minute.max(0)
}

/// Row to insert for a new identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentity {
    pub name: String,
    pub secret_prefix: String,
    pub secret_hash: String,
    pub quota_per_minute: i64,
}

/// Request to create a new identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIdentityRequest {
    /// Human-readable name
    pub name: String,

    /// Per-minute quota (0 or absent = use default)
    #[serde(default)]
    pub quota_per_minute: i64,
}

impl CreateIdentityRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quota_per_minute: 0,
        }
    }

    pub fn with_quota(mut self, quota_per_minute: i64) -> Self {
        self.quota_per_minute = quota_per_minute;
        self
    }
}

/// Identity plus its plaintext secret, returned exactly once at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedIdentity {
    /// The stored identity
    pub identity: IdentityInfo,

    /// Plaintext token (never stored)
    pub token: String,
}

/// Identity view that is safe to return from the admin surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityInfo {
    pub id: i64,
    pub name: String,
    /// Masked prefix for identification (e.g. "Ab12Cd34***")
    pub token_prefix: String,
    pub quota_per_minute: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<&Identity> for IdentityInfo {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            name: identity.name.clone(),
            token_prefix: format!("{}***", identity.secret_prefix),
            quota_per_minute: identity.quota_per_minute,
            enabled: identity.enabled,
            created_at: identity.created_at,
            last_used_at: identity.last_used_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: New identity is enabled with default quota
    #[test]
    fn test_identity_new_defaults() {
        let identity = Identity::new(1, "ci", "AbCdEfGh", "hash");
        assert!(identity.enabled);
        assert_eq!(identity.quota_per_minute, 0);
        assert!(identity.last_used_at.is_none());
    }

    // Test 2: Negative quotas are normalized
    #[test]
    fn test_identity_quota_normalized() {
        let identity = Identity::new(1, "ci", "AbCdEfGh", "hash").with_quota(-5);
        assert_eq!(identity.quota_per_minute, 0);
        assert_eq!(normalize_quota(30), 30);
        assert_eq!(normalize_quota(-1), 0);
    }

    // Test 3: Serialized identity never contains the hash
    #[test]
    fn test_identity_serialization_skips_hash() {
        let identity = Identity::new(1, "ci", "AbCdEfGh", "$argon2id$secret");
        let json = serde_json::to_string(&identity).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(!json.contains("secret_hash"));
    }

    // Test 4: IdentityInfo masks the prefix
    #[test]
    fn test_identity_info_from_identity() {
        let identity = Identity::new(9, "deploy", "AbCdEfGh", "hash").with_quota(60);
        let info = IdentityInfo::from(&identity);
        assert_eq!(info.id, 9);
        assert_eq!(info.token_prefix, "AbCdEfGh***");
        assert_eq!(info.quota_per_minute, 60);
    }

    // Test 5: CreateIdentityRequest quota defaults to zero when absent
    #[test]
    fn test_create_request_deserialize_default_quota() {
        let req: CreateIdentityRequest = serde_json::from_str(r#"{"name":"ci"}"#).unwrap();
        assert_eq!(req, CreateIdentityRequest::new("ci"));
    }
}
