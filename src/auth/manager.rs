//! Authentication manager
//!
//! This module provides the main authentication interface for the application.
//! It owns the token verifier and the per-identity rate limiters, makes the
//! admit/deny decision for each request and runs the identity lifecycle.

use std::sync::Arc;

use crate::config::AuthConfig;
use crate::database::Database;
use crate::error::{AuthError, DbError, IdentityError};
use crate::models::{
    normalize_quota, CreateIdentityRequest, CreatedIdentity, Identity, IdentityInfo, NewIdentity,
    RateSettings, SessionUser, SETTING_DEFAULT_QUOTA, SETTING_TOKEN_ONLY,
};
use crate::otel::AuthMetrics;

use super::ratelimit::RateLimiterRegistry;
use super::secret::{generate_secret, GeneratedSecret};
use super::verifier::TokenVerifier;

/// Outcome of a successful gate decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A verified API token within its quota
    Token(Identity),

    /// No token, but an upstream session was accepted
    Session(SessionUser),
}

impl Admission {
    fn outcome(&self) -> &'static str {
        match self {
            Admission::Token(_) => "admitted_token",
            Admission::Session(_) => "admitted_session",
        }
    }
}

/// Authentication manager
///
/// Provides methods for authenticating requests and managing identities.
pub struct AuthManager<D: Database> {
    db: Arc<D>,
    defaults: AuthConfig,
    verifier: TokenVerifier<D>,
    registry: Arc<RateLimiterRegistry>,
    metrics: AuthMetrics,
}

impl<D: Database + 'static> AuthManager<D> {
    /// Create a new authentication manager
    ///
    /// `defaults` apply while the settings table has no stored value.
    pub fn new(db: Arc<D>, defaults: AuthConfig) -> Self {
        Self::with_metrics(db, defaults, AuthMetrics::global())
    }

    /// Create a new authentication manager with explicit metrics
    pub fn with_metrics(db: Arc<D>, defaults: AuthConfig, metrics: AuthMetrics) -> Self {
        let verifier = TokenVerifier::with_metrics(Arc::clone(&db), metrics.clone());
        Self {
            db,
            defaults,
            verifier,
            registry: Arc::new(RateLimiterRegistry::new()),
            metrics,
        }
    }

    /// Shared rate limiter registry
    pub fn registry(&self) -> &Arc<RateLimiterRegistry> {
        &self.registry
    }

    // =========================================================================
    // Request path
    // =========================================================================

    /// Decide whether a request may proceed
    ///
    /// `token` is the raw candidate extracted from the request, `session` the
    /// user established by an upstream session layer, if any. Settings are read
    /// once per call.
    pub async fn admit(
        &self,
        token: Option<&str>,
        session: Option<&SessionUser>,
    ) -> Result<Admission, AuthError> {
        let settings = self.rate_settings().await;
        let result = self.decide(token, session, &settings).await;

        match &result {
            Ok(admission) => self.metrics.record_decision(admission.outcome()),
            Err(e) => {
                tracing::debug!(outcome = e.outcome(), "API request rejected");
                self.metrics.record_decision(e.outcome());
            }
        }

        result
    }

    async fn decide(
        &self,
        token: Option<&str>,
        session: Option<&SessionUser>,
        settings: &RateSettings,
    ) -> Result<Admission, AuthError> {
        let token = token.map(str::trim).filter(|t| !t.is_empty());

        let Some(token) = token else {
            return match session {
                Some(user) if !settings.token_only => Ok(Admission::Session(user.clone())),
                _ => Err(AuthError::MissingToken),
            };
        };

        let identity = self.verifier.verify(token).await?;
        let quota = Self::effective_quota(&identity, settings);

        if !self.registry.allow(identity.id, quota) {
            tracing::info!(
                identity_id = identity.id,
                quota_per_minute = quota,
                "API rate limit exceeded"
            );
            return Err(AuthError::RateLimited);
        }

        Ok(Admission::Token(identity))
    }

    /// Per-minute quota that applies to an identity
    ///
    /// The identity's own quota wins when positive; otherwise the default
    /// applies. Zero means unlimited.
    pub fn effective_quota(identity: &Identity, settings: &RateSettings) -> i64 {
        if identity.quota_per_minute > 0 {
            identity.quota_per_minute
        } else {
            normalize_quota(settings.default_quota_per_minute)
        }
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Current rate settings
    ///
    /// Absent values fall back to the configured defaults; a store failure
    /// yields `RateSettings::FAIL_CLOSED`.
    pub async fn rate_settings(&self) -> RateSettings {
        match self.stored_rate_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read rate settings, requiring tokens");
                RateSettings::FAIL_CLOSED
            }
        }
    }

    /// Rate settings as stored, with configured defaults for absent values
    ///
    /// Unlike `rate_settings` a store failure is returned to the caller.
    pub async fn stored_rate_settings(&self) -> Result<RateSettings, DbError> {
        let token_only = match self.db.get_setting(SETTING_TOKEN_ONLY).await? {
            Some(value) => parse_bool(&value).unwrap_or(true),
            None => self.defaults.token_only,
        };

        let default_quota_per_minute = match self.db.get_setting(SETTING_DEFAULT_QUOTA).await? {
            Some(value) => value.trim().parse().map(normalize_quota).unwrap_or(0),
            None => normalize_quota(self.defaults.default_quota_per_minute),
        };

        Ok(RateSettings {
            token_only,
            default_quota_per_minute,
        })
    }

    /// Persist both rate settings
    pub async fn update_rate_settings(&self, settings: RateSettings) -> Result<RateSettings, DbError> {
        let settings = RateSettings {
            token_only: settings.token_only,
            default_quota_per_minute: normalize_quota(settings.default_quota_per_minute),
        };

        self.db
            .set_setting(SETTING_TOKEN_ONLY, &settings.token_only.to_string())
            .await?;
        self.db
            .set_setting(
                SETTING_DEFAULT_QUOTA,
                &settings.default_quota_per_minute.to_string(),
            )
            .await?;

        tracing::info!(
            token_only = settings.token_only,
            default_quota_per_minute = settings.default_quota_per_minute,
            "Rate settings updated"
        );
        Ok(settings)
    }

    /// Store settings and create a first identity if none exists yet
    ///
    /// Returns the bootstrap identity with its one-time token when one was
    /// created.
    pub async fn install(
        &self,
        settings: RateSettings,
        bootstrap: CreateIdentityRequest,
    ) -> Result<Option<CreatedIdentity>, IdentityError> {
        self.update_rate_settings(settings).await?;

        if self.db.count_identities().await? > 0 {
            tracing::info!("Identities already exist, skipping bootstrap identity");
            return Ok(None);
        }

        self.create_identity(bootstrap).await.map(Some)
    }

    // =========================================================================
    // Identity lifecycle
    // =========================================================================

    /// Create a new identity
    ///
    /// The plaintext token is only returned here and cannot be retrieved later.
    pub async fn create_identity(
        &self,
        request: CreateIdentityRequest,
    ) -> Result<CreatedIdentity, IdentityError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(IdentityError::EmptyName);
        }

        let secret = new_secret().await?;
        let new = NewIdentity {
            name: name.clone(),
            secret_prefix: secret.prefix.clone(),
            secret_hash: secret.hash.clone(),
            quota_per_minute: normalize_quota(request.quota_per_minute),
        };

        let id = self.db.create_identity(&new).await.map_err(|e| match e {
            DbError::ConstraintViolation(_) => IdentityError::DuplicateName(name.clone()),
            other => IdentityError::Database(other),
        })?;

        let identity = self.get_identity(id).await?;
        tracing::info!(identity_id = id, name = %identity.name, "API identity created");

        Ok(CreatedIdentity {
            identity: IdentityInfo::from(&identity),
            token: secret.plaintext,
        })
    }

    /// Get a live identity
    pub async fn get_identity(&self, id: i64) -> Result<Identity, IdentityError> {
        self.db
            .get_identity(id)
            .await?
            .ok_or(IdentityError::NotFound(id))
    }

    /// List live identities ordered by ID
    pub async fn list_identities(&self) -> Result<Vec<Identity>, IdentityError> {
        Ok(self.db.list_identities().await?)
    }

    /// Count live identities
    pub async fn count_identities(&self) -> Result<u64, IdentityError> {
        Ok(self.db.count_identities().await?)
    }

    /// Enable or disable an identity; takes effect on the next request
    pub async fn set_enabled(&self, id: i64, enabled: bool) -> Result<(), IdentityError> {
        self.db
            .set_identity_enabled(id, enabled)
            .await
            .map_err(|e| IdentityError::for_id(id, e))?;

        tracing::info!(identity_id = id, enabled, "API identity updated");
        Ok(())
    }

    /// Change the per-minute quota (0 = use the default)
    pub async fn update_quota(&self, id: i64, quota_per_minute: i64) -> Result<(), IdentityError> {
        let quota_per_minute = normalize_quota(quota_per_minute);
        self.db
            .update_identity_quota(id, quota_per_minute)
            .await
            .map_err(|e| IdentityError::for_id(id, e))?;

        tracing::info!(identity_id = id, quota_per_minute, "API identity quota updated");
        Ok(())
    }

    /// Replace the secret of an identity
    ///
    /// The old token stops working immediately; the new one is returned once.
    pub async fn rotate_identity(&self, id: i64) -> Result<CreatedIdentity, IdentityError> {
        let secret = new_secret().await?;
        self.db
            .rotate_identity_secret(id, &secret.prefix, &secret.hash)
            .await
            .map_err(|e| IdentityError::for_id(id, e))?;

        let identity = self.get_identity(id).await?;
        tracing::info!(identity_id = id, "API identity secret rotated");

        Ok(CreatedIdentity {
            identity: IdentityInfo::from(&identity),
            token: secret.plaintext,
        })
    }

    /// Delete an identity and forget its limiter
    pub async fn delete_identity(&self, id: i64) -> Result<(), IdentityError> {
        self.db
            .delete_identity(id)
            .await
            .map_err(|e| IdentityError::for_id(id, e))?;
        self.registry.remove(id);

        tracing::info!(identity_id = id, "API identity deleted");
        Ok(())
    }
}

async fn new_secret() -> Result<GeneratedSecret, IdentityError> {
    tokio::task::spawn_blocking(generate_secret)
        .await
        .map_err(|e| IdentityError::Hash(e.to_string()))?
        .map_err(|e| IdentityError::Hash(e.to_string()))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::secret::hash_secret;
    use crate::database::MockDatabase;

    const TOKEN: &str = "AbCdEfGhIjKlMnOpQrStUvWxYz0123456789AbCdEfGhIjKl";

    fn defaults() -> AuthConfig {
        AuthConfig {
            token_only: true,
            default_quota_per_minute: 120,
        }
    }

    fn session_user() -> SessionUser {
        SessionUser {
            id: 7,
            username: "admin".to_string(),
        }
    }

    fn expect_settings(mock_db: &mut MockDatabase, token_only: Option<&str>, quota: Option<&str>) {
        let token_only = token_only.map(str::to_string);
        let quota = quota.map(str::to_string);
        mock_db
            .expect_get_setting()
            .withf(|key| key == SETTING_TOKEN_ONLY)
            .returning(move |_| Ok(token_only.clone()));
        mock_db
            .expect_get_setting()
            .withf(|key| key == SETTING_DEFAULT_QUOTA)
            .returning(move |_| Ok(quota.clone()));
    }

    fn expect_identity(mock_db: &mut MockDatabase, identity: Identity) {
        mock_db
            .expect_find_enabled_by_prefix()
            .returning(move |_| Ok(Some(identity.clone())));
        mock_db
            .expect_touch_identity_last_used()
            .returning(|_, _| Ok(()));
    }

    fn stored_identity(id: i64, quota: i64) -> Identity {
        Identity::new(id, "ci", &TOKEN[..8], hash_secret(TOKEN).unwrap()).with_quota(quota)
    }

    // Test 1: Verified token within quota is admitted
    #[tokio::test]
    async fn test_admit_token_success() {
        let mut mock_db = MockDatabase::new();
        expect_settings(&mut mock_db, None, None);
        expect_identity(&mut mock_db, stored_identity(5, 0));

        let manager = AuthManager::new(Arc::new(mock_db), defaults());
        let admission = manager.admit(Some(TOKEN), None).await.unwrap();

        match admission {
            Admission::Token(identity) => assert_eq!(identity.id, 5),
            other => panic!("Expected token admission, got {:?}", other),
        }
    }

    // Test 2: No token in token-only mode is rejected even with a session
    #[tokio::test]
    async fn test_admit_missing_token_token_only() {
        let mut mock_db = MockDatabase::new();
        expect_settings(&mut mock_db, Some("true"), None);

        let manager = AuthManager::new(Arc::new(mock_db), defaults());

        assert_eq!(
            manager.admit(None, Some(&session_user())).await,
            Err(AuthError::MissingToken)
        );
        assert_eq!(
            manager.admit(Some("   "), None).await,
            Err(AuthError::MissingToken)
        );
    }

    // Test 3: Session fallback when token-only is off
    #[tokio::test]
    async fn test_admit_session_fallback() {
        let mut mock_db = MockDatabase::new();
        expect_settings(&mut mock_db, Some("false"), None);

        let manager = AuthManager::new(Arc::new(mock_db), defaults());

        assert_eq!(
            manager.admit(None, Some(&session_user())).await,
            Ok(Admission::Session(session_user()))
        );
        assert_eq!(
            manager.admit(None, None).await,
            Err(AuthError::MissingToken)
        );
    }

    // Test 4: Settings read failure requires tokens
    #[tokio::test]
    async fn test_admit_settings_failure_fails_closed() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_get_setting()
            .returning(|_| Err(DbError::Sqlite(rusqlite::Error::InvalidQuery)));

        let manager = AuthManager::new(Arc::new(mock_db), defaults());

        assert_eq!(manager.rate_settings().await, RateSettings::FAIL_CLOSED);
        assert_eq!(
            manager.admit(None, Some(&session_user())).await,
            Err(AuthError::MissingToken)
        );

        // The stored view reports the failure instead of the fallback
        assert!(manager.stored_rate_settings().await.is_err());
    }

    // Test 5: Verification errors pass through unchanged
    #[tokio::test]
    async fn test_admit_propagates_verifier_errors() {
        let mut mock_db = MockDatabase::new();
        expect_settings(&mut mock_db, None, None);
        mock_db
            .expect_find_enabled_by_prefix()
            .returning(|_| Ok(None));

        let manager = AuthManager::new(Arc::new(mock_db), defaults());

        assert_eq!(
            manager.admit(Some("short"), None).await,
            Err(AuthError::MalformedToken)
        );
        assert_eq!(
            manager.admit(Some(TOKEN), None).await,
            Err(AuthError::UnknownOrDisabledIdentity)
        );
    }

    // Test 6: Identity quota is enforced
    #[tokio::test]
    async fn test_admit_rate_limited() {
        let mut mock_db = MockDatabase::new();
        expect_settings(&mut mock_db, None, None);
        expect_identity(&mut mock_db, stored_identity(9, 2));

        let manager = AuthManager::new(Arc::new(mock_db), defaults());

        assert!(manager.admit(Some(TOKEN), None).await.is_ok());
        assert!(manager.admit(Some(TOKEN), None).await.is_ok());
        assert_eq!(
            manager.admit(Some(TOKEN), None).await,
            Err(AuthError::RateLimited)
        );
    }

    // Test 7: Effective quota resolution
    #[test]
    fn test_effective_quota() {
        let settings = RateSettings {
            token_only: true,
            default_quota_per_minute: 60,
        };
        let own = Identity::new(1, "a", "AbCdEfGh", "h").with_quota(10);
        let inherit = Identity::new(2, "b", "AbCdEfGh", "h");

        assert_eq!(AuthManager::<MockDatabase>::effective_quota(&own, &settings), 10);
        assert_eq!(AuthManager::<MockDatabase>::effective_quota(&inherit, &settings), 60);

        let negative_default = RateSettings {
            token_only: true,
            default_quota_per_minute: -3,
        };
        assert_eq!(
            AuthManager::<MockDatabase>::effective_quota(&inherit, &negative_default),
            0
        );
    }

    // Test 8: Stored settings override defaults, bad values degrade safely
    #[tokio::test]
    async fn test_rate_settings_parsing() {
        let mut mock_db = MockDatabase::new();
        expect_settings(&mut mock_db, Some("maybe"), Some("lots"));

        let manager = AuthManager::new(Arc::new(mock_db), defaults());
        let settings = manager.rate_settings().await;

        assert!(settings.token_only);
        assert_eq!(settings.default_quota_per_minute, 0);
    }

    // Test 9: Absent settings use configured defaults
    #[tokio::test]
    async fn test_rate_settings_defaults() {
        let mut mock_db = MockDatabase::new();
        expect_settings(&mut mock_db, None, None);

        let config = AuthConfig {
            token_only: false,
            default_quota_per_minute: 30,
        };
        let manager = AuthManager::new(Arc::new(mock_db), config);

        assert_eq!(
            manager.rate_settings().await,
            RateSettings {
                token_only: false,
                default_quota_per_minute: 30,
            }
        );
    }

    // Test 10: update_rate_settings writes both keys, normalizing quota
    #[tokio::test]
    async fn test_update_rate_settings() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_set_setting()
            .withf(|key, value| key == SETTING_TOKEN_ONLY && value == "false")
            .times(1)
            .returning(|_, _| Ok(()));
        mock_db
            .expect_set_setting()
            .withf(|key, value| key == SETTING_DEFAULT_QUOTA && value == "0")
            .times(1)
            .returning(|_, _| Ok(()));

        let manager = AuthManager::new(Arc::new(mock_db), defaults());
        let stored = manager
            .update_rate_settings(RateSettings {
                token_only: false,
                default_quota_per_minute: -10,
            })
            .await
            .unwrap();

        assert_eq!(stored.default_quota_per_minute, 0);
    }

    // Test 11: create_identity returns a one-time token
    #[tokio::test]
    async fn test_create_identity_success() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_create_identity()
            .withf(|new| new.name == "deploy" && new.quota_per_minute == 30)
            .returning(|_| Ok(12));
        mock_db
            .expect_get_identity()
            .withf(|id| *id == 12)
            .returning(|_| Ok(Some(Identity::new(12, "deploy", "AbCdEfGh", "h").with_quota(30))));

        let manager = AuthManager::new(Arc::new(mock_db), defaults());
        let created = manager
            .create_identity(CreateIdentityRequest::new("  deploy ").with_quota(30))
            .await
            .unwrap();

        assert_eq!(created.identity.id, 12);
        assert_eq!(created.token.len(), crate::auth::secret::SECRET_LENGTH);
    }

    // Test 12: create_identity rejects empty names
    #[tokio::test]
    async fn test_create_identity_empty_name() {
        let mut mock_db = MockDatabase::new();
        mock_db.expect_create_identity().never();

        let manager = AuthManager::new(Arc::new(mock_db), defaults());
        let result = manager.create_identity(CreateIdentityRequest::new("   ")).await;

        assert!(matches!(result, Err(IdentityError::EmptyName)));
    }

    // Test 13: create_identity maps duplicate names
    #[tokio::test]
    async fn test_create_identity_duplicate() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_create_identity()
            .returning(|_| Err(DbError::ConstraintViolation("UNIQUE".to_string())));

        let manager = AuthManager::new(Arc::new(mock_db), defaults());
        let result = manager.create_identity(CreateIdentityRequest::new("ci")).await;

        assert!(matches!(result, Err(IdentityError::DuplicateName(name)) if name == "ci"));
    }

    // Test 14: Mutations on unknown IDs report NotFound
    #[tokio::test]
    async fn test_lifecycle_not_found() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_set_identity_enabled()
            .returning(|_, _| Err(DbError::NotFound));
        mock_db
            .expect_update_identity_quota()
            .returning(|_, _| Err(DbError::NotFound));
        mock_db
            .expect_delete_identity()
            .returning(|_| Err(DbError::NotFound));
        mock_db
            .expect_rotate_identity_secret()
            .returning(|_, _, _| Err(DbError::NotFound));
        mock_db.expect_get_identity().returning(|_| Ok(None));

        let manager = AuthManager::new(Arc::new(mock_db), defaults());

        assert!(matches!(manager.set_enabled(99, false).await, Err(IdentityError::NotFound(99))));
        assert!(matches!(manager.update_quota(99, 5).await, Err(IdentityError::NotFound(99))));
        assert!(matches!(manager.delete_identity(99).await, Err(IdentityError::NotFound(99))));
        assert!(matches!(manager.rotate_identity(99).await, Err(IdentityError::NotFound(99))));
        assert!(matches!(manager.get_identity(99).await, Err(IdentityError::NotFound(99))));
    }

    // Test 15: delete_identity drops the limiter entry
    #[tokio::test]
    async fn test_delete_identity_removes_limiter() {
        let mut mock_db = MockDatabase::new();
        mock_db.expect_delete_identity().returning(|_| Ok(()));

        let manager = AuthManager::new(Arc::new(mock_db), defaults());
        manager.registry().allow(4, 10);
        assert_eq!(manager.registry().tracked_identities(), 1);

        manager.delete_identity(4).await.unwrap();
        assert_eq!(manager.registry().tracked_identities(), 0);
    }

    // Test 16: update_quota normalizes negatives
    #[tokio::test]
    async fn test_update_quota_normalizes() {
        let mut mock_db = MockDatabase::new();
        mock_db
            .expect_update_identity_quota()
            .withf(|id, quota| *id == 3 && *quota == 0)
            .times(1)
            .returning(|_, _| Ok(()));

        let manager = AuthManager::new(Arc::new(mock_db), defaults());
        assert!(manager.update_quota(3, -20).await.is_ok());
    }

    // Test 17: install skips the bootstrap identity when one exists
    #[tokio::test]
    async fn test_install_existing_identities() {
        let mut mock_db = MockDatabase::new();
        mock_db.expect_set_setting().times(2).returning(|_, _| Ok(()));
        mock_db.expect_count_identities().returning(|| Ok(3));
        mock_db.expect_create_identity().never();

        let manager = AuthManager::new(Arc::new(mock_db), defaults());
        let created = manager
            .install(
                RateSettings {
                    token_only: true,
                    default_quota_per_minute: 120,
                },
                CreateIdentityRequest::new("api-root").with_quota(120),
            )
            .await
            .unwrap();

        assert!(created.is_none());
    }

    // Test 18: parse_bool accepts common spellings
    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("yes please"), None);
    }
}
