//! Token verification against the identity store

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use chrono::Utc;

use crate::database::Database;
use crate::error::AuthError;
use crate::models::Identity;
use crate::otel::AuthMetrics;

use super::secret::{hash_secret, secret_prefix, verify_secret};

/// Resolves a presented token to an enabled identity
///
/// Lookups go through the stored 8-character prefix; the full secret is
/// checked against the Argon2 hash on the blocking pool.
pub struct TokenVerifier<D: Database> {
    db: Arc<D>,
    metrics: AuthMetrics,
}

impl<D: Database + 'static> TokenVerifier<D> {
    /// Create a verifier reporting to the global meter
    pub fn new(db: Arc<D>) -> Self {
        Self::with_metrics(db, AuthMetrics::global())
    }

    /// Create a verifier with explicit metrics
    pub fn with_metrics(db: Arc<D>, metrics: AuthMetrics) -> Self {
        Self { db, metrics }
    }

    /// Verify a presented token
    ///
    /// On success a last-used update is scheduled in the background and the
    /// identity is returned without waiting for it.
    pub async fn verify(&self, presented: &str) -> Result<Identity, AuthError> {
        let started = Instant::now();
        let candidate = presented.trim();
        let prefix = secret_prefix(candidate).ok_or(AuthError::MalformedToken)?;

        let found = match self.db.find_enabled_by_prefix(prefix).await {
            Ok(Some(identity)) if identity.enabled => Some(identity),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Identity lookup failed");
                return Err(AuthError::StoreUnavailable);
            }
        };

        // A prefix miss still pays for one Argon2 verification
        let hash = match &found {
            Some(identity) => identity.secret_hash.clone(),
            None => decoy_hash().to_string(),
        };
        let candidate = candidate.to_string();
        let matched = match tokio::task::spawn_blocking(move || verify_secret(&hash, &candidate))
            .await
        {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!(error = %e, "Secret verification task failed");
                false
            }
        };
        self.metrics
            .record_verify_duration(started.elapsed().as_secs_f64());

        let Some(identity) = found else {
            return Err(AuthError::UnknownOrDisabledIdentity);
        };
        if !matched {
            return Err(AuthError::SecretMismatch);
        }

        self.touch_last_used(identity.id);
        Ok(identity)
    }

    fn touch_last_used(&self, identity_id: i64) {
        let db = Arc::clone(&self.db);
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = db.touch_identity_last_used(identity_id, Utc::now()).await {
                tracing::warn!(error = %e, identity_id, "Failed to update last used timestamp");
                metrics.record_last_used_failure();
            }
        });
    }
}

/// Hash verified in place of a stored one when no identity owns the prefix
///
/// Computed once per process. If hashing fails the empty string is used, which
/// `verify_secret` rejects without hashing.
fn decoy_hash() -> &'static str {
    static DECOY: OnceLock<String> = OnceLock::new();
    DECOY.get_or_init(|| hash_secret("api-guard-prefix-miss").unwrap_or_default())
}
