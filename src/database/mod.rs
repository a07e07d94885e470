//! Database layer for api-guard
//!
//! This module defines the identity store trait and its SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::models::{Identity, NewIdentity};

/// Database trait for identity and settings persistence
///
/// It uses `async_trait` for async methods and `mockall::automock` for testing.
/// Deleted identities are invisible to every method.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    // =========================================================================
    // Identity operations
    // =========================================================================

    /// Insert a new identity
    ///
    /// Returns the assigned ID. Fails with `ConstraintViolation` if a live
    /// identity already uses the name.
    async fn create_identity(&self, identity: &NewIdentity) -> Result<i64, DbError>;

    /// Get a live identity by ID
    async fn get_identity(&self, id: i64) -> Result<Option<Identity>, DbError>;

    /// Find the enabled, live identity owning a secret prefix
    async fn find_enabled_by_prefix(&self, prefix: &str) -> Result<Option<Identity>, DbError>;

    /// List live identities ordered by ID
    async fn list_identities(&self) -> Result<Vec<Identity>, DbError>;

    /// Set the enabled flag
    async fn set_identity_enabled(&self, id: i64, enabled: bool) -> Result<(), DbError>;

    /// Set the per-minute quota
    async fn update_identity_quota(&self, id: i64, quota_per_minute: i64) -> Result<(), DbError>;

    /// Replace the secret prefix and hash in one statement
    async fn rotate_identity_secret(
        &self,
        id: i64,
        secret_prefix: &str,
        secret_hash: &str,
    ) -> Result<(), DbError>;

    /// Soft-delete an identity
    async fn delete_identity(&self, id: i64) -> Result<(), DbError>;

    /// Record a successful authentication
    async fn touch_identity_last_used(&self, id: i64, at: DateTime<Utc>) -> Result<(), DbError>;

    /// Count live identities
    async fn count_identities(&self) -> Result<u64, DbError>;

    // =========================================================================
    // Settings operations
    // =========================================================================

    /// Read a raw setting value
    async fn get_setting(&self, key: &str) -> Result<Option<String>, DbError>;

    /// Write a raw setting value
    async fn set_setting(&self, key: &str, value: &str) -> Result<(), DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: MockDatabase prefix lookup
    #[tokio::test]
    async fn test_mock_database_find_by_prefix() {
        let mut mock = MockDatabase::new();

        mock.expect_find_enabled_by_prefix()
            .withf(|prefix| prefix == "AbCdEfGh")
            .returning(|_| Ok(Some(Identity::new(1, "ci", "AbCdEfGh", "hash"))));

        let result = mock.find_enabled_by_prefix("AbCdEfGh").await.unwrap();
        assert_eq!(result.unwrap().name, "ci");
    }

    // Test 2: MockDatabase identity lifecycle operations
    #[tokio::test]
    async fn test_mock_database_identity_operations() {
        let mut mock = MockDatabase::new();

        mock.expect_create_identity().returning(|_| Ok(1));
        mock.expect_list_identities()
            .returning(|| Ok(vec![Identity::new(1, "ci", "AbCdEfGh", "hash")]));
        mock.expect_set_identity_enabled()
            .withf(|id, enabled| *id == 1 && !*enabled)
            .returning(|_, _| Ok(()));
        mock.expect_delete_identity()
            .withf(|id| *id == 1)
            .returning(|_| Ok(()));
        mock.expect_count_identities().returning(|| Ok(1));

        let new = NewIdentity {
            name: "ci".to_string(),
            secret_prefix: "AbCdEfGh".to_string(),
            secret_hash: "hash".to_string(),
            quota_per_minute: 0,
        };
        assert_eq!(mock.create_identity(&new).await.unwrap(), 1);
        assert_eq!(mock.list_identities().await.unwrap().len(), 1);
        assert!(mock.set_identity_enabled(1, false).await.is_ok());
        assert!(mock.delete_identity(1).await.is_ok());
        assert_eq!(mock.count_identities().await.unwrap(), 1);
    }

    // Test 3: MockDatabase error handling
    #[tokio::test]
    async fn test_mock_database_error_handling() {
        let mut mock = MockDatabase::new();

        mock.expect_update_identity_quota()
            .returning(|_, _| Err(DbError::NotFound));

        match mock.update_identity_quota(42, 10).await {
            Err(DbError::NotFound) => (),
            _ => panic!("Expected DbError::NotFound"),
        }
    }
}
