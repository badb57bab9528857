//! # Token Cache Repository
//!
//! Singleton row holding the hub's cloud tokens and the cached signing
//! public key. The `CHECK (id = 1)` constraint in the schema keeps this a
//! one-row table; every write is an upsert against id 1.
//!
//! The public key column is the durable tier of the key cache: it survives
//! restarts and disk-file cleanup, so a hub that boots offline can still
//! verify command signatures.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use beacon_core::TokenCacheRecord;

/// Repository for the token/public-key singleton row.
#[derive(Debug, Clone)]
pub struct TokenCacheRepository {
    pool: SqlitePool,
}

impl TokenCacheRepository {
    /// Creates a new TokenCacheRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TokenCacheRepository { pool }
    }

    /// Fetches the cache row, or a default (empty) record if never written.
    pub async fn get(&self) -> DbResult<TokenCacheRecord> {
        let record = sqlx::query_as::<_, TokenCacheRecord>(
            r#"
            SELECT id, access_token, refresh_token, token_cached_at,
                   public_key_pem, key_cached_at
            FROM token_cache
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.unwrap_or_default())
    }

    /// Stores the cloud signing public key (PEM) with a fresh timestamp.
    pub async fn save_public_key(&self, pem: &str) -> DbResult<()> {
        let now = Utc::now();
        debug!("Persisting public key to database cache");

        sqlx::query(
            r#"
            INSERT INTO token_cache (id, public_key_pem, key_cached_at)
            VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                public_key_pem = excluded.public_key_pem,
                key_cached_at = excluded.key_cached_at
            "#,
        )
        .bind(pem)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Stores access/refresh tokens with a fresh timestamp.
    pub async fn save_tokens(&self, access_token: &str, refresh_token: Option<&str>) -> DbResult<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO token_cache (id, access_token, refresh_token, token_cached_at)
            VALUES (1, ?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                token_cached_at = excluded.token_cached_at
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Clears stored tokens (e.g., after the cloud rejects them).
    /// The cached public key is left in place.
    pub async fn clear_tokens(&self) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE token_cache
            SET access_token = NULL, refresh_token = NULL, token_cached_at = NULL
            WHERE id = 1
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
