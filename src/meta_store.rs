//! Postgres-backed metadata: the repository registry and per-repo
//! reference rows.
//!
//! Two tables. `repositories` is keyed by name; `refs` is keyed by
//! `(repo_name, ref_name)` and cascades on repository delete and
//! rename. Reference updates from the push path go through
//! compare-and-swap so racing pushes lose cleanly instead of
//! last-writer-wins.

use crate::config::MetaStoreConfig;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum MetaStoreError {
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("reference changed concurrently")]
    RefConflict,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type MetaResult<T> = Result<T, MetaStoreError>;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Repository {
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// The persisted shape of one reference. For `kind = "hash"` the
/// `hash` column is set; for `kind = "symbolic"` the `target` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefValue {
    pub kind: String,
    pub hash: Option<String>,
    pub target: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefRow {
    pub ref_name: String,
    pub kind: String,
    pub hash: Option<String>,
    pub target: Option<String>,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS repositories (
        name TEXT PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS refs (
        repo_name TEXT NOT NULL REFERENCES repositories (name)
            ON DELETE CASCADE ON UPDATE CASCADE,
        ref_name TEXT NOT NULL,
        kind TEXT NOT NULL,
        hash TEXT,
        target TEXT,
        PRIMARY KEY (repo_name, ref_name)
    )",
];

#[derive(Clone)]
pub struct MetaStore {
    pool: PgPool,
}

impl MetaStore {
    /// Open the pool and verify connectivity.
    pub async fn connect(config: &MetaStoreConfig) -> MetaResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(&config.dsn())
            .await?;
        let store = Self { pool };
        store.ping().await?;
        Ok(store)
    }

    pub async fn ping(&self) -> MetaResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Bring the schema up; statements are idempotent.
    pub async fn migrate(&self) -> MetaResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // Repositories

    pub async fn create_repository(&self, name: &str) -> MetaResult<Repository> {
        sqlx::query_as::<_, Repository>(
            "INSERT INTO repositories (name) VALUES ($1)
             RETURNING name, created_at, updated_at",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => MetaStoreError::AlreadyExists,
            _ => err.into(),
        })
    }

    pub async fn list_repositories(&self) -> MetaResult<Vec<Repository>> {
        Ok(sqlx::query_as::<_, Repository>(
            "SELECT name, created_at, updated_at FROM repositories ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn get_repository(&self, name: &str) -> MetaResult<Repository> {
        sqlx::query_as::<_, Repository>(
            "SELECT name, created_at, updated_at FROM repositories WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(MetaStoreError::NotFound)
    }

    /// Rename; the refs rows follow via the FK cascade.
    pub async fn rename_repository(&self, old: &str, new: &str) -> MetaResult<Repository> {
        sqlx::query_as::<_, Repository>(
            "UPDATE repositories SET name = $2, updated_at = now() WHERE name = $1
             RETURNING name, created_at, updated_at",
        )
        .bind(old)
        .bind(new)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => MetaStoreError::AlreadyExists,
            _ => err.into(),
        })?
        .ok_or(MetaStoreError::NotFound)
    }

    pub async fn delete_repository(&self, name: &str) -> MetaResult<()> {
        let result = sqlx::query("DELETE FROM repositories WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetaStoreError::NotFound);
        }
        Ok(())
    }

    // References

    pub async fn get_ref(&self, repo: &str, name: &str) -> MetaResult<RefRow> {
        sqlx::query_as::<_, RefRow>(
            "SELECT ref_name, kind, hash, target FROM refs
             WHERE repo_name = $1 AND ref_name = $2",
        )
        .bind(repo)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(MetaStoreError::NotFound)
    }

    pub async fn list_refs(&self, repo: &str) -> MetaResult<Vec<RefRow>> {
        Ok(sqlx::query_as::<_, RefRow>(
            "SELECT ref_name, kind, hash, target FROM refs
             WHERE repo_name = $1 ORDER BY ref_name",
        )
        .bind(repo)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Unconditional upsert.
    pub async fn put_ref(&self, repo: &str, name: &str, value: &RefValue) -> MetaResult<()> {
        sqlx::query(
            "INSERT INTO refs (repo_name, ref_name, kind, hash, target)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (repo_name, ref_name)
             DO UPDATE SET kind = EXCLUDED.kind, hash = EXCLUDED.hash, target = EXCLUDED.target",
        )
        .bind(repo)
        .bind(name)
        .bind(&value.kind)
        .bind(&value.hash)
        .bind(&value.target)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_ref(&self, repo: &str, name: &str) -> MetaResult<()> {
        sqlx::query("DELETE FROM refs WHERE repo_name = $1 AND ref_name = $2")
            .bind(repo)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Conditional write: `old` of `None` requires the row to be
    /// absent, `new` of `None` deletes it. Zero affected rows means
    /// the stored value was not what the caller saw.
    pub async fn cas_ref(
        &self,
        repo: &str,
        name: &str,
        old: Option<&RefValue>,
        new: Option<&RefValue>,
    ) -> MetaResult<()> {
        let rows = match (old, new) {
            (None, None) => return Ok(()),
            (None, Some(new)) => {
                sqlx::query(
                    "INSERT INTO refs (repo_name, ref_name, kind, hash, target)
                     VALUES ($1, $2, $3, $4, $5)
                     ON CONFLICT (repo_name, ref_name) DO NOTHING",
                )
                .bind(repo)
                .bind(name)
                .bind(&new.kind)
                .bind(&new.hash)
                .bind(&new.target)
                .execute(&self.pool)
                .await?
                .rows_affected()
            }
            (Some(old), Some(new)) => {
                sqlx::query(
                    "UPDATE refs SET kind = $3, hash = $4, target = $5
                     WHERE repo_name = $1 AND ref_name = $2
                       AND kind = $6
                       AND hash IS NOT DISTINCT FROM $7
                       AND target IS NOT DISTINCT FROM $8",
                )
                .bind(repo)
                .bind(name)
                .bind(&new.kind)
                .bind(&new.hash)
                .bind(&new.target)
                .bind(&old.kind)
                .bind(&old.hash)
                .bind(&old.target)
                .execute(&self.pool)
                .await?
                .rows_affected()
            }
            (Some(old), None) => {
                sqlx::query(
                    "DELETE FROM refs
                     WHERE repo_name = $1 AND ref_name = $2
                       AND kind = $3
                       AND hash IS NOT DISTINCT FROM $4
                       AND target IS NOT DISTINCT FROM $5",
                )
                .bind(repo)
                .bind(name)
                .bind(&old.kind)
                .bind(&old.hash)
                .bind(&old.target)
                .execute(&self.pool)
                .await?
                .rows_affected()
            }
        };
        if rows == 0 {
            return Err(MetaStoreError::RefConflict);
        }
        Ok(())
    }
}
