use crate::{TokenRecord, TokenStoreError, UsageEntry};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tokens (
        token_id       TEXT PRIMARY KEY,
        created_at     TEXT NOT NULL,
        total_requests INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS usage_log (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        token_id  TEXT NOT NULL,
        endpoint  TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS usage_log_token ON usage_log (token_id);
";

/// SQLite-backed token store. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct TokenStore {
    conn: Connection,
}

impl TokenStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub async fn open(path: &Path) -> Result<Self, TokenStoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| TokenStoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let conn = Connection::open(path).await?;
        conn.call(|conn| {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
            Ok(())
        })
        .await?;

        let store = Self { conn };
        store.init_schema().await?;
        tracing::info!(path = %path.display(), "token store opened");
        Ok(store)
    }

    /// Private database that vanishes with the store.
    pub async fn open_in_memory() -> Result<Self, TokenStoreError> {
        let store = Self {
            conn: Connection::open_in_memory().await?,
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), TokenStoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Issue a new token with zero usage.
    pub async fn create(&self) -> Result<String, TokenStoreError> {
        let token_id = uuid::Uuid::new_v4().to_string();
        let created_at = timestamp(Utc::now());

        let id = token_id.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO tokens (token_id, created_at, total_requests) VALUES (?1, ?2, 0)",
                    params![id, created_at],
                )?;
                Ok(())
            })
            .await?;

        tracing::info!(token_id = %token_id, "token created");
        Ok(token_id)
    }

    pub async fn get(&self, token_id: &str) -> Result<Option<TokenRecord>, TokenStoreError> {
        let id = token_id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT token_id, created_at, total_requests FROM tokens WHERE token_id = ?1",
                        params![id],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, i64>(2)?,
                            ))
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        row.map(|(token_id, created_at, total)| {
            Ok(TokenRecord {
                token_id,
                created_at: parse_timestamp(created_at)?,
                total_requests: total.max(0) as u64,
            })
        })
        .transpose()
    }

    /// Remove a token. Returns `false` if it did not exist.
    ///
    /// Its usage log stays behind.
    pub async fn delete(&self, token_id: &str) -> Result<bool, TokenStoreError> {
        let id = token_id.to_string();
        let removed = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM tokens WHERE token_id = ?1", params![id])?))
            .await?;

        if removed > 0 {
            tracing::info!(token_id, "token deleted");
        }
        Ok(removed > 0)
    }

    pub async fn validate(&self, token_id: &str) -> Result<bool, TokenStoreError> {
        let id = token_id.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let found = conn
                    .query_row("SELECT 1 FROM tokens WHERE token_id = ?1", params![id], |_| Ok(()))
                    .optional()?;
                Ok(found.is_some())
            })
            .await?;
        Ok(exists)
    }

    /// Count one request against `token_id` and log it.
    ///
    /// The increment and the log entry commit together. A token deleted in
    /// the meantime is skipped silently; returns whether anything was recorded.
    pub async fn record_usage(&self, token_id: &str, endpoint: &str) -> Result<bool, TokenStoreError> {
        let id = token_id.to_string();
        let endpoint = endpoint.to_string();
        let at = timestamp(Utc::now());

        let recorded = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let updated = tx.execute(
                    "UPDATE tokens SET total_requests = total_requests + 1 WHERE token_id = ?1",
                    params![id],
                )?;
                if updated == 0 {
                    return Ok(false);
                }
                tx.execute(
                    "INSERT INTO usage_log (token_id, endpoint, timestamp) VALUES (?1, ?2, ?3)",
                    params![id, endpoint, at],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !recorded {
            tracing::debug!(token_id, "usage not recorded: token no longer exists");
        }
        Ok(recorded)
    }

    /// Usage log of `token_id`, newest first.
    pub async fn usage(&self, token_id: &str) -> Result<Vec<UsageEntry>, TokenStoreError> {
        let id = token_id.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT token_id, endpoint, timestamp FROM usage_log
                     WHERE token_id = ?1 ORDER BY id DESC",
                )?;
                let rows = stmt
                    .query_map(params![id], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(token_id, endpoint, ts)| {
                Ok(UsageEntry {
                    token_id,
                    endpoint,
                    timestamp: parse_timestamp(ts)?,
                })
            })
            .collect()
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, TokenStoreError> {
    match DateTime::parse_from_rfc3339(&value) {
        Ok(t) => Ok(t.with_timezone(&Utc)),
        Err(source) => Err(TokenStoreError::Timestamp { value, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get() {
        let store = TokenStore::open_in_memory().await.unwrap();
        let before = Utc::now() - chrono::Duration::seconds(1);
        let id = store.create().await.unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.token_id, id);
        assert_eq!(record.total_requests, 0);
        assert!(record.created_at >= before && record.created_at <= Utc::now());
    }

    #[tokio::test]
    async fn tokens_are_distinct() {
        let store = TokenStore::open_in_memory().await.unwrap();
        let a = store.create().await.unwrap();
        let b = store.create().await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn unknown_token() {
        let store = TokenStore::open_in_memory().await.unwrap();
        assert!(store.get("nope").await.unwrap().is_none());
        assert!(!store.validate("nope").await.unwrap());
        assert!(!store.delete("nope").await.unwrap());
    }

    #[tokio::test]
    async fn delete_invalidates() {
        let store = TokenStore::open_in_memory().await.unwrap();
        let id = store.create().await.unwrap();
        assert!(store.validate(&id).await.unwrap());
        assert!(store.delete(&id).await.unwrap());
        assert!(!store.validate(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn usage_counts_and_logs() {
        let store = TokenStore::open_in_memory().await.unwrap();
        let id = store.create().await.unwrap();

        assert!(store.record_usage(&id, "faceswap").await.unwrap());
        assert!(store.record_usage(&id, "faceswap").await.unwrap());

        assert_eq!(store.get(&id).await.unwrap().unwrap().total_requests, 2);
        let log = store.usage(&id).await.unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|e| e.endpoint == "faceswap" && e.token_id == id));
        assert!(log[0].timestamp >= log[1].timestamp);
    }

    #[tokio::test]
    async fn usage_on_deleted_token_is_a_no_op() {
        let store = TokenStore::open_in_memory().await.unwrap();
        let id = store.create().await.unwrap();
        store.delete(&id).await.unwrap();

        assert!(!store.record_usage(&id, "faceswap").await.unwrap());
        assert!(store.get(&id).await.unwrap().is_none());
        assert!(store.usage(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_usage_is_not_lost() {
        let store = TokenStore::open_in_memory().await.unwrap();
        let id = store.create().await.unwrap();

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move { store.record_usage(&id, "faceswap").await })
            })
            .collect();
        for t in tasks {
            assert!(t.await.unwrap().unwrap());
        }

        assert_eq!(store.get(&id).await.unwrap().unwrap().total_requests, 20);
        assert_eq!(store.usage(&id).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tokens.db");

        let id = {
            let store = TokenStore::open(&path).await.unwrap();
            let id = store.create().await.unwrap();
            store.record_usage(&id, "faceswap").await.unwrap();
            id
        };

        let store = TokenStore::open(&path).await.unwrap();
        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.total_requests, 1);
    }
}
