//! Persistence collaborator for cached agent results.
//!
//! The executor only needs key/value get-and-put with an optional expiry,
//! expressed by the [`CacheStore`] trait. Two implementations ship here:
//! - [`MemoryStore`] — process-local, for tests and one-shot runs
//! - [`Storage`] — a libSQL database file that survives restarts
//!
//! Stores never filter by expiry themselves; liveness is decided (and
//! expired keys evicted) by the reader.

mod memory;
mod migrations;

use std::path::Path;

use async_trait::async_trait;
use augur_shared::{AugurError, Result};
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};

pub use memory::MemoryStore;

/// Key/value persistence with optional expiry.
///
/// A successful `put` must be visible to a later `get`; nothing stronger is assumed.
/// Writes to one key are last-writer-wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the raw value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> Result<()>;

    /// Remove `key` if present.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every entry, returning how many were removed.
    async fn clear(&self) -> Result<u64>;
}

/// libSQL-backed [`CacheStore`].
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AugurError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(AugurError::storage)?;

        let conn = db.connect().map_err(AugurError::storage)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (for inspection tools).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(AugurError::storage)?;

        let conn = db.connect().map_err(AugurError::storage)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        AugurError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(AugurError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    /// Number of stored entries, live or not.
    pub async fn count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM agent_cache", params![])
            .await
            .map_err(AugurError::storage)?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map(|n| n.max(0) as u64)
                .map_err(AugurError::storage),
            Ok(None) => Ok(0),
            Err(e) => Err(AugurError::storage(e)),
        }
    }

    /// Expiry recorded for `key`, if the key exists and has one.
    pub async fn expires_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT expires_at FROM agent_cache WHERE key = ?1",
                params![key],
            )
            .await
            .map_err(AugurError::storage)?;

        match rows.next().await {
            Ok(Some(row)) => match row.get::<String>(0).ok() {
                Some(s) => DateTime::parse_from_rfc3339(&s)
                    .map(|dt| Some(dt.with_timezone(&Utc)))
                    .map_err(|e| AugurError::Storage(format!("invalid date: {e}"))),
                None => Ok(None),
            },
            Ok(None) => Ok(None),
            Err(e) => Err(AugurError::storage(e)),
        }
    }
}

#[async_trait]
impl CacheStore for Storage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT value_json FROM agent_cache WHERE key = ?1",
                params![key],
            )
            .await
            .map_err(AugurError::storage)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value: String = row.get(0).map_err(AugurError::storage)?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(AugurError::storage(e)),
        }
    }

    async fn put(&self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let expires = expires_at.map(|at| at.to_rfc3339());
        self.conn
            .execute(
                "INSERT INTO agent_cache (key, value_json, expires_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                   value_json = excluded.value_json,
                   expires_at = excluded.expires_at,
                   updated_at = excluded.updated_at",
                params![key, value, expires, now.as_str()],
            )
            .await
            .map_err(AugurError::storage)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM agent_cache WHERE key = ?1", params![key])
            .await
            .map_err(AugurError::storage)?;
        Ok(())
    }

    async fn clear(&self) -> Result<u64> {
        self.check_writable()?;
        let removed = self
            .conn
            .execute("DELETE FROM agent_cache", params![])
            .await
            .map_err(AugurError::storage)?;
        tracing::info!(removed, "cleared agent cache");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("augur_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("augur_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn get_put_delete() {
        let storage = test_storage().await;

        // Miss
        assert!(storage.get("fp1").await.expect("get miss").is_none());

        // Put then hit
        storage
            .put("fp1", r#"{"seed": "one"}"#, None)
            .await
            .expect("put");
        let hit = storage.get("fp1").await.expect("get hit");
        assert_eq!(hit.as_deref(), Some(r#"{"seed": "one"}"#));

        // Last writer wins
        storage
            .put("fp1", r#"{"seed": "two"}"#, None)
            .await
            .expect("overwrite");
        let hit = storage.get("fp1").await.unwrap().unwrap();
        assert!(hit.contains("two"));
        assert_eq!(storage.count().await.unwrap(), 1);

        storage.delete("fp1").await.expect("delete");
        assert!(storage.get("fp1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expiry_is_recorded_not_enforced() {
        let storage = test_storage().await;
        let past = Utc::now() - chrono::Duration::hours(1);
        storage.put("old", "{}", Some(past)).await.unwrap();

        // The store keeps expired rows; readers decide liveness.
        assert!(storage.get("old").await.unwrap().is_some());
        let recorded = storage.expires_at("old").await.unwrap().expect("expiry");
        assert_eq!(recorded.timestamp(), past.timestamp());

        storage.put("forever", "{}", None).await.unwrap();
        assert!(storage.expires_at("forever").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let storage = test_storage().await;
        for key in ["a", "b", "c"] {
            storage.put(key, "{}", None).await.unwrap();
        }
        assert_eq!(storage.clear().await.expect("clear"), 3);
        assert_eq!(storage.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("augur_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.put("k", "{}", None).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert!(ro.get("k").await.unwrap().is_some());
        let result = ro.put("k2", "{}", None).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
