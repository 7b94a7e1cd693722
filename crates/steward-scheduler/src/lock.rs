//! Time-bounded mutual exclusion backed by the `locks` table.
//!
//! One row per key. Acquisition first sweeps expired rows for the key, then
//! attempts a single insert against the primary key; whoever inserts owns the
//! lock until release or TTL expiry. There is no renewal: a crashed holder
//! blocks the key until its TTL runs out.

use chrono::{DateTime, Utc};
use rusqlite::{ErrorCode, params};
use std::time::Duration;

use steward_core::Result;
use steward_core::db::{Database, fmt_ts};

/// Acquires and releases named locks.
#[derive(Clone)]
pub struct LockManager {
    db: Database,
}

impl LockManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Try to take `key` for `ttl`. Returns `Ok(false)` when an unexpired row exists.
    pub fn acquire(&self, key: &str, ttl: Duration, owner: &str) -> Result<bool> {
        self.acquire_at(key, ttl, owner, Utc::now())
    }

    /// Same as [`LockManager::acquire`] with an explicit clock.
    pub fn acquire_at(
        &self,
        key: &str,
        ttl: Duration,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let now_str = fmt_ts(now);

        let acquired = self.db.with_conn(|conn| {
            let swept = conn.execute(
                "DELETE FROM locks WHERE key = ?1 AND expires_at <= ?2",
                params![key, now_str],
            )?;
            if swept > 0 {
                tracing::warn!("🔓 Reclaimed expired lock '{}'", key);
            }

            match conn.execute(
                "INSERT INTO locks (key, acquired_at, expires_at, owner) VALUES (?1, ?2, ?3, ?4)",
                params![key, now_str, fmt_ts(expires_at), owner],
            ) {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        })?;

        if acquired {
            tracing::debug!("🔒 Lock '{}' acquired by {}", key, owner);
        } else {
            tracing::debug!("⏳ Lock '{}' is held, {} backs off", key, owner);
        }
        Ok(acquired)
    }

    /// Delete the lock row unconditionally.
    pub fn release(&self, key: &str) -> Result<()> {
        self.db
            .with_conn(|conn| conn.execute("DELETE FROM locks WHERE key = ?1", [key]))?;
        tracing::debug!("🔓 Lock '{}' released", key);
        Ok(())
    }

    /// Current owner of an unexpired lock, if any.
    pub fn holder(&self, key: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT owner FROM locks WHERE key = ?1 AND expires_at > ?2")?;
            let mut rows = stmt.query(params![key, fmt_ts(now)])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
    }

    /// Scoped acquisition: the returned guard releases the lock when dropped,
    /// on every exit path of the protected work.
    pub fn try_lock(
        &self,
        key: &str,
        ttl: Duration,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<LockGuard>> {
        if self.acquire_at(key, ttl, owner, now)? {
            Ok(Some(LockGuard {
                manager: self.clone(),
                key: key.to_string(),
            }))
        } else {
            Ok(None)
        }
    }
}

/// Releases its lock on drop.
pub struct LockGuard {
    manager: LockManager,
    key: String,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.manager.release(&self.key) {
            tracing::warn!("⚠️ Failed to release lock '{}': {e} (expires by TTL)", self.key);
        }
    }
}

/// Owner identifier for this process: `hostname:pid:nonce`.
pub fn owner_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "steward".into());
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}:{}:{}", std::process::id(), &nonce[..8])
}
