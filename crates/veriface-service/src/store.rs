//! Gallery store: identity key → enrollment record.
//!
//! Two interchangeable backings sit behind one handle. The durable backing
//! is a hash in a Redis-compatible store, keyed by a fixed gallery name with
//! JSON byte-string values; single-field upsert/delete primitives give
//! per-identity atomicity, so concurrent enrollments of different identities
//! never conflict and same-identity races resolve last-write-wins. When the
//! durable backend is unreachable at startup or fails on first use, the
//! store permanently switches to an in-process map for the remainder of the
//! process lifetime — logged once as a degraded-mode warning, never surfaced
//! to callers, never retried per request.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use veriface_core::Embedding;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("gallery backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("enrollment record could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("enrollment record for '{identity}' is corrupt: {source}")]
    Corrupt {
        identity: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One enrolled identity. Owned exclusively by the gallery store; at most
/// one record exists per identity key (re-enrolling overwrites).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub identity: String,
    pub embedding: Embedding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    pub enrolled_at: DateTime<Utc>,
}

/// Process-wide gallery handle. Callers never branch on which backing is
/// active.
pub struct GalleryStore {
    /// Durable backend connection; `None` once degraded (or when the store
    /// was deliberately created in-memory).
    durable: RwLock<Option<ConnectionManager>>,
    /// In-process fallback. `BTreeMap` keeps listing in identity-key order
    /// so ranking tie-breaks stay deterministic; the lock serializes
    /// mutation while allowing concurrent reads.
    memory: RwLock<BTreeMap<String, EnrollmentRecord>>,
    hash_key: String,
    degraded: AtomicBool,
}

impl GalleryStore {
    /// Connect to the durable backend, falling back to in-process storage
    /// when it is unreachable. Never fails: a missing backend degrades, it
    /// does not abort startup.
    pub async fn connect(url: &str, hash_key: &str, connect_timeout: Duration) -> Self {
        match Self::open_durable(url, connect_timeout).await {
            Ok(conn) => {
                tracing::info!(key = hash_key, "gallery store connected to durable backend");
                Self {
                    durable: RwLock::new(Some(conn)),
                    memory: RwLock::new(BTreeMap::new()),
                    hash_key: hash_key.to_string(),
                    degraded: AtomicBool::new(false),
                }
            }
            Err(error) => {
                tracing::warn!(
                    %error,
                    "durable gallery backend unreachable — continuing with in-process storage"
                );
                let store = Self::in_memory(hash_key);
                store.degraded.store(true, Ordering::Relaxed);
                store
            }
        }
    }

    /// Purely in-process store (tests, single-shot tooling).
    pub fn in_memory(hash_key: &str) -> Self {
        Self {
            durable: RwLock::new(None),
            memory: RwLock::new(BTreeMap::new()),
            hash_key: hash_key.to_string(),
            degraded: AtomicBool::new(false),
        }
    }

    async fn open_durable(
        url: &str,
        connect_timeout: Duration,
    ) -> Result<ConnectionManager, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let mut conn = tokio::time::timeout(connect_timeout, client.get_connection_manager())
            .await
            .map_err(|_| {
                redis::RedisError::from((redis::ErrorKind::IoError, "connection timed out"))
            })??;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(conn)
    }

    /// Upsert a record under its identity key. Last write wins.
    pub async fn save(&self, record: &EnrollmentRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record).map_err(StoreError::Encode)?;

        if let Some(mut conn) = self.durable_conn().await {
            let result: Result<(), redis::RedisError> = conn
                .hset(&self.hash_key, &record.identity, bytes.as_slice())
                .await;
            match result {
                Ok(()) => return Ok(()),
                Err(error) if is_connection_error(&error) => self.degrade(&error).await,
                Err(error) => return Err(error.into()),
            }
        }

        let mut gallery = self.memory.write().await;
        gallery.insert(record.identity.clone(), record.clone());
        Ok(())
    }

    /// Load one record; `None` when the identity is not enrolled.
    pub async fn load(&self, identity: &str) -> Result<Option<EnrollmentRecord>, StoreError> {
        if let Some(mut conn) = self.durable_conn().await {
            let result: Result<Option<Vec<u8>>, redis::RedisError> =
                conn.hget(&self.hash_key, identity).await;
            match result {
                Ok(Some(bytes)) => return decode_record(identity, &bytes).map(Some),
                Ok(None) => return Ok(None),
                Err(error) if is_connection_error(&error) => self.degrade(&error).await,
                Err(error) => return Err(error.into()),
            }
        }

        Ok(self.memory.read().await.get(identity).cloned())
    }

    /// Snapshot of the whole gallery in identity-key order. Not
    /// transactionally consistent with concurrent writes.
    pub async fn list_all(&self) -> Result<Vec<EnrollmentRecord>, StoreError> {
        if let Some(mut conn) = self.durable_conn().await {
            let result: Result<HashMap<String, Vec<u8>>, redis::RedisError> =
                conn.hgetall(&self.hash_key).await;
            match result {
                Ok(entries) => {
                    let mut records = Vec::with_capacity(entries.len());
                    for (identity, bytes) in &entries {
                        records.push(decode_record(identity, bytes)?);
                    }
                    records.sort_by(|a, b| a.identity.cmp(&b.identity));
                    return Ok(records);
                }
                Err(error) if is_connection_error(&error) => self.degrade(&error).await,
                Err(error) => return Err(error.into()),
            }
        }

        Ok(self.memory.read().await.values().cloned().collect())
    }

    /// Remove one record. `false` when the identity was not enrolled.
    pub async fn delete(&self, identity: &str) -> Result<bool, StoreError> {
        if let Some(mut conn) = self.durable_conn().await {
            let result: Result<i64, redis::RedisError> =
                conn.hdel(&self.hash_key, identity).await;
            match result {
                Ok(removed) => return Ok(removed > 0),
                Err(error) if is_connection_error(&error) => self.degrade(&error).await,
                Err(error) => return Err(error.into()),
            }
        }

        Ok(self.memory.write().await.remove(identity).is_some())
    }

    /// Number of enrolled identities.
    pub async fn count(&self) -> Result<u64, StoreError> {
        if let Some(mut conn) = self.durable_conn().await {
            let result: Result<u64, redis::RedisError> = conn.hlen(&self.hash_key).await;
            match result {
                Ok(count) => return Ok(count),
                Err(error) if is_connection_error(&error) => self.degrade(&error).await,
                Err(error) => return Err(error.into()),
            }
        }

        Ok(self.memory.read().await.len() as u64)
    }

    /// Which backing is currently active.
    pub async fn backend_kind(&self) -> &'static str {
        if self.durable.read().await.is_some() {
            "redis"
        } else {
            "memory"
        }
    }

    /// Whether the store fell back from the durable backend.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    async fn durable_conn(&self) -> Option<ConnectionManager> {
        self.durable.read().await.clone()
    }

    /// Drop the durable connection for good. Logs exactly once; later
    /// callers find the connection already gone.
    async fn degrade(&self, error: &redis::RedisError) {
        let mut durable = self.durable.write().await;
        if durable.take().is_some() {
            self.degraded.store(true, Ordering::Relaxed);
            tracing::warn!(
                %error,
                "durable gallery backend failed — switching to in-process storage for the rest of the process"
            );
        }
    }
}

fn decode_record(identity: &str, bytes: &[u8]) -> Result<EnrollmentRecord, StoreError> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Corrupt {
        identity: identity.to_string(),
        source,
    })
}

fn is_connection_error(error: &redis::RedisError) -> bool {
    error.is_io_error()
        || error.is_timeout()
        || error.is_connection_refusal()
        || error.is_connection_dropped()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
