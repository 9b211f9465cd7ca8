//! Versioned, persistent key/value knowledge store.
//!
//! All cross-component state (patterns, statistics, error history, health
//! summaries) lives here as named JSON entries.
//!
//! # Concurrency
//!
//! Every key owns its own async mutex. [`KnowledgeStore::update`] holds
//! that mutex for the whole read-modify-write, so concurrent updates of the
//! same key serialize and never lose a write, while updates of different
//! keys proceed independently. The outer map lock is only held long enough
//! to find or create a key's slot.
//!
//! ```text
//! ┌──────────────┐  update(key, fn)  ┌────────────────────────┐
//! │  component   │──────────────────▶│ RwLock<HashMap<key, ─┐ │
//! └──────────────┘                   │   Arc<Mutex<Value>>> │ │
//!                                    └──────────────────────┼─┘
//!                                          per-key lock ◀───┘
//! ```
//!
//! [`KnowledgeStore::transact`] locks several keys, always in sorted order,
//! and writes all of them back or none.
//!
//! # Persistence
//!
//! [`KnowledgeStore::snapshot`] captures the whole mapping as a
//! [`KnowledgeSnapshot`], which [`persist`] writes to a
//! [`crate::traits::SnapshotStore`] on a timer and [`persist::rehydrate`]
//! loads on startup.

mod entries;
pub mod persist;
mod ring;
mod sqlite;

pub use entries::*;
pub use ring::BoundedRing;
pub use sqlite::SqliteSnapshotStore;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::error::StoreError;

/// Layout version of [`KnowledgeSnapshot`].
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

type Slot = Arc<Mutex<Option<Value>>>;

/// The full store contents at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnapshot {
    /// Layout version.
    pub schema_version: u32,
    /// Store revision when the snapshot was taken.
    pub revision: u64,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Every entry by key.
    pub entries: BTreeMap<String, Value>,
}

impl KnowledgeSnapshot {
    /// Decode a typed entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the entry has the wrong shape.
    pub fn entry<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        self.entries
            .get(key)
            .map(|value| decode(key, value.clone()))
            .transpose()
    }
}

/// In-memory knowledge store with per-key serialization.
#[derive(Debug, Default)]
pub struct KnowledgeStore {
    slots: RwLock<HashMap<String, Slot>>,
    revision: AtomicU64,
    last_durable: std::sync::Mutex<Option<DateTime<Utc>>>,
}

impl KnowledgeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Revision counter, bumped by every write.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    async fn slot(&self, key: &str) -> Slot {
        if let Some(slot) = self.slots.read().await.get(key) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    async fn existing_slot(&self, key: &str) -> Option<Slot> {
        self.slots.read().await.get(key).map(Arc::clone)
    }

    /// Read an entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no value is stored under `key`.
    pub async fn get(&self, key: &str) -> Result<Value, StoreError> {
        let not_found = || StoreError::NotFound {
            key: key.to_string(),
        };
        let slot = self.existing_slot(key).await.ok_or_else(not_found)?;
        let value = slot.lock().await.clone();
        value.ok_or_else(not_found)
    }

    /// Read and decode an entry, returning `None` if it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the entry has the wrong shape.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await {
            Ok(value) => decode(key, value).map(Some),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read and decode an entry, falling back to its default when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the entry has the wrong shape.
    pub async fn get_or_default<T: DeserializeOwned + Default>(
        &self,
        key: &str,
    ) -> Result<T, StoreError> {
        Ok(self.get_as(key).await?.unwrap_or_default())
    }

    /// Replace an entry.
    pub async fn put(&self, key: &str, value: Value) {
        let slot = self.slot(key).await;
        let mut guard = slot.lock().await;
        *guard = Some(value);
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    /// Encode and replace an entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the value cannot be encoded.
    pub async fn put_as<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let encoded = encode(key, value)?;
        self.put(key, encoded).await;
        Ok(())
    }

    /// Atomically read-modify-write a raw entry.
    ///
    /// `f` sees `None` when the key is absent. Concurrent updates of the same
    /// key run one at a time.
    pub async fn update<F, R>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(&mut Option<Value>) -> R + Send,
    {
        let slot = self.slot(key).await;
        let mut guard = slot.lock().await;
        let result = f(&mut *guard);
        self.revision.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// Atomically read-modify-write a typed entry.
    ///
    /// An absent entry starts from `T::default()`. If `f` fails the stored
    /// value is left untouched.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or [`StoreError::Serialization`] if the
    /// entry cannot be decoded or re-encoded.
    pub async fn update_as<T, F, R>(&self, key: &str, f: F) -> Result<R, StoreError>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> Result<R, StoreError> + Send,
    {
        let slot = self.slot(key).await;
        let mut guard = slot.lock().await;
        let mut typed: T = match guard.as_ref() {
            Some(value) => decode(key, value.clone())?,
            None => T::default(),
        };
        let result = f(&mut typed)?;
        *guard = Some(encode(key, &typed)?);
        self.revision.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }

    /// Atomically read-modify-write several typed entries.
    ///
    /// The slots of `keys` stay locked for the whole call and are taken in
    /// sorted order. Changes made through the [`Transaction`] are written
    /// back together once `f` succeeds; if `f` fails nothing is written.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, including
    /// [`StoreError::NotInTransaction`] for a key that was not locked.
    pub async fn transact<F, R>(&self, keys: &[&str], f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Transaction) -> Result<R, StoreError> + Send,
    {
        let mut ordered = keys.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut slots = Vec::with_capacity(ordered.len());
        for key in &ordered {
            slots.push(self.slot(key).await);
        }
        let mut guards = Vec::with_capacity(slots.len());
        for slot in &slots {
            guards.push(slot.lock().await);
        }

        let mut txn = Transaction {
            entries: ordered
                .iter()
                .zip(&guards)
                .map(|(key, guard)| ((*key).to_string(), (**guard).clone()))
                .collect(),
            dirty: BTreeSet::new(),
        };
        let result = f(&mut txn)?;

        if !txn.dirty.is_empty() {
            for (key, guard) in ordered.iter().zip(guards.iter_mut()) {
                if txn.dirty.contains(*key) {
                    **guard = txn.entries.remove(*key).flatten();
                }
            }
            self.revision.fetch_add(1, Ordering::SeqCst);
        }
        Ok(result)
    }

    /// Keys with a stored value, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let slots: Vec<(String, Slot)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        let mut keys = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            if slot.lock().await.is_some() {
                keys.push(key);
            }
        }
        keys.sort();
        keys
    }

    /// Capture every entry.
    pub async fn snapshot(&self) -> KnowledgeSnapshot {
        let slots: Vec<(String, Slot)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        let mut entries = BTreeMap::new();
        for (key, slot) in slots {
            if let Some(value) = slot.lock().await.clone() {
                entries.insert(key, value);
            }
        }
        KnowledgeSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            revision: self.revision(),
            taken_at: Utc::now(),
            entries,
        }
    }

    /// Replace all entries with a snapshot's contents.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PersistenceUnavailable`] if the snapshot was
    /// written by an unknown layout version.
    pub async fn restore(&self, snapshot: KnowledgeSnapshot) -> Result<(), StoreError> {
        if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(StoreError::PersistenceUnavailable {
                message: format!(
                    "unsupported snapshot schema version {}",
                    snapshot.schema_version
                ),
            });
        }
        let mut slots = self.slots.write().await;
        slots.clear();
        for (key, value) in snapshot.entries {
            slots.insert(key, Arc::new(Mutex::new(Some(value))));
        }
        self.revision.store(snapshot.revision, Ordering::SeqCst);
        Ok(())
    }

    /// Note that the current contents reached durable storage.
    pub fn mark_durable(&self, at: DateTime<Utc>) {
        if let Ok(mut last) = self.last_durable.lock() {
            *last = Some(at);
        }
    }

    /// When a durable snapshot was last written or loaded.
    #[must_use]
    pub fn last_durable(&self) -> Option<DateTime<Utc>> {
        self.last_durable.lock().ok().and_then(|last| *last)
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    /// Add an occurrence to `error_history[category]`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the history entry cannot be updated.
    pub async fn record_error(
        &self,
        category: &str,
        detail: impl Into<String> + Send,
        at: DateTime<Utc>,
    ) -> Result<ErrorRecord, StoreError> {
        let detail = detail.into();
        tracing::debug!(category, detail = %detail, "Recording error occurrence");
        self.update_as(ERROR_HISTORY, |history: &mut ErrorHistory| {
            let record = history
                .entry(category.to_string())
                .and_modify(|record| record.record(detail.clone(), at))
                .or_insert_with(|| ErrorRecord::new(detail.clone(), at));
            Ok(record.clone())
        })
        .await
    }

    /// Record a test in the ledger, assigning its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the ledger entry cannot be updated.
    pub async fn record_test(
        &self,
        draft: crate::pipeline::TestDraft,
        at: DateTime<Utc>,
    ) -> Result<crate::pipeline::Test, StoreError> {
        self.update_as(TEST_HISTORY, |ledger: &mut TestLedger| {
            Ok(ledger.record(draft, at))
        })
        .await
    }
}

/// Working copies of the entries locked by [`KnowledgeStore::transact`].
#[derive(Debug)]
pub struct Transaction {
    entries: BTreeMap<String, Option<Value>>,
    dirty: BTreeSet<String>,
}

impl Transaction {
    fn current(&self, key: &str) -> Result<Option<&Value>, StoreError> {
        self.entries
            .get(key)
            .map(Option::as_ref)
            .ok_or_else(|| StoreError::NotInTransaction {
                key: key.to_string(),
            })
    }

    /// Decode the working copy of an entry, or its default when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the entry has the wrong shape.
    pub fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, StoreError> {
        match self.current(key)? {
            Some(value) => decode(key, value.clone()),
            None => Ok(T::default()),
        }
    }

    /// Modify the working copy of an entry.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or [`StoreError::Serialization`] if the
    /// entry cannot be decoded or re-encoded.
    pub fn update_as<T, F, R>(&mut self, key: &str, f: F) -> Result<R, StoreError>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> Result<R, StoreError>,
    {
        let mut typed: T = self.get_or_default(key)?;
        let result = f(&mut typed)?;
        let encoded = encode(key, &typed)?;
        self.entries.insert(key.to_string(), Some(encoded));
        self.dirty.insert(key.to_string());
        Ok(result)
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Serialization {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = KnowledgeStore::new();
        assert_eq!(
            store.get("nope").await,
            Err(StoreError::NotFound {
                key: "nope".to_string()
            })
        );
        assert_eq!(store.get_as::<u64>("nope").await, Ok(None));
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = KnowledgeStore::new();
        store.put("a", json!({"x": 1})).await;
        assert_eq!(store.get("a").await.unwrap(), json!({"x": 1}));
        assert_eq!(store.revision(), 1);
    }

    #[tokio::test]
    async fn test_update_as_failure_leaves_value() {
        let store = KnowledgeStore::new();
        store
            .put_as(FIXED_TESTS_STATS, &FixedTestsStats::default())
            .await
            .unwrap();
        store
            .update_as(FIXED_TESTS_STATS, |s: &mut FixedTestsStats| s.append(1, 2))
            .await
            .unwrap();

        let result = store
            .update_as(FIXED_TESTS_STATS, |s: &mut FixedTestsStats| {
                s.count += 100;
                s.append(1, 3)
            })
            .await;
        assert!(matches!(result, Err(StoreError::LineageViolation { .. })));

        let stats: FixedTestsStats = store.get_or_default(FIXED_TESTS_STATS).await.unwrap();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.successor(1), Some(2));
    }

    #[tokio::test]
    async fn test_transact_writes_every_key_together() {
        let store = KnowledgeStore::new();
        let written = store
            .transact(&["b", "a"], |txn| {
                txn.update_as("a", |n: &mut u64| {
                    *n += 1;
                    Ok(())
                })?;
                txn.update_as("b", |n: &mut u64| {
                    *n += 2;
                    Ok(*n)
                })
            })
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(store.get("a").await.unwrap(), json!(1));
        assert_eq!(store.get("b").await.unwrap(), json!(2));
        assert_eq!(store.revision(), 1);
    }

    #[tokio::test]
    async fn test_transact_failure_writes_nothing() {
        let store = KnowledgeStore::new();
        store.put("a", json!(5)).await;
        store.put("b", json!("not a number")).await;
        let revision = store.revision();

        let result = store
            .transact(&["a", "b"], |txn| {
                txn.update_as("a", |n: &mut u64| {
                    *n = 100;
                    Ok(())
                })?;
                txn.update_as("b", |n: &mut u64| {
                    *n += 1;
                    Ok(())
                })
            })
            .await;

        assert!(matches!(result, Err(StoreError::Serialization { ref key, .. }) if key == "b"));
        assert_eq!(store.get("a").await.unwrap(), json!(5));
        assert_eq!(store.revision(), revision);
    }

    #[tokio::test]
    async fn test_transact_rejects_unlocked_key() {
        let store = KnowledgeStore::new();
        let result = store
            .transact(&["a"], |txn| txn.get_or_default::<u64>("other"))
            .await;
        assert_eq!(
            result,
            Err(StoreError::NotInTransaction {
                key: "other".to_string()
            })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_transactions_do_not_deadlock() {
        let store = Arc::new(KnowledgeStore::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            let keys: [&'static str; 2] = if i % 2 == 0 { ["x", "y"] } else { ["y", "x"] };
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    store
                        .transact(&keys, |txn| {
                            for key in keys {
                                txn.update_as(key, |n: &mut u64| {
                                    *n += 1;
                                    Ok(())
                                })?;
                            }
                            Ok(())
                        })
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            tokio::time::timeout(std::time::Duration::from_secs(10), handle)
                .await
                .expect("transactions must not deadlock")
                .unwrap();
        }
        assert_eq!(store.get_as::<u64>("x").await.unwrap(), Some(200));
        assert_eq!(store.get_as::<u64>("y").await.unwrap(), Some(200));
    }

    #[tokio::test]
    async fn test_update_as_wrong_shape() {
        let store = KnowledgeStore::new();
        store.put(MONITOR_STATS, json!("not an object")).await;
        let result = store
            .update_as(MONITOR_STATS, |s: &mut MonitorStats| {
                s.health_checks += 1;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::Serialization { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_same_key_never_lose_writes() {
        let store = Arc::new(KnowledgeStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store
                        .update_as("counter", |n: &mut u64| {
                            *n += 1;
                            Ok(())
                        })
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get_as::<u64>("counter").await.unwrap(), Some(800));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_different_keys_do_not_block_each_other() {
        let store = Arc::new(KnowledgeStore::new());
        let (entered_tx, entered_rx) = std::sync::mpsc::channel::<()>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let holder = {
            let store = Arc::clone(&store);
            tokio::task::spawn_blocking(move || {
                tokio::runtime::Handle::current().block_on(store.update("slow", move |v| {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    *v = Some(json!(1));
                }));
            })
        };

        entered_rx.recv().unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), store.put("fast", json!(2)))
            .await
            .expect("different key must not wait for the held key");
        release_tx.send(()).unwrap();
        holder.await.unwrap();

        assert_eq!(store.get("slow").await.unwrap(), json!(1));
        assert_eq!(store.get("fast").await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_snapshot_restore_round_trip() {
        let store = KnowledgeStore::new();
        let now = Utc::now();
        store
            .record_error("system_exception", "boom", now)
            .await
            .unwrap();
        store
            .put_as(
                MONITOR_STATS,
                &MonitorStats {
                    health_checks: 3,
                    health_alerts: 1,
                    last_check: Some(now),
                },
            )
            .await
            .unwrap();
        store.put("fix_pattern_code_change_0", json!({"type": "fix_pattern"})).await;

        let snapshot = store.snapshot().await;
        let restored = KnowledgeStore::new();
        restored.restore(snapshot.clone()).await.unwrap();
        let again = restored.snapshot().await;

        assert_eq!(again.entries, snapshot.entries);
        assert_eq!(again.revision, snapshot.revision);
    }

    #[tokio::test]
    async fn test_restore_rejects_unknown_schema() {
        let store = KnowledgeStore::new();
        let mut snapshot = store.snapshot().await;
        snapshot.schema_version = 99;
        assert!(matches!(
            store.restore(snapshot).await,
            Err(StoreError::PersistenceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_record_error_accumulates() {
        let store = KnowledgeStore::new();
        let now = Utc::now();
        store.record_error("fix_failure", "one", now).await.unwrap();
        let record = store.record_error("fix_failure", "two", now).await.unwrap();
        assert_eq!(record.count, 2);
        assert_eq!(record.details, "two");
        assert_eq!(record.first_seen, now);
    }

    #[tokio::test]
    async fn test_keys_sorted() {
        let store = KnowledgeStore::new();
        store.put("b", json!(1)).await;
        store.put("a", json!(1)).await;
        assert_eq!(store.keys().await, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_durable_marker() {
        let store = KnowledgeStore::new();
        assert!(store.last_durable().is_none());
        let now = Utc::now();
        store.mark_durable(now);
        assert_eq!(store.last_durable(), Some(now));
    }
}
