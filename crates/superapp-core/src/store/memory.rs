use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{validate_key, KeyValueStore, StoreError};

/// In-process store. Nothing survives the process.
///
/// Faults can be injected per key to exercise the session's failure paths:
/// reads or writes of a key fail with `StoreError::Unavailable`, writes of a
/// key can be slowed down, and a stalled store never answers at all.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    failing_reads: Mutex<HashSet<String>>,
    failing_writes: Mutex<HashSet<String>>,
    slow_sets: Mutex<HashMap<String, Duration>>,
    stalled: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value without going through the async interface.
    pub fn insert(&self, key: &str, value: &str) {
        lock(&self.entries).insert(key.to_string(), value.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.entries).contains_key(key)
    }

    pub fn value(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    pub fn fail_reads_of(&self, key: &str) {
        lock(&self.failing_reads).insert(key.to_string());
    }

    /// Make `set` and `remove` of `key` fail.
    pub fn fail_writes_of(&self, key: &str) {
        lock(&self.failing_writes).insert(key.to_string());
    }

    /// `set` of `key` sleeps for `delay` before storing the value.
    pub fn slow_sets_of(&self, key: &str, delay: Duration) {
        lock(&self.slow_sets).insert(key.to_string(), delay);
    }

    /// Every call from now on waits forever.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    pub fn clear_faults(&self) {
        lock(&self.failing_reads).clear();
        lock(&self.failing_writes).clear();
        lock(&self.slow_sets).clear();
        self.stalled.store(false, Ordering::SeqCst);
    }

    async fn check(&self, key: &str, faults: &Mutex<HashSet<String>>) -> Result<(), StoreError> {
        validate_key(key)?;
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if lock(faults).contains(key) {
            return Err(StoreError::Unavailable(format!("injected fault on {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check(key, &self.failing_reads).await?;
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check(key, &self.failing_writes).await?;
        let delay = lock(&self.slow_sets).get(key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check(key, &self.failing_writes).await?;
        lock(&self.entries).remove(key);
        Ok(())
    }
}
