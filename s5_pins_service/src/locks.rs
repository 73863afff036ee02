use dashmap::DashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

const SHARDS: usize = 64;

/// Fixed set of mutexes, picked by key hash.
///
/// For short critical sections where an occasional false collision between
/// unrelated keys is harmless.
#[derive(Debug)]
pub(crate) struct ShardedLocks {
    locks: [Arc<Mutex<()>>; SHARDS],
}

impl ShardedLocks {
    pub fn new() -> Self {
        Self {
            locks: std::array::from_fn(|_| Arc::new(Mutex::new(()))),
        }
    }

    pub async fn lock<K: Hash + ?Sized>(&self, key: &K) -> OwnedMutexGuard<()> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % SHARDS as u64) as usize;
        self.locks[index].clone().lock_owned().await
    }
}

/// One mutex per live key, created on demand and dropped when unused.
///
/// Used where the lock is held across slow operations, so unrelated keys
/// must never share a lock.
#[derive(Debug)]
pub(crate) struct KeyedLocks<K: Hash + Eq> {
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Hash + Eq + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    pub async fn lock(&self, key: &K) -> KeyedGuard<K> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            guard: Some(guard),
            key: key.clone(),
            locks: self.locks.clone(),
        }
    }

    /// Returns `None` if another holder has the lock for `key`.
    pub fn try_lock(&self, key: &K) -> Option<KeyedGuard<K>> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.try_lock_owned().ok()?;
        Some(KeyedGuard {
            guard: Some(guard),
            key: key.clone(),
            locks: self.locks.clone(),
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

pub(crate) struct KeyedGuard<K: Hash + Eq> {
    guard: Option<OwnedMutexGuard<()>>,
    key: K,
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Hash + Eq> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // only the map still holds the mutex: nobody is waiting for it
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
