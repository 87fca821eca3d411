//! Keyed cooperative locks with expiry.
//!
//! One [`LockTable`] is shared by every capture session of a process. Each
//! session talks to it through its own [`CaptureMutex`], which carries the
//! owner token: re-locking a key you already own succeeds and refreshes the
//! deadline, and any entry past its deadline can be taken over by anyone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Key under which raw-buffer encodes are serialised.
pub const ENCODER_KEY: &str = "encoder";

/// Lock key guarding one capture target.
pub fn target_key(target_id: &str) -> String {
    format!("capture-{}", target_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerToken(u64);

impl OwnerToken {
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
struct LockEntry {
    owner: OwnerToken,
    deadline: Instant,
}

impl LockEntry {
    fn available_to(&self, owner: OwnerToken, now: Instant) -> bool {
        self.owner == owner || self.deadline < now
    }
}

#[derive(Debug, Default)]
pub struct LockTable {
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_acquire(&self, key: &str, owner: OwnerToken, lock_time: Duration) -> bool {
        let now = Instant::now();
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entries.get(key) {
            Some(entry) if !entry.available_to(owner, now) => false,
            _ => {
                entries.insert(
                    key.to_string(),
                    LockEntry {
                        owner,
                        deadline: now + lock_time,
                    },
                );
                true
            }
        }
    }

    fn release(&self, key: &str, owner: OwnerToken) -> bool {
        let now = Instant::now();
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entries.get(key) {
            Some(entry) if !entry.available_to(owner, now) => false,
            _ => {
                entries.remove(key);
                true
            }
        }
    }

    /// Whether a live (non-expired) entry exists for `key`.
    pub fn is_locked(&self, key: &str) -> bool {
        let now = Instant::now();
        match self.entries.lock() {
            Ok(entries) => entries.get(key).map_or(false, |e| e.deadline >= now),
            Err(poisoned) => poisoned
                .into_inner()
                .get(key)
                .map_or(false, |e| e.deadline >= now),
        }
    }
}

/// A handle on the lock table for one logical owner.
#[derive(Debug, Clone)]
pub struct CaptureMutex {
    table: Arc<LockTable>,
    owner: OwnerToken,
    lock_time: Duration,
    retry_interval: Duration,
}

impl CaptureMutex {
    pub fn new(table: Arc<LockTable>, lock_time: Duration, retry_interval: Duration) -> Self {
        Self {
            table,
            owner: OwnerToken::new(),
            lock_time,
            retry_interval,
        }
    }

    /// Non-blocking attempt with the default lock time.
    pub fn try_lock(&self, key: &str) -> bool {
        self.try_lock_for(key, self.lock_time)
    }

    pub fn try_lock_for(&self, key: &str, lock_time: Duration) -> bool {
        let acquired = self.table.try_acquire(key, self.owner, lock_time);
        log::debug!("[LOCK] try {} -> {}", key, acquired);
        acquired
    }

    /// Retry every `retry_interval` until the lock is ours.
    pub async fn lock_for(&self, key: &str, lock_time: Duration) {
        while !self.try_lock_for(key, lock_time) {
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// Retry at most `retries` extra times. Returns whether the lock was taken.
    pub async fn lock_with_retries(&self, key: &str, lock_time: Duration, retries: u32) -> bool {
        for _ in 0..retries {
            if self.try_lock_for(key, lock_time) {
                return true;
            }
            tokio::time::sleep(self.retry_interval).await;
        }
        self.try_lock_for(key, lock_time)
    }

    /// Release `key` if we own it or it has expired.
    pub fn unlock(&self, key: &str) -> bool {
        let released = self.table.release(key, self.owner);
        log::debug!("[LOCK] release {} -> {}", key, released);
        released
    }

    /// Take `key` without waiting and release it when the guard drops.
    pub fn try_guard(&self, key: &str) -> Option<LockGuard<'_>> {
        self.try_lock(key).then(|| LockGuard {
            mutex: self,
            key: key.to_string(),
        })
    }

    /// Wrap a lock that is already held so it is released on drop.
    pub fn guard_held(&self, key: &str) -> LockGuard<'_> {
        LockGuard {
            mutex: self,
            key: key.to_string(),
        }
    }
}

/// Releases its key on drop, whatever path the session leaves by.
#[derive(Debug)]
pub struct LockGuard<'a> {
    mutex: &'a CaptureMutex,
    key: String,
}

impl LockGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Push the expiry out by the mutex's lock time. Returns false if the
    /// lock had already lapsed and someone else holds it now.
    pub fn refresh(&self) -> bool {
        self.refresh_for(self.mutex.lock_time)
    }

    pub fn refresh_for(&self, lock_time: Duration) -> bool {
        let held = self.mutex.try_lock_for(&self.key, lock_time);
        if !held {
            log::warn!("[LOCK] {} lapsed and was taken by another owner", self.key);
        }
        held
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock(&self.key);
    }
}
