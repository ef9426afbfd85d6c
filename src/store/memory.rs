//! In-process store implementation
//!
//! Backs the [`SharedStore`] contract with a mutex-guarded map. Used by
//! tests and by single-node runs where a Redis deployment is overkill.
//! TTLs are honored lazily: expired entries are dropped on access, and
//! tests can force an expiry with [`MemoryStore::force_expire`].
//!
//! Because every operation runs under one lock, `reserve_slot` is
//! trivially atomic here, matching the serialization the Lua script
//! provides on Redis.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{ReservationVerdict, SharedStore, StoreResult};

enum Value {
    Text(String),
    Set(HashSet<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

/// Mutex-guarded in-memory key/value store
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop `key` as if its TTL had just expired
    ///
    /// Returns whether the key was present. Tests pair this with
    /// [`super::ExpiryListener::handle_expired_key`] to simulate the
    /// crash-recovery path without waiting out real TTLs.
    pub fn force_expire(&self, key: &str) -> bool {
        self.entries.lock().unwrap().remove(key).is_some()
    }

    fn purge_if_expired(entries: &mut HashMap<String, Entry>, key: &str) {
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
    }

    fn with_set<T>(
        entries: &mut HashMap<String, Entry>,
        key: &str,
        f: impl FnOnce(&mut HashSet<String>) -> T,
    ) -> T {
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });
        // A text value under a set key means corrupted state; start over
        if !matches!(entry.value, Value::Set(_)) {
            entry.value = Value::Set(HashSet::new());
        }
        match &mut entry.value {
            Value::Set(set) => f(set),
            Value::Text(_) => unreachable!("set value ensured above"),
        }
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_if_expired(&mut entries, key);
        Ok(entries.contains_key(key))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_if_expired(&mut entries, key);
        Ok(entries.get(key).and_then(|e| match &e.value {
            Value::Text(s) => Some(s.clone()),
            Value::Set(_) => None,
        }))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn ttl_seconds(&self, key: &str) -> StoreResult<u64> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_if_expired(&mut entries, key);
        let now = Instant::now();
        Ok(entries
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|deadline| {
                let remaining = deadline.saturating_duration_since(now);
                // Round up, as Redis reports a freshly-set 5 s TTL as 5
                remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
            })
            .unwrap_or(0))
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_if_expired(&mut entries, key);
        Self::with_set(&mut entries, key, |set| {
            set.insert(member.to_string());
        });
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_if_expired(&mut entries, key);
        let mut now_empty = false;
        if let Some(entry) = entries.get_mut(key) {
            if let Value::Set(set) = &mut entry.value {
                set.remove(member);
                now_empty = set.is_empty();
            }
        }
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    async fn set_cardinality(&self, key: &str) -> StoreResult<u64> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_if_expired(&mut entries, key);
        Ok(entries
            .get(key)
            .map(|e| match &e.value {
                Value::Set(set) => set.len() as u64,
                Value::Text(_) => 0,
            })
            .unwrap_or(0))
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_if_expired(&mut entries, key);
        Ok(entries
            .get(key)
            .map(|e| match &e.value {
                Value::Set(set) => set.iter().cloned().collect(),
                Value::Text(_) => Vec::new(),
            })
            .unwrap_or_default())
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .filter(|(k, _)| glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn reserve_slot(
        &self,
        set_key: &str,
        limit: u32,
        member: &str,
    ) -> StoreResult<ReservationVerdict> {
        // One lock acquisition covers count, compare and insert, exactly
        // like the server-side script does on Redis.
        let mut entries = self.entries.lock().unwrap();
        Self::purge_if_expired(&mut entries, set_key);
        let verdict = Self::with_set(&mut entries, set_key, |set| {
            if set.len() as u64 >= u64::from(limit) {
                ReservationVerdict::Rejected
            } else {
                set.insert(member.to_string());
                ReservationVerdict::Allowed
            }
        });
        // Reservation must never leave an empty set behind
        let now_empty = matches!(
            entries.get(set_key),
            Some(Entry { value: Value::Set(set), .. }) if set.is_empty()
        );
        if now_empty {
            entries.remove(set_key);
        }
        Ok(verdict)
    }
}

/// Minimal glob matcher supporting `*` wildcards, enough for the
/// `user:*:jobs` scan pattern
fn glob_match(pattern: &str, candidate: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == candidate;
    }

    let mut rest = candidate;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return part.is_empty() || rest.ends_with(part);
        } else if !part.is_empty() {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

// ============================================================================
// Tests
// ============================================================================
