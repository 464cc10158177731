//! In-process store backend.
//!
//! Expiry is lazy: keyed commands purge their own expired entry first, and
//! whole-store commands (`scan`, `info`) sweep everything. The clock is
//! tokio's, so paused-time tests control expiry.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tracing::warn;

use crate::cache::keys::glob_matches;
use crate::cache::{KeyValueStore, StoreError, StoreInfo};

enum StoredValue {
    Text(String),
    Members(HashSet<String>),
}

struct StoredEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn text(value: &str, ttl: Duration, now: Instant) -> Self {
        Self {
            value: StoredValue::Text(value.to_string()),
            expires_at: deadline(ttl, now),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    fn approximate_size(&self) -> usize {
        match &self.value {
            StoredValue::Text(text) => text.len(),
            StoredValue::Members(members) => members.iter().map(String::len).sum(),
        }
    }
}

fn deadline(ttl: Duration, now: Instant) -> Option<Instant> {
    (!ttl.is_zero()).then(|| now + ttl)
}

/// Key-value store held in process memory.
///
/// Used for single-node deployments and tests. `simulate_outage` makes every
/// command fail with [`StoreError::Unavailable`] until it is switched back.
pub struct MemoryStore {
    entries: DashMap<String, StoredEntry>,
    started_at: Instant,
    commands: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            started_at: Instant::now(),
            commands: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn simulate_outage(&self, unavailable: bool) {
        if unavailable {
            warn!(store = "memory", "simulated store outage started");
        }
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn begin(&self, command: &'static str) -> Result<Instant, StoreError> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "memory store rejected `{command}` during simulated outage"
            )));
        }
        Ok(Instant::now())
    }

    fn purge(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }

    fn sweep(&self, now: Instant) {
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.begin("get")?;
        self.purge(key, now);
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                StoredValue::Text(text) => Ok(Some(text.clone())),
                StoredValue::Members(_) => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.begin("set")?;
        self.entries
            .insert(key.to_string(), StoredEntry::text(value, ttl, now));
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = self.begin("del")?;
        let mut removed = 0;
        for key in keys {
            self.purge(key, now);
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.begin("exists")?;
        self.purge(key, now);
        Ok(self.entries.contains_key(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.begin("expire")?;
        self.purge(key, now);
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = deadline(ttl, now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let now = self.begin("set_add")?;
        self.purge(key, now);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry {
                value: StoredValue::Members(HashSet::new()),
                expires_at: None,
            });
        match &mut entry.value {
            StoredValue::Members(members) => Ok(members.insert(member.to_string())),
            StoredValue::Text(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn index_add(
        &self,
        key: &str,
        member: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.begin("index_add")?;
        self.purge(key, now);
        let wanted = deadline(ttl, now);
        let (mut entry, existed) = match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => (occupied.into_ref(), true),
            Entry::Vacant(vacant) => (
                vacant.insert(StoredEntry {
                    value: StoredValue::Members(HashSet::new()),
                    expires_at: wanted,
                }),
                false,
            ),
        };
        let added = match &mut entry.value {
            StoredValue::Members(members) => members.insert(member.to_string()),
            StoredValue::Text(_) => return Err(StoreError::WrongType(key.to_string())),
        };
        if existed {
            // None never expires, so it outlasts any deadline.
            entry.expires_at = match (entry.expires_at, wanted) {
                (Some(current), Some(wanted)) => Some(current.max(wanted)),
                _ => None,
            };
        }
        Ok(added)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let now = self.begin("set_members")?;
        self.purge(key, now);
        match self.entries.get(key) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.value {
                StoredValue::Members(members) => Ok(members.iter().cloned().collect()),
                StoredValue::Text(_) => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.begin("set_if_absent")?;
        self.purge(key, now);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry::text(value, ttl, now));
                Ok(true)
            }
        }
    }

    async fn del_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let now = self.begin("del_if_equals")?;
        self.purge(key, now);
        let removed = self.entries.remove_if(key, |_, entry| {
            matches!(&entry.value, StoredValue::Text(text) if text == expected)
        });
        Ok(removed.is_some())
    }

    async fn flush_all(&self) -> Result<(), StoreError> {
        self.begin("flush_all")?;
        self.entries.clear();
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = self.begin("scan")?;
        self.sweep(now);
        Ok(self
            .entries
            .iter()
            .filter(|entry| glob_matches(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn info(&self) -> Result<StoreInfo, StoreError> {
        let now = self.begin("info")?;
        self.sweep(now);
        let memory_bytes = self
            .entries
            .iter()
            .map(|entry| entry.key().len() + entry.value().approximate_size())
            .sum::<usize>();
        Ok(StoreInfo {
            keys: self.entries.len() as u64,
            memory_bytes: memory_bytes as u64,
            uptime_seconds: now.duration_since(self.started_at).as_secs(),
            connected_clients: 1,
            total_commands: self.commands.load(Ordering::Relaxed),
        })
    }
}
