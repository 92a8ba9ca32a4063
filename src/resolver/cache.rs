//! Learned key cache
//!
//! Maps an [`Identity`] to the XOR key that last decoded its traffic. One
//! mutex guards the whole map; no I/O happens while it is held. Saves to the
//! learned-key file are serialized by a second mutex held across snapshot,
//! write and rename.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::crypto::XorKey;
use crate::error::{GatewayError, Result};
use crate::resolver::Identity;

/// A learned key for one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCacheEntry {
    pub identity: Identity,
    pub key: XorKey,
    pub learned_at: DateTime<Utc>,
    #[serde(default)]
    pub hit_count: u64,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeyCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

struct Slot {
    entry: KeyCacheEntry,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Identity, Slot>,
    /// Insertion sequence -> identity, oldest first
    recency: BTreeMap<u64, Identity>,
    next_seq: u64,
    hits: u64,
    misses: u64,
}

impl Inner {
    fn insert(&mut self, entry: KeyCacheEntry) -> Option<KeyCacheEntry> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let identity = entry.identity.clone();
        let previous = self.entries.insert(identity.clone(), Slot { entry, seq });
        if let Some(old) = &previous {
            self.recency.remove(&old.seq);
        }
        self.recency.insert(seq, identity);
        previous.map(|slot| slot.entry)
    }

    fn remove(&mut self, identity: &Identity) -> Option<KeyCacheEntry> {
        let slot = self.entries.remove(identity)?;
        self.recency.remove(&slot.seq);
        Some(slot.entry)
    }
}

/// Shared identity -> key map
#[derive(Default)]
pub struct KeyCache {
    inner: Mutex<Inner>,
    persist_path: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl KeyCache {
    /// Create an empty in-memory cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache that is loaded from and saved to `path`
    pub fn with_persistence(path: impl Into<PathBuf>) -> Self {
        let cache = Self {
            persist_path: Some(path.into()),
            ..Self::default()
        };
        if let Some(path) = cache.persist_path.as_deref() {
            match cache.load_from(path) {
                Ok(count) => info!(path = %path.display(), count, "Loaded learned keys"),
                Err(e) => warn!(path = %path.display(), error = %e, "Could not load learned keys"),
            }
        }
        cache
    }

    /// Look up the key for `identity`, counting the hit
    pub fn lookup(&self, identity: &Identity) -> Option<XorKey> {
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(identity) {
            Some(slot) => {
                slot.entry.hit_count += 1;
                let key = slot.entry.key;
                inner.hits += 1;
                Some(key)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Read an entry without touching counters
    pub fn peek(&self, identity: &Identity) -> Option<KeyCacheEntry> {
        self.inner
            .lock()
            .entries
            .get(identity)
            .map(|slot| slot.entry.clone())
    }

    /// Insert or replace the key for `identity`, returning the previous key
    pub fn store(&self, identity: Identity, key: XorKey) -> Option<XorKey> {
        let previous = self
            .inner
            .lock()
            .insert(KeyCacheEntry {
                identity: identity.clone(),
                key,
                learned_at: Utc::now(),
                hit_count: 0,
            })
            .map(|e| e.key);

        match previous {
            Some(old) if old != key => {
                info!(identity = %identity, "Replaced learned key");
                debug!(identity = %identity, old = %old, new = %key, "Key replacement");
            }
            Some(_) => debug!(identity = %identity, "Refreshed learned key"),
            None => info!(identity = %identity, "Learned new key"),
        }

        self.persist();
        previous
    }

    /// Remove the key for `identity`. Rewrites the learned-key file when
    /// persistence is on, so call it from a blocking context.
    pub fn invalidate(&self, identity: &Identity) -> bool {
        let removed = self.inner.lock().remove(identity).is_some();
        if removed {
            info!(identity = %identity, "Invalidated learned key");
            self.persist();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> KeyCacheStats {
        let inner = self.inner.lock();
        KeyCacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    /// All entries, ordered by identity
    pub fn snapshot(&self) -> Vec<KeyCacheEntry> {
        let mut entries: Vec<_> = self
            .inner
            .lock()
            .entries
            .values()
            .map(|slot| slot.entry.clone())
            .collect();
        entries.sort_by(|a, b| a.identity.cmp(&b.identity));
        entries
    }

    /// Offer up to `limit` entries not belonging to `skip` to `f`, most
    /// recently learned first, and return the first value it produces. `f`
    /// runs with the cache locked.
    pub fn find_recent<T>(
        &self,
        skip: &Identity,
        limit: usize,
        mut f: impl FnMut(&KeyCacheEntry) -> Option<T>,
    ) -> Option<T> {
        let inner = self.inner.lock();
        inner
            .recency
            .values()
            .rev()
            .filter(|identity| *identity != skip)
            .take(limit)
            .find_map(|identity| inner.entries.get(identity).and_then(|slot| f(&slot.entry)))
    }

    /// Merge entries from a JSON file, returning how many were loaded
    pub fn load_from(&self, path: &Path) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let content = std::fs::read_to_string(path)?;
        let mut entries: Vec<KeyCacheEntry> = serde_json::from_str(&content)
            .map_err(|e| GatewayError::Internal(format!("Invalid learned key file: {}", e)))?;
        entries.sort_by_key(|entry| entry.learned_at);
        let count = entries.len();

        let mut inner = self.inner.lock();
        for entry in entries {
            inner.insert(entry);
        }
        Ok(count)
    }

    /// Write all entries to `path` as JSON
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let _saving = self.persist_lock.lock();
        let entries = self.snapshot();
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| GatewayError::Internal(format!("Failed to encode learned keys: {}", e)))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn persist(&self) {
        if let Some(path) = self.persist_path.as_deref() {
            if let Err(e) = self.save_to(path) {
                warn!(path = %path.display(), error = %e, "Failed to persist learned keys");
            }
        }
    }
}
