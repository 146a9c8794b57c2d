//! Time-bounded directory cache
//!
//! Expiry is for the cache as a whole, not per entry: the refresh marker is
//! set when the first entry lands in an empty cache, and the first lookup
//! after `ttl` has elapsed drops everything.
//!
//! Every removal bumps a generation counter. A caller that read the durable
//! store without holding the lock passes the generation it saw beforehand to
//! [`DirectoryCache::insert_if_current`], so an entry deleted meanwhile is
//! not cached again.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

use crate::DirectoryEntry;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hit(DirectoryEntry),
    Miss,
    /// The TTL had elapsed; the cache was emptied by this lookup
    Expired,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, DirectoryEntry>,
    refreshed_at: Option<Instant>,
    generation: u64,
}

impl State {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.refreshed_at.is_some_and(|at| at.elapsed() >= ttl)
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.refreshed_at = None;
        self.generation += 1;
    }

    fn insert(&mut self, entry: DirectoryEntry) {
        if self.entries.is_empty() {
            self.refreshed_at = Some(Instant::now());
        }
        self.entries.insert(entry.tenant_id.clone(), entry);
    }
}

pub struct DirectoryCache {
    ttl: Duration,
    state: RwLock<State>,
}

impl DirectoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(State::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, tenant_id: &str) -> Lookup {
        {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            if !state.is_stale(self.ttl) {
                return match state.entries.get(tenant_id) {
                    Some(entry) => Lookup::Hit(entry.clone()),
                    None => Lookup::Miss,
                };
            }
        }

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        // Another lookup may have reset it while we waited for the write lock
        if state.is_stale(self.ttl) {
            state.reset();
            return Lookup::Expired;
        }
        match state.entries.get(tenant_id) {
            Some(entry) => Lookup::Hit(entry.clone()),
            None => Lookup::Miss,
        }
    }

    /// Current removal generation, to be read before a store lookup.
    pub fn generation(&self) -> u64 {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .generation
    }

    pub fn insert(&self, entry: DirectoryEntry) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entry);
    }

    /// Insert `entry` unless something was removed since `generation` was read.
    pub fn insert_if_current(&self, entry: DirectoryEntry, generation: u64) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.generation != generation {
            return false;
        }
        state.insert(entry);
        true
    }

    pub fn remove(&self, tenant_id: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.generation += 1;
        state.entries.remove(tenant_id).is_some()
    }

    pub fn clear(&self) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .reset();
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DirectoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl std::fmt::Debug for DirectoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.len())
            .finish()
    }
}
