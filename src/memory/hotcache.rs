//! src/memory/hotcache.rs
//!
//! Per-session, LRU-bounded in-memory cache of `SessionMemory` records.
//! Grounded on the pack's `dashmap`-backed concurrent-store pattern
//! (`harborgrid-justin-rusty-db`) for the outer per-session sharding, with
//! a small intrusive LRU (`indexmap`-free, plain `Vec` order list — no new
//! dependency needed for a bound in the low thousands) for recency order
//! inside each shard.

use crate::memory::model::SessionMemory;
use dashmap::DashMap;
use std::collections::VecDeque;

struct ShardState {
    order: VecDeque<String>,
    entries: std::collections::HashMap<String, SessionMemory>,
}

impl ShardState {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            entries: std::collections::HashMap::new(),
        }
    }

    fn touch(&mut self, id: &str) {
        if let Some(pos) = self.order.iter().position(|x| x == id) {
            self.order.remove(pos);
        }
        self.order.push_back(id.to_string());
    }
}

/// Bounded at `cap` entries per session. Adding over the cap evicts the
/// least-recently-touched entry and returns it to the caller (cold store
/// is authoritative, so the caller persists the eviction, not discards it).
pub struct HotCache {
    shards: DashMap<String, ShardState>,
    cap: usize,
}

impl HotCache {
    pub fn new(cap: usize) -> Self {
        Self {
            shards: DashMap::new(),
            cap,
        }
    }

    /// Inserts or overwrites a memory for its session, bumping it to most
    /// recently used. Returns the evicted record, if the cap was exceeded.
    pub fn insert(&self, memory: SessionMemory) -> Option<SessionMemory> {
        let mut shard = self
            .shards
            .entry(memory.session_id.clone())
            .or_insert_with(ShardState::new);

        let id = memory.id.clone();
        shard.entries.insert(id.clone(), memory);
        shard.touch(&id);

        if shard.entries.len() > self.cap {
            if let Some(evict_id) = shard.order.pop_front() {
                return shard.entries.remove(&evict_id);
            }
        }
        None
    }

    pub fn get(&self, session_id: &str, memory_id: &str) -> Option<SessionMemory> {
        let mut shard = self.shards.get_mut(session_id)?;
        let found = shard.entries.get(memory_id).cloned();
        if found.is_some() {
            shard.touch(memory_id);
        }
        found
    }

    pub fn session_len(&self, session_id: &str) -> usize {
        self.shards.get(session_id).map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn session_entries(&self, session_id: &str) -> Vec<SessionMemory> {
        self.shards
            .get(session_id)
            .map(|s| s.entries.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_session(&self, session_id: &str) {
        self.shards.remove(session_id);
    }
}
