//! src/memory/mod.rs
//!
//! The memory service: the public surface the session fabric and router
//! call into. Owns the hot cache and delegates authoritative persistence
//! to a `MemoryStore`. A leaf subsystem per the dependency order — nothing
//! else in the core calls into it except via this façade.

pub mod hotcache;
pub mod model;
pub mod store;

use crate::error::Result;
use chrono::Utc;
use hotcache::HotCache;
use model::{ChainOfThoughtStep, Message, SessionContinuity, SessionMemory};
use std::collections::HashSet;
use std::sync::Arc;
use store::{MemoryStore, SearchTarget};

const DEFAULT_RESUME_MESSAGE_COUNT: usize = 100;
const DEFAULT_SEARCH_TOP_K: usize = 10;

pub struct ResumeResult {
    pub messages: Vec<Message>,
    pub continuity: Option<SessionContinuity>,
    pub hot_cache_size: usize,
}

pub struct MemoryService {
    store: Arc<dyn MemoryStore>,
    hot_cache: HotCache,
    max_messages_per_session: usize,
}

impl MemoryService {
    pub fn new(store: Arc<dyn MemoryStore>, hot_cache_max_per_session: usize, max_messages_per_session: usize) -> Self {
        Self {
            store,
            hot_cache: HotCache::new(hot_cache_max_per_session),
            max_messages_per_session,
        }
    }

    /// Appends a message. If the session's non-code-edit message count
    /// would exceed the configured cap, the write still proceeds — only a
    /// warning is logged, per §4.6's "caller compacts, service never
    /// rejects" rule.
    pub async fn append_message(&self, message: Message) -> Result<()> {
        if let Some(session_id) = message.session_id.clone() {
            let count = self.store.non_code_edit_message_count(&session_id).await?;
            if !message.is_code_edit && count + 1 > self.max_messages_per_session {
                tracing::warn!(
                    session_id,
                    count = count + 1,
                    cap = self.max_messages_per_session,
                    "session message count exceeds cap; caller should compact"
                );
            }
        }
        self.store.put_message(message).await
    }

    pub async fn store_memory(&self, memory: SessionMemory) -> Result<Option<SessionMemory>> {
        self.store.put_session_memory(memory.clone()).await?;
        Ok(self.hot_cache.insert(memory))
    }

    /// Commits the chain-of-thought rows for one message atomically.
    pub async fn store_chain_of_thought(&self, steps: Vec<ChainOfThoughtStep>) -> Result<()> {
        self.store.store_chain_of_thought(steps).await
    }

    /// Rehydrates the hot cache from cold store (importance desc, then
    /// recency, up to the cap) and returns the recent N messages plus the
    /// continuity record if present.
    pub async fn resume_session(&self, session_id: &str) -> Result<ResumeResult> {
        self.hot_cache.clear_session(session_id);
        let memories = self.store.session_memories(session_id).await?;
        for m in memories {
            self.hot_cache.insert(m);
        }
        let messages = self
            .store
            .messages_for_session(session_id, DEFAULT_RESUME_MESSAGE_COUNT)
            .await?;
        let continuity = self.store.continuity_for_session(session_id).await?;
        Ok(ResumeResult {
            messages,
            hot_cache_size: self.hot_cache.session_len(session_id),
            continuity,
        })
    }

    /// Full-text searches session memories, returning top K by rank then
    /// importance, bumping each matching hit's recall count once and
    /// re-inserting it into the hot cache as a side effect. The underlying
    /// index is not session-scoped, so hits outside this session are
    /// filtered out before anything is touched or returned.
    pub async fn search_session_memories(&self, session_id: &str, query: &str) -> Result<Vec<SessionMemory>> {
        let session_memories = self.store.session_memories(session_id).await?;
        let in_session: HashSet<String> = session_memories.into_iter().map(|m| m.id).collect();

        let hits = self.store.search(SearchTarget::Memories, query, DEFAULT_SEARCH_TOP_K).await?;
        let mut matched = Vec::with_capacity(hits.len());
        for hit in hits {
            if in_session.contains(&hit.id) {
                self.store.touch_recall(&hit.id).await?;
                matched.push(hit);
            }
        }

        // Re-read after every matched hit's recall bump has landed, so each
        // returned record reflects its own bump exactly once.
        let refreshed = self.store.session_memories(session_id).await?;
        let mut results: Vec<(f32, SessionMemory)> = matched
            .into_iter()
            .filter_map(|hit| refreshed.iter().find(|m| m.id == hit.id).cloned().map(|m| (hit.rank, m)))
            .collect();
        results.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap()
                .then(b.1.importance.partial_cmp(&a.1.importance).unwrap())
        });
        for (_, m) in &results {
            self.hot_cache.insert(m.clone());
        }
        Ok(results.into_iter().map(|(_, m)| m).collect())
    }

    pub async fn put_continuity(&self, session_id: &str, last_message_id: &str, context_summary: &str, resume_prompt: &str) -> Result<()> {
        self.store
            .put_continuity(SessionContinuity {
                session_id: session_id.to_string(),
                last_message_id: last_message_id.to_string(),
                context_summary: context_summary.to_string(),
                resume_prompt: resume_prompt.to_string(),
            })
            .await
    }

    pub fn hot_cache_size(&self, session_id: &str) -> usize {
        self.hot_cache.session_len(session_id)
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}
