//! src/memory/store.rs
//!
//! The cold, authoritative store behind the hot cache: conversations,
//! messages, session memories, chain-of-thought steps, and continuity
//! records, plus a hand-rolled inverted-index full-text search (no FTS
//! crate pulled in for a single-process in-memory index; `dashmap` for
//! concurrent shards matches the enrichment source's storage-engine
//! pattern).

use crate::error::{Error, Result};
use crate::memory::model::{
    ChainOfThoughtStep, Conversation, Message, SessionContinuity, SessionMemory,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchTarget {
    Messages,
    Memories,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub rank: f32,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn put_conversation(&self, conversation: Conversation) -> Result<()>;
    async fn put_message(&self, message: Message) -> Result<()>;
    async fn messages_for_conversation(&self, conversation_id: &str) -> Result<Vec<Message>>;
    async fn messages_for_session(&self, session_id: &str, limit: usize) -> Result<Vec<Message>>;
    async fn non_code_edit_message_count(&self, session_id: &str) -> Result<usize>;

    async fn put_session_memory(&self, memory: SessionMemory) -> Result<()>;
    async fn session_memories(&self, session_id: &str) -> Result<Vec<SessionMemory>>;
    async fn touch_recall(&self, memory_id: &str) -> Result<()>;

    /// Commits every step or none: a partial write must never be visible.
    async fn store_chain_of_thought(&self, steps: Vec<ChainOfThoughtStep>) -> Result<()>;

    async fn put_continuity(&self, continuity: SessionContinuity) -> Result<()>;
    async fn continuity_for_session(&self, session_id: &str) -> Result<Option<SessionContinuity>>;

    async fn search(&self, target: SearchTarget, query: &str, top_k: usize) -> Result<Vec<SearchHit>>;
}

#[derive(Default)]
struct InvertedIndex {
    postings: HashMap<String, HashSet<String>>,
}

impl InvertedIndex {
    fn tokenize(text: &str) -> Vec<String> {
        text.split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| !w.is_empty())
            .collect()
    }

    fn index(&mut self, id: &str, text: &str) {
        for token in Self::tokenize(text) {
            self.postings.entry(token).or_default().insert(id.to_string());
        }
    }

    /// Ranks candidate IDs by the count of distinct query tokens they
    /// match (a minimal TF-style rank, sufficient for the in-memory test
    /// seam this store backs; a real FTS engine is an external
    /// collaborator per §1).
    fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let tokens = Self::tokenize(query);
        let mut scores: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            if let Some(ids) = self.postings.get(token) {
                for id in ids {
                    *scores.entry(id.clone()).or_insert(0) += 1;
                }
            }
        }
        let mut hits: Vec<SearchHit> = scores
            .into_iter()
            .map(|(id, score)| SearchHit {
                id,
                rank: score as f32,
            })
            .collect();
        hits.sort_by(|a, b| b.rank.partial_cmp(&a.rank).unwrap());
        hits.truncate(top_k);
        hits
    }
}

/// `dashmap`-backed in-memory implementation of `MemoryStore`. Suitable as
/// the store behind a single node's memory service; cross-node sharing of
/// conversation state is explicitly out of scope (§1: cross-node session
/// migration is a non-goal).
pub struct InMemoryStore {
    conversations: DashMap<String, Conversation>,
    messages: DashMap<String, Message>,
    messages_by_conversation: DashMap<String, Vec<String>>,
    messages_by_session: DashMap<String, Vec<String>>,
    session_memories: DashMap<String, SessionMemory>,
    memories_by_session: DashMap<String, Vec<String>>,
    chain_of_thought: DashMap<String, Vec<ChainOfThoughtStep>>,
    continuity: DashMap<String, SessionContinuity>,
    message_index: Mutex<InvertedIndex>,
    memory_index: Mutex<InvertedIndex>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            conversations: DashMap::new(),
            messages: DashMap::new(),
            messages_by_conversation: DashMap::new(),
            messages_by_session: DashMap::new(),
            session_memories: DashMap::new(),
            memories_by_session: DashMap::new(),
            chain_of_thought: DashMap::new(),
            continuity: DashMap::new(),
            message_index: Mutex::new(InvertedIndex::default()),
            memory_index: Mutex::new(InvertedIndex::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn put_conversation(&self, conversation: Conversation) -> Result<()> {
        self.conversations.insert(conversation.id.clone(), conversation);
        Ok(())
    }

    async fn put_message(&self, message: Message) -> Result<()> {
        self.message_index.lock().unwrap().index(&message.id, &message.content);
        self.messages_by_conversation
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message.id.clone());
        if let Some(session_id) = &message.session_id {
            self.messages_by_session
                .entry(session_id.clone())
                .or_default()
                .push(message.id.clone());
        }
        self.messages.insert(message.id.clone(), message);
        Ok(())
    }

    async fn messages_for_conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let ids = self
            .messages_by_conversation
            .get(conversation_id)
            .map(|v| v.clone())
            .unwrap_or_default();
        Ok(ids.iter().filter_map(|id| self.messages.get(id).map(|m| m.clone())).collect())
    }

    async fn messages_for_session(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        let ids = self
            .messages_by_session
            .get(session_id)
            .map(|v| v.clone())
            .unwrap_or_default();
        let mut msgs: Vec<Message> = ids.iter().filter_map(|id| self.messages.get(id).map(|m| m.clone())).collect();
        msgs.sort_by_key(|m| m.created_at_ms);
        if msgs.len() > limit {
            let start = msgs.len() - limit;
            msgs = msgs.split_off(start);
        }
        Ok(msgs)
    }

    async fn non_code_edit_message_count(&self, session_id: &str) -> Result<usize> {
        let ids = self
            .messages_by_session
            .get(session_id)
            .map(|v| v.clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.messages.get(id))
            .filter(|m| !m.is_code_edit)
            .count())
    }

    async fn put_session_memory(&self, memory: SessionMemory) -> Result<()> {
        self.memory_index.lock().unwrap().index(&memory.id, &memory.content);
        self.memories_by_session
            .entry(memory.session_id.clone())
            .or_default()
            .push(memory.id.clone());
        self.session_memories.insert(memory.id.clone(), memory);
        Ok(())
    }

    async fn session_memories(&self, session_id: &str) -> Result<Vec<SessionMemory>> {
        let ids = self
            .memories_by_session
            .get(session_id)
            .map(|v| v.clone())
            .unwrap_or_default();
        let mut mems: Vec<SessionMemory> = ids
            .iter()
            .filter_map(|id| self.session_memories.get(id).map(|m| m.clone()))
            .filter(|m| !m.is_expired())
            .collect();
        mems.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap()
                .then(b.created_at_ms.cmp(&a.created_at_ms))
        });
        Ok(mems)
    }

    async fn touch_recall(&self, memory_id: &str) -> Result<()> {
        if let Some(mut m) = self.session_memories.get_mut(memory_id) {
            m.touch_recall();
            Ok(())
        } else {
            Err(Error::Store(format!("memory {memory_id} not found")))
        }
    }

    async fn store_chain_of_thought(&self, steps: Vec<ChainOfThoughtStep>) -> Result<()> {
        if steps.is_empty() {
            return Ok(());
        }
        let message_id = steps[0].message_id.clone();
        if steps.iter().any(|s| s.message_id != message_id) {
            return Err(Error::Store("chain of thought steps must share one message_id".into()));
        }
        // All-or-nothing: build the full vec before inserting, so a
        // malformed batch above never partially lands in the map.
        self.chain_of_thought.insert(message_id, steps);
        Ok(())
    }

    async fn put_continuity(&self, continuity: SessionContinuity) -> Result<()> {
        self.continuity.insert(continuity.session_id.clone(), continuity);
        Ok(())
    }

    async fn continuity_for_session(&self, session_id: &str) -> Result<Option<SessionContinuity>> {
        Ok(self.continuity.get(session_id).map(|c| c.clone()))
    }

    async fn search(&self, target: SearchTarget, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let index = match target {
            SearchTarget::Messages => &self.message_index,
            SearchTarget::Memories => &self.memory_index,
        };
        Ok(index.lock().unwrap().search(query, top_k))
    }
}
