//! src/memory/model.rs
//!
//! Conceptual row shapes the memory service persists, matching the table
//! list in §4.6. Kept as plain serde-able structs (no ORM) per the
//! teacher's direct-struct style, mirrored from `domain::Node`/`Task`.

use crate::domain::now_ms;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Thinking,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub session_id: Option<String>,
    pub role: MessageRole,
    pub content: String,
    pub thinking_content: Option<String>,
    pub is_code_edit: bool,
    pub tokens_used: Option<u32>,
    pub latency_ms: Option<u64>,
    pub created_at_ms: u64,
}

impl Message {
    pub fn new(conversation_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            session_id: None,
            role,
            content: content.into(),
            thinking_content: None,
            is_code_edit: false,
            tokens_used: None,
            latency_ms: None,
            created_at_ms: now_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub session_id: Option<String>,
    pub user_id: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub created_at_ms: u64,
}

impl Conversation {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: None,
            user_id: user_id.into(),
            provider: None,
            model: None,
            system_prompt: None,
            created_at_ms: now_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryCategory {
    Fact,
    Preference,
    Context,
    Instruction,
    Summary,
    CodeContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMemory {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub category: MemoryCategory,
    pub content: String,
    pub importance: f32,
    pub recall_count: u32,
    pub last_recalled_at_ms: Option<u64>,
    pub expires_at_ms: Option<u64>,
    pub created_at_ms: u64,
}

impl SessionMemory {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>, category: MemoryCategory, content: impl Into<String>, importance: f32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            category,
            content: content.into(),
            importance: importance.clamp(0.0, 1.0),
            recall_count: 0,
            last_recalled_at_ms: None,
            expires_at_ms: None,
            created_at_ms: now_ms(),
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.expires_at_ms, Some(t) if now_ms() > t)
    }

    pub fn touch_recall(&mut self) {
        self.recall_count += 1;
        self.last_recalled_at_ms = Some(now_ms());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThoughtType {
    Observation,
    Hypothesis,
    Decision,
    Action,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainOfThoughtStep {
    pub id: String,
    pub message_id: String,
    pub step_number: u32,
    pub thought_type: ThoughtType,
    pub content: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContinuity {
    pub session_id: String,
    pub last_message_id: String,
    pub context_summary: String,
    pub resume_prompt: String,
}
