//! src/router/provider.rs
//!
//! Provider capability records and the streaming adapter trait every
//! concrete provider implements. Grounded on the teacher's `domain::Node`
//! style of plain, process-wide-readable records plus an `async_trait`
//! seam (the pack's `harborgrid-justin-rusty-db` crate uses the same
//! `async_trait` + `dashmap` combination for its storage engines).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Reasoning,
    Coding,
    Fast,
    Cheap,
    Local,
    Vision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    Low,
    Medium,
    High,
}

/// Process-wide, read-only after init capability record for one upstream
/// provider. `priority` breaks ties in the selection algorithm; iteration
/// (declaration) order breaks ties within equal priority.
#[derive(Debug, Clone)]
pub struct Provider {
    pub id: String,
    pub enabled: bool,
    pub capabilities: HashSet<Capability>,
    pub priority: i32,
    pub cost_tier: CostTier,
    pub default_model: String,
}

#[derive(Debug, Clone)]
pub enum StreamChunk {
    Content(String),
    Thinking(String),
    Metadata(serde_json::Value),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Thinking,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub extended_thinking: bool,
    pub budget_tokens: Option<u32>,
}

/// Classifies a provider failure so the router knows whether a fallback
/// attempt is permitted. Semantic failures (auth rejected, content policy)
/// must propagate to the client unchanged, never trigger a retry.
#[derive(Debug, Clone)]
pub enum ProviderFailure {
    Transient(String),
    Semantic(String),
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> &str;

    /// Normalizes roles/messages for this adapter's wire shape, then
    /// returns a lazy chunk stream. Implementations must guarantee the
    /// sequence terminates (clean end, error, or cancellation) and that at
    /// most one `Error` chunk appears, always last.
    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamChunk>, ProviderFailure>;
}
