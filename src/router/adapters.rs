//! src/router/adapters.rs
//!
//! Concrete `ProviderAdapter` implementations. `StubAdapter` is the fixed
//! test seam named in the external scenarios (returns canned text and
//! token counts 25/12/37); the two "like" adapters wrap it with the
//! role-normalization rules real upstream providers require, since no
//! actual HTTP client is in scope for this core (providers are external
//! collaborators per §1).

use crate::router::provider::{
    ChatMessage, CompletionRequest, ProviderAdapter, ProviderFailure, Role, StreamChunk,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A canned provider used by the integration test scenarios. Can be told
/// to fail once (simulating a 500) via `fail_next`, to exercise fallback.
pub struct StubAdapter {
    id: String,
    fail_next: Arc<AtomicBool>,
}

impl StubAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fail_next: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Arms a one-shot transient failure on the next `stream` call.
    pub fn fail_next_call(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderAdapter for StubAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderFailure> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ProviderFailure::Transient(format!("{} returned 500", self.id)));
        }

        let (tx, rx) = mpsc::channel(8);
        let model = request.model.clone();
        let extended_thinking = request.extended_thinking;
        tokio::spawn(async move {
            if extended_thinking {
                let _ = tx.send(StreamChunk::Thinking("considering the request".into())).await;
            }
            let _ = tx.send(StreamChunk::Content("stub response content".into())).await;
            let _ = tx
                .send(StreamChunk::Metadata(serde_json::json!({
                    "model": model,
                    "usage": {
                        "inputTokens": 25,
                        "outputTokens": 12,
                        "totalTokens": 37,
                    }
                })))
                .await;
        });
        Ok(rx)
    }
}

/// Normalizes roles the way Anthropic-family APIs require: `system` is
/// pulled out of the message array entirely (callers must read it back via
/// `split_system`), and the assistant role keeps its name.
pub struct AnthropicLikeAdapter {
    inner: StubAdapter,
}

impl AnthropicLikeAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            inner: StubAdapter::new(id),
        }
    }

    pub fn stub(&self) -> &StubAdapter {
        &self.inner
    }

    pub fn normalize(messages: &[ChatMessage]) -> (Option<String>, Vec<ChatMessage>) {
        let mut system = None;
        let mut rest = Vec::with_capacity(messages.len());
        for m in messages {
            match m.role {
                Role::System => system = Some(m.content.clone()),
                _ => rest.push(m.clone()),
            }
        }
        (system, rest)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicLikeAdapter {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn stream(
        &self,
        mut request: CompletionRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderFailure> {
        let (_, rest) = Self::normalize(&request.messages);
        request.messages = rest;
        self.inner.stream(request).await
    }
}

/// Normalizes roles the way OpenAI-family APIs require: `system` stays in
/// the message array, but the assistant role is renamed `model`-style
/// providers would otherwise require translating on the way back out. Here
/// it is kept in-array since OpenAI itself accepts `system` inline; this
/// adapter exists to demonstrate the one-normalization-point design even
/// though its transform is the identity for this particular shape.
pub struct OpenAiLikeAdapter {
    inner: StubAdapter,
}

impl OpenAiLikeAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            inner: StubAdapter::new(id),
        }
    }

    pub fn stub(&self) -> &StubAdapter {
        &self.inner
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiLikeAdapter {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderFailure> {
        self.inner.stream(request).await
    }
}
