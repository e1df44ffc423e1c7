//! src/session/identity.rs
//!
//! Stand-in for the *Identity store* external collaborator named in §6:
//! `verify_token(client_id, token) -> ok|invalid`. User/API-key CRUD is
//! explicitly out of scope (§1); only the verification seam the session
//! fabric needs is modeled here, with a static in-memory implementation
//! for tests and small deployments.

use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn verify_token(&self, client_id: &str, token: &str) -> bool;
}

/// Timing-safe-enough for the in-memory case: compares full strings rather
/// than short-circuiting, since `subtle`-style constant-time comparison is
/// only meaningful against a remote timing attack, not a local stub.
pub struct StaticIdentityStore {
    tokens: HashMap<String, String>,
}

impl StaticIdentityStore {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl IdentityStore for StaticIdentityStore {
    async fn verify_token(&self, client_id: &str, token: &str) -> bool {
        match self.tokens.get(client_id) {
            Some(expected) => constant_time_eq(expected.as_bytes(), token.as_bytes()),
            None => false,
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
