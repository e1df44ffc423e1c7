//! tests/component/memory_service.rs
//!
//! Component-level coverage for `MemoryService` wired to a real
//! `InMemoryStore`, exercising scenarios that cross the hot cache and cold
//! store together rather than either in isolation: continuity round-trips
//! through resume, the message-count cap's warn-not-reject behavior, and
//! session isolation across both layers at once.

use cortex_mesh::memory::model::{Message, MessageRole, SessionMemory};
use cortex_mesh::memory::model::MemoryCategory;
use cortex_mesh::memory::store::InMemoryStore;
use cortex_mesh::memory::MemoryService;
use std::sync::Arc;
use test_log::test;

fn service_with_caps(hot_cache_cap: usize, max_messages: usize) -> MemoryService {
    MemoryService::new(Arc::new(InMemoryStore::new()), hot_cache_cap, max_messages)
}

#[test(tokio::test)]
async fn resume_after_continuity_returns_both_messages_and_continuity() {
    let service = service_with_caps(100, 100);

    let mut msg = Message::new("conv-1", MessageRole::User, "where were we");
    msg.session_id = Some("s1".to_string());
    let msg_id = msg.id.clone();
    service.append_message(msg).await.unwrap();

    service
        .put_continuity("s1", &msg_id, "discussing the memory service", "let's pick back up on resume semantics")
        .await
        .unwrap();

    let resumed = service.resume_session("s1").await.unwrap();
    assert_eq!(resumed.messages.len(), 1);
    let continuity = resumed.continuity.expect("continuity should round-trip through resume");
    assert_eq!(continuity.last_message_id, msg_id);
    assert_eq!(continuity.context_summary, "discussing the memory service");
}

#[test(tokio::test)]
async fn resume_rehydrates_hot_cache_from_cold_store_after_it_was_cleared() {
    let service = service_with_caps(100, 100);
    service
        .store_memory(SessionMemory::new("s1", "u1", MemoryCategory::Fact, "likes terse prose", 0.6))
        .await
        .unwrap();
    service
        .store_memory(SessionMemory::new("s1", "u1", MemoryCategory::Preference, "prefers rust", 0.9))
        .await
        .unwrap();
    assert_eq!(service.hot_cache_size("s1"), 2);

    // resume_session clears the hot cache and rebuilds it from the cold
    // store, so this should come back at the same size even though nothing
    // in the hot cache itself survived the clear.
    let resumed = service.resume_session("s1").await.unwrap();
    assert_eq!(resumed.hot_cache_size, 2);
    assert_eq!(service.hot_cache_size("s1"), 2);
}

#[test(tokio::test)]
async fn message_count_cap_is_advisory_not_rejecting() {
    let service = service_with_caps(100, 2);

    for i in 0..5 {
        let mut msg = Message::new("conv-1", MessageRole::User, format!("message {i}"));
        msg.session_id = Some("s1".to_string());
        service.append_message(msg).await.expect("appends past the cap still succeed");
    }

    let resumed = service.resume_session("s1").await.unwrap();
    assert_eq!(resumed.messages.len(), 5, "the cap only warns, it never drops or rejects writes");
}

#[test(tokio::test)]
async fn code_edit_messages_are_excluded_from_the_cap_count() {
    let service = service_with_caps(100, 1);

    let mut edit = Message::new("conv-1", MessageRole::Assistant, "applied a patch");
    edit.session_id = Some("s1".to_string());
    edit.is_code_edit = true;
    service.append_message(edit).await.unwrap();

    let mut edit2 = Message::new("conv-1", MessageRole::Assistant, "applied another patch");
    edit2.session_id = Some("s1".to_string());
    edit2.is_code_edit = true;
    service.append_message(edit2).await.unwrap();

    let resumed = service.resume_session("s1").await.unwrap();
    assert_eq!(resumed.messages.len(), 2);
}

#[test(tokio::test)]
async fn sessions_stay_isolated_across_hot_cache_and_cold_store_together() {
    let service = service_with_caps(100, 100);

    let mut msg_a = Message::new("conv-a", MessageRole::User, "hello from a");
    msg_a.session_id = Some("session-a".to_string());
    service.append_message(msg_a).await.unwrap();
    service
        .store_memory(SessionMemory::new("session-a", "user-a", MemoryCategory::Fact, "fact about a", 0.5))
        .await
        .unwrap();

    let mut msg_b = Message::new("conv-b", MessageRole::User, "hello from b");
    msg_b.session_id = Some("session-b".to_string());
    service.append_message(msg_b).await.unwrap();

    let resumed_a = service.resume_session("session-a").await.unwrap();
    let resumed_b = service.resume_session("session-b").await.unwrap();

    assert_eq!(resumed_a.messages.len(), 1);
    assert_eq!(resumed_a.hot_cache_size, 1);
    assert_eq!(resumed_b.messages.len(), 1);
    assert_eq!(resumed_b.hot_cache_size, 0);
    assert_eq!(service.hot_cache_size("session-a"), 1);
    assert_eq!(service.hot_cache_size("session-b"), 0);
}

#[test(tokio::test)]
async fn hot_cache_eviction_does_not_lose_data_from_the_cold_store() {
    // Cap of 1 forces every second insert to evict from the hot cache, but
    // resume_session should still recover every memory from cold storage.
    let service = service_with_caps(1, 100);

    service
        .store_memory(SessionMemory::new("s1", "u1", MemoryCategory::Fact, "first fact", 0.4))
        .await
        .unwrap();
    let evicted = service
        .store_memory(SessionMemory::new("s1", "u1", MemoryCategory::Fact, "second fact", 0.7))
        .await
        .unwrap();
    assert!(evicted.is_some(), "inserting a second memory over a cap of 1 should evict the first");
    assert_eq!(service.hot_cache_size("s1"), 1);

    let resumed = service.resume_session("s1").await.unwrap();
    assert_eq!(resumed.hot_cache_size, 1, "rehydration re-applies the same cap, so only the cap's worth survives in cache");
}
