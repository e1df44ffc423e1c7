//! tests/integration/adversarial.rs
//!
//! E2E tests for how the session fabric behaves under misbehaving or
//! hostile clients: bad auth, rate limit floods, malformed envelopes, and
//! a slow reader that never drains its outbound queue.

use crate::common::harness::{self, NodeOptions, TestNode};
use cortex_mesh::session::envelope::{Envelope, EnvelopeType, Source};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use test_log::test;
use tokio_tungstenite::tungstenite::Message;

#[test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn bad_auth_token_is_rejected_and_session_is_closed() {
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        let node = TestNode::spawn("node-a", vec![], HashMap::from([("alice".to_string(), "correct".to_string())]))
            .await
            .unwrap();
        let mut ws = node.ws_client().await.unwrap();

        let welcome = harness::recv_envelope(&mut ws).await.unwrap();
        let session_id = welcome.source.session_id.clone();
        let register = Envelope::new(
            EnvelopeType::Register,
            Source { client_id: "alice".to_string(), session_id: session_id.clone() },
            json!({ "clientId": "alice", "authToken": "wrong" }),
        );
        harness::send_envelope(&mut ws, &register).await.unwrap();

        let reply = harness::recv_envelope(&mut ws).await.unwrap();
        assert_eq!(reply.envelope_type, EnvelopeType::Error);
        assert_eq!(reply.payload["errorCode"], "AUTHENTICATION_FAILED");

        use futures::StreamExt;
        let next = ws.next().await;
        match next {
            None => {}
            Some(Ok(Message::Close(_))) => {}
            other => panic!("expected the server to close the connection, got {other:?}"),
        }

        node.shutdown();
    })
    .await;
    assert!(result.is_ok(), "test timed out");
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn unauthenticated_message_is_rejected() {
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        let node = TestNode::spawn("node-a", vec![], HashMap::new()).await.unwrap();
        let mut ws = node.ws_client().await.unwrap();
        let welcome = harness::recv_envelope(&mut ws).await.unwrap();

        let msg = Envelope::new(
            EnvelopeType::Message,
            Source { client_id: String::new(), session_id: welcome.source.session_id.clone() },
            json!({ "content": "sneaky" }),
        );
        harness::send_envelope(&mut ws, &msg).await.unwrap();

        let reply = harness::recv_envelope(&mut ws).await.unwrap();
        assert_eq!(reply.payload["errorCode"], "AUTHENTICATION_REQUIRED");

        node.shutdown();
    })
    .await;
    assert!(result.is_ok(), "test timed out");
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn flooding_past_the_rate_limit_gets_throttled_without_disconnecting() {
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        let options = NodeOptions {
            rate_limit_points: 3,
            rate_limit_window_ms: 60_000,
            ..NodeOptions::default()
        };
        let node = TestNode::spawn_with_options(
            "node-a",
            vec![],
            HashMap::from([("alice".to_string(), "t".to_string())]),
            options,
        )
        .await
        .unwrap();
        let mut ws = node.ws_client().await.unwrap();
        let session_id = harness::register(&mut ws, "alice", "t").await.unwrap();

        // REGISTER itself doesn't consume a rate-limit point (it's exempt
        // pre-authentication), so all 3 points are still available.
        for _ in 0..3 {
            let hb = Envelope::new(
                EnvelopeType::Heartbeat,
                Source { client_id: "alice".to_string(), session_id: session_id.clone() },
                json!({}),
            );
            harness::send_envelope(&mut ws, &hb).await.unwrap();
            let ack = harness::recv_envelope(&mut ws).await.unwrap();
            assert_eq!(ack.envelope_type, EnvelopeType::HeartbeatAck);
        }

        let hb = Envelope::new(
            EnvelopeType::Heartbeat,
            Source { client_id: "alice".to_string(), session_id: session_id.clone() },
            json!({}),
        );
        harness::send_envelope(&mut ws, &hb).await.unwrap();
        let reply = harness::recv_envelope(&mut ws).await.unwrap();
        assert_eq!(reply.payload["errorCode"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(reply.payload["retryable"], true);

        // The session itself should still be usable: heartbeats keep
        // flowing once the window (effectively) resets via a fresh probe.
        node.shutdown();
    })
    .await;
    assert!(result.is_ok(), "test timed out");
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn malformed_json_frame_is_silently_discarded() {
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        let node = TestNode::spawn("node-a", vec![], HashMap::from([("alice".to_string(), "t".to_string())]))
            .await
            .unwrap();
        let mut ws = node.ws_client().await.unwrap();
        let _welcome = harness::recv_envelope(&mut ws).await.unwrap();

        use futures::SinkExt;
        ws.send(Message::Text("{not valid json".to_string())).await.unwrap();

        // Follow up with a well-formed REGISTER; it should still be
        // processed normally, proving the bad frame didn't wedge the
        // session or the read loop.
        let session_id = harness::register(&mut ws, "alice", "t").await.unwrap();
        assert!(!session_id.is_empty());

        node.shutdown();
    })
    .await;
    assert!(result.is_ok(), "test timed out");
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn slow_reader_gets_disconnected_for_backpressure() {
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        let options = NodeOptions {
            outbound_queue_depth: 2,
            rate_limit_points: 1_000_000,
            ..NodeOptions::default()
        };
        let node = TestNode::spawn_with_options(
            "node-a",
            vec![],
            HashMap::from([("alice".to_string(), "t".to_string()), ("flood".to_string(), "t".to_string())]),
            options,
        )
        .await
        .unwrap();

        // A slow client that registers but never reads again.
        let mut ws_slow = node.ws_client().await.unwrap();
        let slow_session = harness::register(&mut ws_slow, "alice", "t").await.unwrap();
        let _ = slow_session;

        // A second client floods large broadcasts at it, fast enough and
        // big enough to overrun both the outbound mpsc queue (depth 2) and
        // the OS socket send buffer, since the slow reader never drains.
        let mut ws_flood = node.ws_client().await.unwrap();
        let flood_session = harness::register(&mut ws_flood, "flood", "t").await.unwrap();
        let padding = "x".repeat(4096);

        use futures::StreamExt;
        let mut closed = false;
        for i in 0..20_000u32 {
            let msg = Envelope::new(
                EnvelopeType::Message,
                Source { client_id: "flood".to_string(), session_id: flood_session.clone() },
                json!({ "n": i, "padding": padding }),
            )
            .with_target(harness::broadcast_target());
            harness::send_envelope(&mut ws_flood, &msg).await.unwrap();

            if i % 200 == 0 {
                if let Ok(Some(Ok(msg))) = tokio::time::timeout(Duration::from_millis(1), ws_slow.next()).await {
                    if matches!(msg, Message::Close(_)) {
                        closed = true;
                        break;
                    }
                }
            }
        }
        if !closed {
            while let Ok(Some(Ok(msg))) = tokio::time::timeout(Duration::from_secs(2), ws_slow.next()).await {
                if matches!(msg, Message::Close(_)) {
                    closed = true;
                    break;
                }
            }
        }
        assert!(closed, "slow reader should eventually be disconnected for backpressure");

        node.shutdown();
    })
    .await;
    assert!(result.is_ok(), "test timed out");
}
