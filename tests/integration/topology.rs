//! tests/integration/topology.rs
//!
//! E2E tests for membership and leadership across a small cluster: that a
//! 3-node cluster converges on exactly one leader, and that killing the
//! leader triggers re-election among the survivors.

use crate::common::harness::{self, TestNode};
use std::collections::HashMap;
use std::time::Duration;
use test_log::test;

fn leader_count(nodes: &[serde_json::Value]) -> usize {
    nodes.iter().filter(|n| n["isLeader"].as_bool().unwrap_or(false)).count()
}

fn leader_id(nodes: &[serde_json::Value]) -> Option<String> {
    nodes
        .iter()
        .find(|n| n["isLeader"].as_bool().unwrap_or(false))
        .and_then(|n| n["id"].as_str())
        .map(str::to_string)
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn three_node_cluster_converges_on_one_leader() {
    let test_timeout = Duration::from_secs(15);
    let result = tokio::time::timeout(test_timeout, async {
        let node_a = TestNode::spawn("node-a", vec![], HashMap::from([("alice".to_string(), "t".to_string())]))
            .await
            .unwrap();
        let node_b = TestNode::spawn("node-b", vec![node_a.gossip_addr], HashMap::new()).await.unwrap();
        let node_c = TestNode::spawn("node-c", vec![node_a.gossip_addr], HashMap::new()).await.unwrap();

        let mut ws = node_a.ws_client().await.unwrap();
        let session_id = harness::register(&mut ws, "alice", "t").await.unwrap();

        let nodes = harness::wait_for_node_count(
            &mut ws,
            "alice",
            &session_id,
            |nodes| nodes.len() >= 3 && leader_count(nodes) == 1,
            Duration::from_secs(10),
        )
        .await
        .expect("cluster should converge on exactly one leader");

        assert_eq!(leader_count(&nodes), 1);

        node_a.shutdown();
        node_b.shutdown();
        node_c.shutdown();
    })
    .await;
    assert!(result.is_ok(), "test timed out");
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn killing_the_leader_triggers_reelection() {
    let test_timeout = Duration::from_secs(25);
    let result = tokio::time::timeout(test_timeout, async {
        let node_a = TestNode::spawn("node-a", vec![], HashMap::from([("alice".to_string(), "t".to_string())]))
            .await
            .unwrap();
        let node_b = TestNode::spawn("node-b", vec![node_a.gossip_addr], HashMap::from([("bob".to_string(), "t".to_string())]))
            .await
            .unwrap();
        let node_c = TestNode::spawn("node-c", vec![node_a.gossip_addr], HashMap::new()).await.unwrap();

        let mut ws_a = node_a.ws_client().await.unwrap();
        let session_a = harness::register(&mut ws_a, "alice", "t").await.unwrap();

        let initial_nodes = harness::wait_for_node_count(
            &mut ws_a,
            "alice",
            &session_a,
            |nodes| nodes.len() >= 3 && leader_count(nodes) == 1,
            Duration::from_secs(10),
        )
        .await
        .expect("cluster should converge on a leader before the kill");
        let first_leader = leader_id(&initial_nodes).expect("a leader must be present");

        // Kill whichever node currently holds leadership; observe from
        // whichever other node is still standing.
        let (surviving_node, surviving_client, surviving_token, surviving_dead) = if first_leader == "node-a" {
            (&node_b, "bob", "t", &node_a)
        } else if first_leader == "node-b" {
            (&node_a, "alice", "t", &node_b)
        } else {
            (&node_a, "alice", "t", &node_c)
        };
        surviving_dead.shutdown();

        let mut ws_survivor = surviving_node.ws_client().await.unwrap();
        let survivor_session = harness::register(&mut ws_survivor, surviving_client, surviving_token).await.unwrap();

        let healed_nodes = harness::wait_for_node_count(
            &mut ws_survivor,
            surviving_client,
            &survivor_session,
            |nodes| {
                let alive: Vec<&serde_json::Value> = nodes
                    .iter()
                    .filter(|n| n["state"].as_str() == Some("Alive"))
                    .collect();
                leader_count(nodes) == 1
                    && alive
                        .iter()
                        .any(|n| n["isLeader"].as_bool().unwrap_or(false) && n["id"].as_str() != Some(first_leader.as_str()))
            },
            Duration::from_secs(15),
        )
        .await
        .expect("cluster should re-elect a new leader after the old one dies");

        let new_leader = leader_id(&healed_nodes).expect("a new leader must be present");
        assert_ne!(new_leader, first_leader, "leadership should have moved off the dead node");

        node_a.shutdown();
        node_b.shutdown();
        node_c.shutdown();
    })
    .await;
    assert!(result.is_ok(), "test timed out");
}
