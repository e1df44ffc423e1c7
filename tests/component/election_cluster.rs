//! tests/component/election_cluster.rs
//!
//! Wires real `GossipEngine` + `LeaderElector` pairs directly together on
//! loopback UDP, without any `App`/session-fabric layer, to exercise
//! multi-node leader convergence and re-election as the election layer
//! actually runs it: gossip-observed membership driving a dedicated timer
//! actor per node.

use cortex_mesh::config::GossipConfig;
use cortex_mesh::domain::NodeId;
use cortex_mesh::election::{LeaderElector, Role};
use cortex_mesh::gossip::GossipEngine;
use std::time::Duration;
use test_log::test;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

fn fast_config() -> GossipConfig {
    GossipConfig {
        port: 0,
        interval_ms: 40,
        probe_timeout_ms: 30,
        suspect_timeout_ms: 100,
        indirect_nodes: 2,
        sync_every_ticks: 1,
        sync_max_entries: 50,
        gossip_factor: 3,
        gossip_factor_on_leave: 3,
    }
}

struct ClusterNode {
    id: NodeId,
    state_rx: watch::Receiver<cortex_mesh::election::ElectionState>,
    shutdown: CancellationToken,
    gossip_task: tokio::task::JoinHandle<()>,
    elector_task: tokio::task::JoinHandle<()>,
}

/// Spawns `count` gossip engines + electors, each seeded with every other
/// node's address, and returns them already running.
async fn spawn_cluster(count: usize) -> Vec<ClusterNode> {
    let mut engines = Vec::new();
    for i in 0..count {
        let id = NodeId::new(format!("n{i}"));
        let (engine, handle) =
            GossipEngine::new(id.clone(), "127.0.0.1:0".parse().unwrap(), fast_config()).unwrap();
        let addr = engine.local_addr().unwrap();
        engines.push((id, engine, handle, addr));
    }

    // Cross-seed every pair before starting, so convergence doesn't depend
    // on join-request ordering.
    for i in 0..engines.len() {
        for j in 0..engines.len() {
            if i == j {
                continue;
            }
            let (other_id, _, _, other_addr) = &engines[j];
            let (_, _, handle_i, _) = &engines[i];
            handle_i.roster.insert_seed(other_id.clone(), *other_addr).await;
        }
    }

    let mut nodes = Vec::new();
    for (id, engine, handle, _addr) in engines {
        let shutdown = CancellationToken::new();
        let (elector, state_rx) = LeaderElector::new(id.clone(), handle);
        let gossip_task = tokio::spawn(engine.run(shutdown.clone()));
        let elector_task = tokio::spawn(elector.run(shutdown.clone()));
        nodes.push(ClusterNode {
            id,
            state_rx,
            shutdown,
            gossip_task,
            elector_task,
        });
    }
    nodes
}

fn current_leader(nodes: &[ClusterNode]) -> Vec<NodeId> {
    nodes
        .iter()
        .filter(|n| n.state_rx.borrow().role == Role::Leader)
        .map(|n| n.id.clone())
        .collect()
}

async fn wait_for_single_leader(nodes: &[ClusterNode], timeout: Duration) -> Option<NodeId> {
    tokio::time::timeout(timeout, async {
        loop {
            let leaders = current_leader(nodes);
            if leaders.len() == 1 {
                return leaders.into_iter().next().unwrap();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .ok()
}

async fn shutdown_cluster(nodes: Vec<ClusterNode>) {
    for n in &nodes {
        n.shutdown.cancel();
    }
    for n in nodes {
        let _ = n.gossip_task.await;
        let _ = n.elector_task.await;
    }
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn cluster_of_four_converges_on_a_single_leader() {
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        let nodes = spawn_cluster(4).await;
        let leader = wait_for_single_leader(&nodes, Duration::from_secs(5))
            .await
            .expect("a cluster of real nodes should converge on one leader");

        // Give the losers a couple more ticks to confirm they stay followers
        // rather than also self-promoting.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(current_leader(&nodes), vec![leader]);

        shutdown_cluster(nodes).await;
    })
    .await;
    assert!(result.is_ok(), "test timed out");
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn cancelling_the_leaders_tasks_triggers_reelection_among_survivors() {
    let result = tokio::time::timeout(Duration::from_secs(15), async {
        let mut nodes = spawn_cluster(3).await;
        let first_leader = wait_for_single_leader(&nodes, Duration::from_secs(5))
            .await
            .expect("cluster should elect an initial leader");

        let dead_index = nodes.iter().position(|n| n.id == first_leader).unwrap();
        let dead = nodes.remove(dead_index);
        dead.shutdown.cancel();
        let _ = dead.gossip_task.await;
        let _ = dead.elector_task.await;

        let new_leader = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let leaders = current_leader(&nodes);
                if leaders.len() == 1 && leaders[0] != first_leader {
                    return leaders.into_iter().next().unwrap();
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("survivors should re-elect a new leader after the old one disappears");

        assert_ne!(new_leader, first_leader);

        shutdown_cluster(nodes).await;
    })
    .await;
    assert!(result.is_ok(), "test timed out");
}
