//! src/session/heartbeat.rs
//!
//! Periodic sweep closing sessions whose last-activity age exceeds the
//! configured timeout, independent of whatever envelope traffic a session
//! happens to produce. Mirrors the teacher's standalone periodic-tick
//! pattern (`time::interval` driven loop under a `CancellationToken`) used
//! throughout the mesh monitor.

use crate::session::fabric::FabricHandle;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;

pub struct HeartbeatMonitor {
    fabric: FabricHandle,
    interval_ms: u64,
    timeout_ms: u64,
}

impl HeartbeatMonitor {
    pub fn new(fabric: FabricHandle, interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            fabric,
            interval_ms,
            timeout_ms,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!("heartbeat monitor started");
        let mut ticker = time::interval(Duration::from_millis(self.interval_ms));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("heartbeat monitor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let closed = self.fabric.close_stale_sessions(self.timeout_ms).await;
                    if closed > 0 {
                        tracing::info!(closed, "closed stale sessions");
                    }
                }
            }
        }
    }
}
