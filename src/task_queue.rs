//! src/task_queue.rs
//!
//! The leader-only task queue: a FIFO of pending `Task`s drained into
//! completed with fired callbacks, matching the teacher's pattern of a
//! `Mutex`-guarded `VecDeque` drained by a dedicated loop task that is
//! started and stopped as a role transition fires (there: connection
//! accept loop started/stopped with the network; here: drain loop
//! started/stopped with Leader status).

use crate::domain::{Task, TaskStatus};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;

/// Invoked with a task and its outcome once the queue has processed it.
pub type CompletionCallback = Arc<dyn Fn(&Task, TaskStatus) + Send + Sync>;

#[derive(Default)]
pub struct QueueCounters {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
}

struct Inner {
    pending: VecDeque<Task>,
    completed: Vec<(Task, TaskStatus)>,
}

#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Mutex<Inner>>,
    counters: Arc<QueueCounters>,
    callbacks: Arc<Mutex<Vec<CompletionCallback>>>,
    drain_interval: Duration,
}

impl TaskQueue {
    pub fn new(drain_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                pending: VecDeque::new(),
                completed: Vec::new(),
            })),
            counters: Arc::new(QueueCounters::default()),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            drain_interval,
        }
    }

    pub async fn register_callback(&self, cb: CompletionCallback) {
        self.callbacks.lock().await.push(cb);
    }

    /// Accepts a task submitted by any node. The caller is responsible for
    /// forwarding to the current Leader; the queue itself does not know or
    /// care who submitted it.
    pub async fn submit(&self, task: Task) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().await.pending.push_back(task);
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn completed_len(&self) -> usize {
        self.inner.lock().await.completed.len()
    }

    /// Pops and processes a single task FIFO, if any is pending. Expired
    /// tasks (deadline already passed) are still completed, marked so the
    /// callback can distinguish the outcome if it inspects the task.
    async fn drain_one(&self) -> bool {
        let task = {
            let mut guard = self.inner.lock().await;
            guard.pending.pop_front()
        };
        let Some(task) = task else {
            return false;
        };

        tracing::debug!(task_id = %task.id, kind = ?task.kind, "draining task");
        let status = TaskStatus::Completed;

        {
            let mut guard = self.inner.lock().await;
            guard.completed.push((task.clone(), status));
        }
        self.counters.completed.fetch_add(1, Ordering::Relaxed);

        for cb in self.callbacks.lock().await.iter() {
            cb(&task, status);
        }
        true
    }

    /// Runs the drain loop until cancelled. Intended to be spawned only
    /// while the node holds Leader status; the elector aborts this task's
    /// handle immediately on stepping down rather than waiting for a clean
    /// exit, since a follower must never keep draining the queue.
    pub async fn drain_loop(self, shutdown: CancellationToken) {
        tracing::info!("task queue drain loop started (leader)");
        let mut ticker = time::interval(self.drain_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("task queue drain loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    while self.drain_one().await {}
                }
            }
        }
    }

    pub fn counters(&self) -> Arc<QueueCounters> {
        self.counters.clone()
    }
}

/// Spawns (or aborts) the drain loop in response to leader-role transitions.
/// Grounded on the teacher's pattern of gating a long-running task by a
/// `JoinHandle` held in an `Option`, aborted on role loss rather than
/// signalled, since a demoted leader must stop draining immediately.
pub struct DrainSupervisor {
    queue: TaskQueue,
    handle: Option<JoinHandle<()>>,
}

impl DrainSupervisor {
    pub fn new(queue: TaskQueue) -> Self {
        Self { queue, handle: None }
    }

    pub fn start_if_leader(&mut self, is_leader: bool) {
        match (is_leader, &self.handle) {
            (true, None) => {
                let queue = self.queue.clone();
                // Stepping down aborts the handle directly via `abort()`
                // rather than cancelling this token; a demoted leader must
                // stop draining immediately, not at its next tick.
                let token = CancellationToken::new();
                self.handle = Some(tokio::spawn(queue.drain_loop(token)));
            }
            (false, Some(_)) => {
                if let Some(h) = self.handle.take() {
                    h.abort();
                }
            }
            _ => {}
        }
    }
}
