//! Two-priority concurrency pool (C3): dispatches asynchronous tasks with a
//! `small`-before-`large` queue discipline and a dynamically adjustable
//! parallelism limit.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

/// A deferred unit of work: an asynchronous producer of `()`.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Point-in-time introspection of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Tasks currently running.
    pub running: usize,
    /// Tasks waiting in the `small` queue.
    pub small_q: usize,
    /// Tasks waiting in the `large` queue.
    pub large_q: usize,
    /// Current parallelism limit.
    pub limit: usize,
}

struct PoolState {
    limit: usize,
    running: usize,
    small: VecDeque<Task>,
    large: VecDeque<Task>,
    pumping: bool,
}

/// Executes asynchronous tasks with a two-level FIFO queue (`small` strictly
/// precedes `large` for *dispatch*, never preempting a running task) and a
/// parallelism limit that can be raised or lowered mid-batch.
///
/// Cloning a `PriorityPool` shares the same underlying queues — it is a
/// cheap handle, the way the teacher's engine types are passed around as
/// `Arc`-backed handles rather than copied state.
#[derive(Clone)]
pub struct PriorityPool {
    state: Arc<Mutex<PoolState>>,
}

impl PriorityPool {
    /// Creates a pool with the given initial parallelism limit.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        assert!(limit >= 1, "pool limit must be >= 1");
        Self {
            state: Arc::new(Mutex::new(PoolState {
                limit,
                running: 0,
                small: VecDeque::new(),
                large: VecDeque::new(),
                pumping: false,
            })),
        }
    }

    /// Enqueues `task`, tagged `small` or `large`, and dispatches if
    /// headroom is immediately available.
    #[instrument(skip(self, task), fields(small))]
    pub async fn push<F>(&self, task: F, small: bool)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let boxed: Task = Box::pin(task);
        {
            let mut state = self.state.lock().await;
            if small {
                state.small.push_back(boxed);
            } else {
                state.large.push_back(boxed);
            }
        }
        self.pump().await;
    }

    /// Updates the parallelism limit. Lowering it never cancels running
    /// tasks — it only suppresses new starts until `running < limit` again.
    /// Raising it dispatches immediately to fill the new headroom.
    #[instrument(skip(self))]
    pub async fn set_limit(&self, n: usize) {
        assert!(n >= 1, "pool limit must be >= 1");
        {
            let mut state = self.state.lock().await;
            state.limit = n;
        }
        self.pump().await;
    }

    /// Resolves once both queues are empty and no task is running.
    ///
    /// Polling-based, per spec: there is no requirement for edge-triggered
    /// wake-ups.
    pub async fn idle(&self) {
        loop {
            let quiescent = {
                let state = self.state.lock().await;
                state.running == 0 && state.small.is_empty() && state.large.is_empty()
            };
            if quiescent {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Point-in-time snapshot for introspection/testing.
    pub async fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock().await;
        PoolSnapshot {
            running: state.running,
            small_q: state.small.len(),
            large_q: state.large.len(),
            limit: state.limit,
        }
    }

    /// The dispatch pump. Re-entrancy safe: a `pumping` sentinel ensures
    /// only one call actually drains the queues at a time — a task
    /// completion that calls `pump` while `push`'s own call is already
    /// draining just flips a flag and returns, trusting the in-progress
    /// pump to observe the updated state on its next loop iteration.
    #[instrument(skip(self))]
    async fn pump(&self) {
        let mut to_spawn: Vec<Task> = Vec::new();
        {
            let mut state = self.state.lock().await;
            if state.pumping {
                return;
            }
            state.pumping = true;
            loop {
                if state.running >= state.limit {
                    break;
                }
                let next = if !state.small.is_empty() {
                    state.small.pop_front()
                } else if !state.large.is_empty() {
                    state.large.pop_front()
                } else {
                    None
                };
                match next {
                    Some(task) => {
                        state.running += 1;
                        to_spawn.push(task);
                    }
                    None => break,
                }
            }
            state.pumping = false;
        }

        for task in to_spawn {
            let state = self.state.clone();
            let pool = self.clone();
            let handle: JoinHandle<()> = tokio::spawn(async move {
                task.await;
                {
                    let mut state = state.lock().await;
                    state.running -= 1;
                }
                // Re-invoke the pump on completion so a freed slot is
                // immediately offered to whatever is still queued.
                pool.pump().await;
            });
            drop(handle);
        }
    }

    /// Current parallelism limit.
    pub async fn limit(&self) -> usize {
        self.state.lock().await.limit
    }
}

impl std::fmt::Debug for PriorityPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityPool").finish_non_exhaustive()
    }
}
