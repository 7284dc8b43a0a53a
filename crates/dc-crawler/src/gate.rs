//! Bounded FIFO admission for emission tasks.
//!
//! The [`Gate`] admits at most `parallelism` tasks at a time. Submitted tasks
//! wait in a FIFO queue and are invoked strictly in submission order as slots
//! free up. A slot is held from the moment a task is invoked until the future
//! it returned settles, so a slow consumer holds its slot for as long as it
//! takes (backpressure, no timeout).
//!
//! # Examples
//!
//! ```
//! use std::num::NonZeroUsize;
//! use dc_crawler::Gate;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let gate = Gate::new(NonZeroUsize::MIN);
//! let done = gate.submit(|| async { Ok(()) });
//! assert!(done.await.is_ok());
//! assert_eq!(gate.running(), 0);
//! # }
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tracing::trace;

use crate::completion::{self, Completion, Outcome, Settler};

/// A deferred task: invoked once, on admission.
type PendingTask = Box<dyn FnOnce() -> BoxFuture<'static, Outcome> + Send>;

/// A queued task together with the settler of its submitter's completion.
struct Admission {
    task: PendingTask,
    settler: Settler,
}

struct GateState {
    parallelism: usize,
    running: usize,
    peak: usize,
    pending: VecDeque<Admission>,
}

/// FIFO admission queue bounding concurrently running tasks.
///
/// Cloning is cheap; clones share the same queue and counters. State changes
/// happen under a mutex, so the bound and the FIFO order hold on a
/// multi-threaded runtime too.
#[derive(Clone)]
pub struct Gate {
    state: Arc<Mutex<GateState>>,
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Gate")
            .field("parallelism", &state.parallelism)
            .field("running", &state.running)
            .field("pending", &state.pending.len())
            .finish_non_exhaustive()
    }
}

impl Gate {
    /// Creates a gate admitting at most `parallelism` tasks at once.
    #[must_use]
    pub fn new(parallelism: NonZeroUsize) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState {
                parallelism: parallelism.get(),
                running: 0,
                peak: 0,
                pending: VecDeque::new(),
            })),
        }
    }

    /// Queues a task and returns a completion mirroring the task's outcome.
    ///
    /// The task is invoked exactly once, when it reaches the head of the queue
    /// and a slot is free. If a slot is free right now it is invoked before
    /// this method returns.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F, Fut>(&self, task: F) -> Completion
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let (settler, completion) = completion::pair();
        let task: PendingTask = Box::new(move || Box::pin(task()));
        self.state.lock().pending.push_back(Admission { task, settler });
        self.pump();
        completion
    }

    /// Admits queued tasks while slots are free.
    fn pump(&self) {
        loop {
            let admission = {
                let mut state = self.state.lock();
                if state.running >= state.parallelism {
                    return;
                }
                let Some(admission) = state.pending.pop_front() else {
                    return;
                };
                state.running += 1;
                state.peak = state.peak.max(state.running);
                trace!(
                    running = state.running,
                    pending = state.pending.len(),
                    "Gate admitted task"
                );
                admission
            };
            self.start(admission);
        }
    }

    /// Invokes an admitted task and releases its slot once it settles.
    fn start(&self, admission: Admission) {
        let Admission { task, settler } = admission;
        let running = task();
        let gate = self.clone();
        tokio::spawn(async move {
            let outcome = running.await;
            settler.settle(outcome);
            gate.release();
        });
    }

    fn release(&self) {
        {
            let mut state = self.state.lock();
            state.running -= 1;
        }
        self.pump();
    }

    /// Returns the maximum number of concurrently running tasks.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.state.lock().parallelism
    }

    /// Returns the number of tasks currently running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.state.lock().running
    }

    /// Returns the number of tasks waiting for a slot.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns the highest number of tasks that ever ran at the same time.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.state.lock().peak
    }
}
