//! Bounded per-VM fan-out
//!
//! Every fleet operation (create, action, delete, remote execution) spawns
//! one task per target VM. Tasks run on a [`JoinSet`] with at most
//! `max_parallelism` executing at once, and each writes its output into its
//! own indexed slot, so no coordination between siblings is needed.
//!
//! The join point carries the overall operation deadline. When it expires,
//! unfinished tasks are detached rather than aborted: they keep running
//! and persist their own result later, while the caller sees an empty slot
//! for each of them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// A set of indexed tasks sharing one parallelism limit
pub struct FanOut<T> {
    semaphore: Arc<Semaphore>,
    set: JoinSet<(usize, T)>,
    slots: usize,
}

impl<T: Send + 'static> FanOut<T> {
    /// Create a fan-out running at most `max_parallelism` tasks at once
    pub fn new(max_parallelism: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_parallelism.max(1))),
            set: JoinSet::new(),
            slots: 0,
        }
    }

    /// Spawn a task and return the slot its output lands in.
    ///
    /// The task is scheduled immediately but only starts executing once a
    /// permit is free.
    pub fn spawn<F>(&mut self, task: F) -> usize
    where
        F: Future<Output = T> + Send + 'static,
    {
        let index = self.slots;
        self.slots += 1;

        let semaphore = Arc::clone(&self.semaphore);
        self.set.spawn(async move {
            // Hold the permit until the task finishes; the semaphore is never closed
            let _permit = semaphore.acquire_owned().await.ok();
            (index, task.await)
        });
        index
    }

    /// Number of spawned tasks
    pub fn len(&self) -> usize {
        self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots == 0
    }

    /// Wait for every task or until `deadline` elapses.
    ///
    /// Returns one slot per spawned task, in spawn order. A slot is `None`
    /// when its task had not finished by the deadline or panicked.
    pub async fn join(self, deadline: Duration) -> Vec<Option<T>> {
        let FanOut { mut set, slots, .. } = self;
        let mut results: Vec<Option<T>> = (0..slots).map(|_| None).collect();

        let finished = tokio::time::timeout(deadline, async {
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((index, output)) => results[index] = Some(output),
                    Err(e) => tracing::error!("Fan-out task failed: {}", e),
                }
            }
        })
        .await;

        if finished.is_err() {
            tracing::warn!(
                pending = set.len(),
                "Operation deadline of {:?} expired, abandoning unfinished tasks",
                deadline
            );
            set.detach_all();
        }

        results
    }
}
