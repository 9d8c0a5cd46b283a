//! Keyed delayed-job queue.
//!
//! Background work is a chain of discrete jobs: a job runs to completion and
//! may enqueue its own continuation before returning. [`TaskQueue::run_after`]
//! arms a timer; when it fires the job is sent to the single job worker,
//! which runs jobs one at a time.
//!
//! Each [`Job`] value is a key. Arming a key that already has a pending timer
//! aborts the earlier timer, so a key never has more than one pending
//! continuation no matter how many callers race to arm it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::models::DeviceId;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    /// One simulation tick for a device.
    GenerationTick(DeviceId),
    /// One liveness scan over all devices.
    LivenessScan,
}

pub type JobReceiver = mpsc::UnboundedReceiver<Job>;

struct PendingTimer {
    seq: u64,
    handle: AbortHandle,
}

#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<Mutex<HashMap<Job, PendingTimer>>>,
    next_seq: Arc<AtomicU64>,
}

impl TaskQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            tx,
            pending: Arc::default(),
            next_seq: Arc::default(),
        };
        (queue, rx)
    }

    /// Deliver `job` to the worker after `delay`, replacing any pending timer
    /// for the same job.
    pub fn run_after(&self, delay: Duration, job: Job) {
        // ---
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        // Held across the spawn so the timer cannot fire and clean up before
        // its own entry is registered.
        let mut pending = self.pending.lock();

        let tx = self.tx.clone();
        let registry = Arc::clone(&self.pending);
        let timer = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            {
                let mut registry = registry.lock();
                if registry.get(&job).is_some_and(|p| p.seq == seq) {
                    registry.remove(&job);
                }
            }
            if tx.send(job).is_err() {
                debug!(?job, "job worker gone, dropping job");
            }
        });

        let replaced = pending.insert(
            job,
            PendingTimer {
                seq,
                handle: timer.abort_handle(),
            },
        );
        if let Some(previous) = replaced {
            previous.handle.abort();
            trace!(?job, "replaced pending timer");
        }
    }

    /// Best-effort: abort the pending timer for `job`, if any.
    ///
    /// A job that already fired is not recalled; jobs must check their own
    /// preconditions when they run.
    pub fn cancel(&self, job: &Job) -> bool {
        match self.pending.lock().remove(job) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, job: &Job) -> bool {
        self.pending.lock().contains_key(job)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn delivers_after_delay() {
        // ---
        let (queue, mut rx) = TaskQueue::new();
        queue.run_after(Duration::from_secs(10), Job::LivenessScan);
        assert!(queue.is_pending(&Job::LivenessScan));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv().unwrap(), Job::LivenessScan);
        assert!(!queue.is_pending(&Job::LivenessScan));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_a_key_keeps_one_timer() {
        // ---
        let (queue, mut rx) = TaskQueue::new();
        let job = Job::GenerationTick(Uuid::new_v4());

        queue.run_after(Duration::from_secs(5), job);
        queue.run_after(Duration::from_secs(5), job);
        queue.run_after(Duration::from_secs(5), job);
        assert_eq!(queue.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rx.try_recv().unwrap(), job);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_delivery() {
        // ---
        let (queue, mut rx) = TaskQueue::new();
        let job = Job::GenerationTick(Uuid::new_v4());
        queue.run_after(Duration::from_secs(5), job);

        assert!(queue.cancel(&job));
        assert!(!queue.cancel(&job));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }
}
