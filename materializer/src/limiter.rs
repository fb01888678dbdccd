use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds the number of jobs running at the same time.
///
/// Jobs are submitted into a FIFO queue, and handed out together with a
/// permit by [ConcurrencyLimiter::next_ready] while fewer than `limit`
/// permits are held. A job holds its permit until it is done, dropping it
/// frees the slot for the next queued job.
pub struct ConcurrencyLimiter<T> {
    semaphore: Arc<Semaphore>,
    limit: usize,
    queue: VecDeque<T>,
}

impl<T> ConcurrencyLimiter<T> {
    /// Creates a limiter running at most `limit` jobs concurrently.
    /// A limit of 0 is treated as 1.
    pub fn new(limit: usize) -> Self {
        let limit = limit.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            queue: VecDeque::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Enqueues a job. It runs once all jobs submitted before it got a slot.
    pub fn submit(&mut self, job: T) {
        self.queue.push_back(job);
    }

    /// Returns the next queued job, if there's a free slot for it.
    pub fn next_ready(&mut self) -> Option<(T, OwnedSemaphorePermit)> {
        if self.queue.is_empty() {
            return None;
        }

        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        self.queue.pop_front().map(|job| (job, permit))
    }

    /// Number of jobs waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Number of slots currently held.
    pub fn in_flight(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// Drops all queued jobs and stops handing out new permits.
    /// Returns the number of dropped jobs.
    pub fn cancel(&mut self) -> usize {
        self.semaphore.close();
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }
}
