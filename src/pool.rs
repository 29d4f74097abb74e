//! # Worker Pool
//!
//! Bounds the number of heavy subprocess operations (download, extraction,
//! transcription tiers) running at the same time. Jobs that cannot get a slot
//! wait in FIFO order instead of spawning more processes.
//!
//! ## Key Rust Concepts Used:
//! - **Semaphore**: `tokio::sync::Semaphore` hands out a fixed number of permits
//! - **RAII**: a [`WorkerSlot`] owns its permit; dropping the slot returns it,
//!   exactly once, whatever path the job took

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// One occupied worker slot.
#[derive(Debug)]
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("no worker slot became free before the deadline")]
    Deadline,

    #[error("worker pool is closed")]
    Closed,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held by any job.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a slot, giving up at `until`. Time spent queueing is part of
    /// the caller's budget.
    pub async fn acquire(&self, until: Instant) -> Result<WorkerSlot, PoolError> {
        let permit = tokio::time::timeout_at(until, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| PoolError::Deadline)?
            .map_err(|_| PoolError::Closed)?;
        Ok(WorkerSlot { _permit: permit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_slots_are_returned_on_drop() {
        let pool = WorkerPool::new(2);
        let far = Instant::now() + Duration::from_secs(5);

        let first = pool.acquire(far).await.unwrap();
        let second = pool.acquire(far).await.unwrap();
        assert_eq!(pool.available(), 0);

        drop(first);
        assert_eq!(pool.available(), 1);
        drop(second);
        assert_eq!(pool.available(), pool.capacity());
    }

    #[tokio::test]
    async fn test_waiting_respects_deadline() {
        let pool = WorkerPool::new(1);
        let _held = pool.acquire(Instant::now() + Duration::from_secs(5)).await.unwrap();

        let result = pool.acquire(Instant::now() + Duration::from_millis(50)).await;
        assert!(matches!(result, Err(PoolError::Deadline)));
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test]
    async fn test_queued_job_gets_freed_slot() {
        let pool = WorkerPool::new(1);
        let held = pool.acquire(Instant::now() + Duration::from_secs(5)).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(Instant::now() + Duration::from_secs(5)).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(waiter.await.unwrap());
    }
}
