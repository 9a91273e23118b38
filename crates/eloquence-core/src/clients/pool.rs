//! Bounded connection pools for the external services.
//!
//! One pool per service caps concurrent in-flight requests across all
//! sessions. When the pool is exhausted, callers queue for at most
//! `max_wait` before failing with `Overloaded`.

use crate::error::{CoreError, CoreResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ServicePool {
    name: &'static str,
    permits: Arc<Semaphore>,
    max_wait: Duration,
}

impl ServicePool {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            permits: Arc::new(Semaphore::new(capacity)),
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Acquires one slot, waiting at most `max_wait`.
    pub async fn acquire(&self) -> CoreResult<OwnedSemaphorePermit> {
        match tokio::time::timeout(self.max_wait, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(CoreError::Internal(format!(
                "{} pool semaphore closed",
                self.name
            ))),
            Err(_) => Err(CoreError::Overloaded(format!(
                "{} pool exhausted after {:?} wait",
                self.name, self.max_wait
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eloquence_types::ErrorCode;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let pool = ServicePool::new("asr", 2);
        let p1 = pool.acquire().await.unwrap();
        let _p2 = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        drop(p1);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_pool_times_out_with_overloaded() {
        let pool = ServicePool::new("tts", 1);
        let _held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Overloaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_caller_proceeds_when_slot_frees() {
        let pool = ServicePool::new("llm", 1);
        let held = pool.acquire().await.unwrap();

        let waiter = tokio::spawn({
            let pool = pool.clone();
            async move { pool.acquire().await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(held);

        let permit = waiter.await.unwrap();
        assert!(permit.is_ok());
    }
}
