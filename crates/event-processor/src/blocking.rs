use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{ProcessorError, Result};

/// Bounded pool for blocking reaction code.
///
/// Blocking work runs on tokio's blocking threads, at most `max_concurrency`
/// at a time, so it cannot starve the async workers.
#[derive(Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
}

impl BlockingPool {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn run<F, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ProcessorError::PoolClosed)?;
        let output = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await?;
        Ok(output)
    }

    /// Rejects all waiting and future work.
    pub fn close(&self) {
        self.permits.close();
    }
}

impl Default for BlockingPool {
    fn default() -> Self {
        Self::new(8)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrency_is_bounded() {
        let pool = BlockingPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..6).map(|_| {
            let pool = pool.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }
        });
        for result in futures_util::future::join_all(tasks).await {
            result.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn returns_value() {
        let pool = BlockingPool::default();
        assert_eq!(pool.run(|| 40 + 2).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn closed_pool_rejects_work() {
        let pool = BlockingPool::new(1);
        pool.close();
        assert!(matches!(pool.run(|| ()).await, Err(ProcessorError::PoolClosed)));
    }
}
