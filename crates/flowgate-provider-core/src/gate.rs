use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Process-wide admission control over in-flight upstream calls.
///
/// A permit is released when the `GatePermit` drops, which covers normal
/// completion, error returns and a cancelled future alike. Streaming calls
/// move their permit into the response stream so it lives until the stream
/// is finished or dropped.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("concurrency gate closed")]
pub struct GateClosed;

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits for a slot. Waiters are served in FIFO order.
    pub async fn acquire(&self) -> Result<GatePermit, GateClosed> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GateClosed)?;
        Ok(GatePermit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn capacity_one_serialises_callers() {
        let gate = ConcurrencyGate::new(1);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let gate = gate.clone();
            let active = active.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn second_caller_waits_until_release() {
        let gate = ConcurrencyGate::new(1);
        let first = gate.acquire().await.unwrap();
        assert_eq!(gate.in_flight(), 1);

        let waiting = tokio::time::timeout(Duration::from_millis(20), gate.acquire()).await;
        assert!(waiting.is_err(), "second acquire should block");

        drop(first);
        let second = tokio::time::timeout(Duration::from_millis(100), gate.acquire()).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn cancelled_holder_releases_permit() {
        let gate = ConcurrencyGate::new(1);
        let held = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                std::future::pending::<()>().await;
            })
        };
        while gate.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        held.abort();
        let _ = held.await;
        assert_eq!(gate.in_flight(), 0);
        let permit = tokio::time::timeout(Duration::from_millis(100), gate.acquire()).await;
        assert!(permit.is_ok());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(ConcurrencyGate::new(0).capacity(), 1);
    }
}
