use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Bounds concurrent calls into the shared tier. Waiting is capped so an
/// exhausted pool turns into a miss instead of a stall.
#[derive(Debug, Clone)]
pub(crate) struct PermitPool {
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
}

impl PermitPool {
    pub(crate) fn new(size: usize, acquire_timeout: Duration) -> Self {
        Self { permits: Arc::new(Semaphore::new(size.max(1))), acquire_timeout }
    }

    pub(crate) async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        match tokio::time::timeout(self.acquire_timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => Some(permit),
            _ => None,
        }
    }

    pub(crate) fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
