//! Bounded fan-out across a service's containers.

use crate::error::Result;
use futures::stream::{self, StreamExt};
use std::future::Future;

/// Default number of concurrent actions.
pub const DEFAULT_PARALLELISM: usize = 64;

/// Runs one action per item, at most `limit` at a time.
///
/// Every action runs to completion even when an earlier one failed; the first
/// error observed is returned. Nothing is cancelled and nothing is rolled back.
#[derive(Debug, Clone, Copy)]
pub struct ParallelExecutor {
    limit: usize,
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLELISM)
    }
}

impl ParallelExecutor {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub async fn run<I, F, Fut>(&self, items: I, action: F) -> Result<()>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut results = stream::iter(items).map(action).buffer_unordered(self.limit);

        let mut first_error = None;
        while let Some(result) = results.next().await {
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    tracing::debug!("Additional failure in parallel action: {}", e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn every_action_runs_despite_failures() {
        let ran = AtomicUsize::new(0);
        let result = ParallelExecutor::default()
            .run(0..10, |i| {
                let ran = &ran;
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    if i % 3 == 0 {
                        Err(Error::ServiceNotFound(i.to_string()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert!(matches!(result, Err(Error::ServiceNotFound(_))));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        ParallelExecutor::new(3)
            .run(0..12, |_| {
                let (active, peak) = (&active, &peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn empty_input_succeeds() {
        let items: Vec<u8> = Vec::new();
        ParallelExecutor::new(0)
            .run(items, |_| async { Ok(()) })
            .await
            .unwrap();
    }
}
