//! Fetch coalescing keyed by destination directory.

use super::error::PkgError;
use super::fetch::FetchedPackage;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// At most one fetch per destination; later callers share the first result.
///
/// A failed fetch leaves its cell empty, so the next caller retries.
#[derive(Debug, Default)]
pub struct FetchQueue {
    cells: Mutex<HashMap<PathBuf, Arc<OnceCell<FetchedPackage>>>>,
}

impl FetchQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fetch` for `dest` unless another caller already did (or is doing) it.
    pub async fn run<F, Fut>(&self, dest: &Path, fetch: F) -> Result<FetchedPackage, PkgError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FetchedPackage, PkgError>>,
    {
        let cell = {
            let mut cells = self
                .cells
                .lock()
                .map_err(|_| PkgError::cache_error("fetch queue lock poisoned"))?;
            Arc::clone(cells.entry(dest.to_path_buf()).or_default())
        };
        cell.get_or_try_init(fetch).await.cloned()
    }

    /// Number of destinations with a completed fetch.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.cells
            .lock()
            .map(|cells| cells.values().filter(|c| c.initialized()).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::manifest::PackageJson;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fetched(dest: &Path) -> FetchedPackage {
        FetchedPackage {
            manifest: PackageJson::default(),
            hash: "h".to_string(),
            dest: dest.to_path_buf(),
            lockfile: None,
            fresh: true,
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let queue = Arc::new(FetchQueue::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let dest = PathBuf::from("/cache/which/1.2.11");

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let calls = Arc::clone(&calls);
                let dest = dest.clone();
                tokio::spawn(async move {
                    queue
                        .run(&dest, || async {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(fetched(&dest))
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().dest, dest);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.completed(), 1);
    }

    #[tokio::test]
    async fn test_failure_allows_retry() {
        let queue = FetchQueue::new();
        let dest = PathBuf::from("/cache/a/1.0.0");

        let err = queue
            .run(&dest, || async { Err(PkgError::download_failed("boom")) })
            .await
            .unwrap_err();
        assert_eq!(err.message(), "boom");
        assert_eq!(queue.completed(), 0);

        let ok = queue.run(&dest, || async { Ok(fetched(&dest)) }).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_distinct_destinations_fetch_separately() {
        let queue = FetchQueue::new();
        let a = PathBuf::from("/cache/a");
        let b = PathBuf::from("/cache/b");
        queue.run(&a, || async { Ok(fetched(&a)) }).await.unwrap();
        queue.run(&b, || async { Ok(fetched(&b)) }).await.unwrap();
        assert_eq!(queue.completed(), 2);
    }
}
