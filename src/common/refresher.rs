//! Periodically refreshed cached value with single-flight recomputation

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::errors::{EngineError, Result};

/// Async producer of a fresh value
pub type RefreshFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

struct Cached<T> {
    value: Option<T>,
    last_success: Option<DateTime<Utc>>,
    /// Error of the latest refresh, `None` once one succeeds
    last_failure: Option<String>,
}

struct Inner<T> {
    name: String,
    interval: Duration,
    fetch: RefreshFn<T>,
    cached: RwLock<Cached<T>>,
    in_flight: Mutex<()>,
    generation: AtomicU64,
    timer_started: AtomicBool,
    cancel: CancellationToken,
}

/// Cached value that is computed on first access and then refreshed on a timer.
///
/// Concurrent refresh requests collapse into one call of the producer. A failed refresh keeps
/// serving the last good value.
pub struct Refresher<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Refresher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Refresher<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a refresher; nothing is fetched until the first `get`
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        cancel: CancellationToken,
        fetch: RefreshFn<T>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                interval,
                fetch,
                cached: RwLock::new(Cached {
                    value: None,
                    last_success: None,
                    last_failure: None,
                }),
                in_flight: Mutex::new(()),
                generation: AtomicU64::new(0),
                timer_started: AtomicBool::new(false),
                cancel,
            }),
        }
    }

    /// Current value, computing it synchronously on first access
    pub async fn get(&self) -> Result<T> {
        if let Some(value) = self.inner.cached.read().await.value.clone() {
            return Ok(value);
        }

        let outcome = self.refresh().await;
        self.start_timer();
        outcome?;

        self.inner.cached.read().await.value.clone().ok_or_else(|| {
            EngineError::Internal(format!("refresher {} has no value yet", self.inner.name))
        })
    }

    /// Recompute the value now, or wait for the refresh already in flight
    pub async fn refresh(&self) -> Result<()> {
        let seen = self.inner.generation.load(Ordering::Acquire);
        let _guard = self.inner.in_flight.lock().await;
        if self.inner.generation.load(Ordering::Acquire) != seen {
            debug!(name = %self.inner.name, "Refresh already performed by a concurrent caller");
            return match &self.inner.cached.read().await.last_failure {
                Some(reason) => Err(EngineError::Internal(format!(
                    "refresh of {} failed: {}",
                    self.inner.name, reason
                ))),
                None => Ok(()),
            };
        }

        let result = (self.inner.fetch)().await;
        self.inner.generation.fetch_add(1, Ordering::AcqRel);

        match result {
            Ok(value) => {
                let mut cached = self.inner.cached.write().await;
                cached.value = Some(value);
                cached.last_success = Some(Utc::now());
                cached.last_failure = None;
                debug!(name = %self.inner.name, "Refreshed cached value");
                Ok(())
            }
            Err(e) => {
                let last_success = {
                    let mut cached = self.inner.cached.write().await;
                    cached.last_failure = Some(e.to_string());
                    cached.last_success
                };
                warn!(
                    name = %self.inner.name,
                    last_success = ?last_success,
                    "Refresh failed, serving stale value: {}",
                    e
                );
                Err(e)
            }
        }
    }

    /// Time of the last successful refresh
    pub async fn last_success(&self) -> Option<DateTime<Utc>> {
        self.inner.cached.read().await.last_success
    }

    fn start_timer(&self) {
        if self.inner.timer_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.inner.interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = this.inner.cancel.cancelled() => {
                        debug!(name = %this.inner.name, "Refresher timer stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let _ = this.refresh().await;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn counting_fetch(calls: Arc<AtomicUsize>, delay: Duration) -> RefreshFn<usize> {
        Arc::new(move || {
            let calls = Arc::clone(&calls);
            async move {
                tokio::time::sleep(delay).await;
                Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_first_access_computes_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let refresher = Refresher::new(
            "test",
            Duration::from_secs(3600),
            CancellationToken::new(),
            counting_fetch(Arc::clone(&calls), Duration::ZERO),
        );

        assert_eq!(refresher.get().await.unwrap(), 1);
        assert_eq!(refresher.get().await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(refresher.last_success().await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_collapse() {
        let calls = Arc::new(AtomicUsize::new(0));
        let refresher = Refresher::new(
            "test",
            Duration::from_secs(3600),
            CancellationToken::new(),
            counting_fetch(Arc::clone(&calls), Duration::from_millis(50)),
        );

        let (a, b, c) = tokio::join!(refresher.refresh(), refresher.refresh(), refresher.refresh());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(refresher.get().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_collapsed_refreshes_share_the_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetch: RefreshFn<u32> = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err::<u32, _>(EngineError::Internal("exchange down".to_string()))
            }
            .boxed()
        });
        let refresher = Refresher::new("test", Duration::from_secs(3600), CancellationToken::new(), fetch);

        let (a, b, c) = tokio::join!(refresher.refresh(), refresher.refresh(), refresher.refresh());
        assert!(a.is_err() && b.is_err() && c.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stale_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetch: RefreshFn<u32> = Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(42u32)
                } else {
                    Err(EngineError::Internal("exchange down".to_string()))
                }
            }
            .boxed()
        });
        let refresher = Refresher::new("test", Duration::from_secs(3600), CancellationToken::new(), fetch);

        assert_eq!(refresher.get().await.unwrap(), 42);
        assert!(refresher.refresh().await.is_err());
        assert_eq!(refresher.get().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_first_access_failure_is_reported() {
        let fetch: RefreshFn<u32> =
            Arc::new(|| async { Err::<u32, _>(EngineError::Internal("boom".to_string())) }.boxed());
        let refresher = Refresher::new("test", Duration::from_secs(3600), CancellationToken::new(), fetch);

        assert!(refresher.get().await.is_err());
    }
}
