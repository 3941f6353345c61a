//! Retry/backoff supervisor shared by the host advertise loop and the join loop

use crate::rendezvous::RendezvousError;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Errors the supervisor knows how to tell apart from ordinary failures
pub trait Retryable: fmt::Display {
    fn is_cancelled(&self) -> bool;
    fn cancelled() -> Self;
}

impl Retryable for RendezvousError {
    fn is_cancelled(&self) -> bool {
        matches!(self, RendezvousError::Cancelled)
    }

    fn cancelled() -> Self {
        RendezvousError::Cancelled
    }
}

/// Delay between failed attempts: `base` plus up to `jitter` of noise
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            jitter: Duration::from_millis(10),
        }
    }
}

impl Backoff {
    pub fn delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.base;
        }
        self.base + Duration::from_millis(rand::rng().random_range(0..jitter_ms))
    }
}

/// Runs operations until they yield a value or the session token fires.
/// One supervisor covers one hosting or joining attempt.
#[derive(Debug, Clone)]
pub struct Supervisor {
    backoff: Backoff,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(backoff: Backoff, cancel: CancellationToken) -> Self {
        Self { backoff, cancel }
    }

    /// Drive `op` until it returns `Ok(Some(_))`.
    ///
    /// `Ok(None)` is the "nothing yet" steady state of a long-poll and is
    /// retried at once. Any other error is reported through `report`, then
    /// retried after the backoff delay.
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        report: &(dyn Fn(String) + Send + Sync),
        mut op: F,
    ) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        loop {
            if self.cancel.is_cancelled() {
                return Err(E::cancelled());
            }
            match op().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => tokio::task::yield_now().await,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!("{} failed: {}", what, e);
                    report(format!("error: {}: {} (will try again soon)", what, e));
                    self.pause::<E>(self.backoff.delay()).await?;
                }
            }
        }
    }

    /// Cancellable sleep
    pub async fn pause<E: Retryable>(&self, duration: Duration) -> Result<(), E> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(E::cancelled()),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn server_error() -> RendezvousError {
        RendezvousError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".to_string(),
        }
    }

    fn no_report() -> impl Fn(String) + Send + Sync {
        |_| {}
    }

    #[test]
    fn test_backoff_delay_within_jitter() {
        let backoff = Backoff::default();
        for _ in 0..100 {
            let d = backoff.delay();
            assert!(d >= Duration::from_secs(5));
            assert!(d < Duration::from_millis(5010));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_back_off_then_succeed() {
        let supervisor = Supervisor::new(Backoff::default(), CancellationToken::new());
        let attempts = AtomicUsize::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<u32, RendezvousError> = supervisor
            .run("advertise", &no_report(), || async {
                match attempts.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(server_error()),
                    1 => Err(RendezvousError::SlotTaken),
                    _ => Ok(Some(7)),
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_value_retries_immediately() {
        let supervisor = Supervisor::new(Backoff::default(), CancellationToken::new());
        let attempts = AtomicUsize::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<&str, RendezvousError> = supervisor
            .run("await slot", &no_report(), || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 5 {
                    Ok(None)
                } else {
                    Ok(Some("3"))
                }
            })
            .await;

        assert_eq!(result.unwrap(), "3");
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(Backoff::default(), cancel.clone());

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let start = tokio::time::Instant::now();
        let result: Result<(), RendezvousError> = supervisor
            .run("advertise", &no_report(), || async { Err(server_error()) })
            .await;

        assert!(matches!(result, Err(RendezvousError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancelled_error_stops_without_retry() {
        let supervisor = Supervisor::new(Backoff::default(), CancellationToken::new());
        let attempts = AtomicUsize::new(0);
        let result: Result<(), RendezvousError> = supervisor
            .run("advertise", &no_report(), || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(RendezvousError::Cancelled)
            })
            .await;

        assert!(matches!(result, Err(RendezvousError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_reported() {
        let supervisor = Supervisor::new(Backoff::default(), CancellationToken::new());
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        let report = move |s: String| sink.lock().unwrap().push(s);
        let attempts = AtomicUsize::new(0);

        let _: Result<(), RendezvousError> = supervisor
            .run("advertise", &report, || async {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RendezvousError::SlotTaken)
                } else {
                    Ok(Some(()))
                }
            })
            .await;

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].contains("code already taken"));
        assert!(reports[0].starts_with("error: advertise"));
    }
}
