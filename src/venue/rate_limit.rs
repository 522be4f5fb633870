// =============================================================================
// Rate-Limited RPC Gate: token bucket with FIFO queueing and retries
// =============================================================================
//
// Every external chain/market call flows through `RateLimitedRpc::call`:
//
//   - Sliding-window token bucket (default 5 ops per 1000 ms). Tokens are
//     released by timestamp aging, not by operation completion.
//   - Excess callers queue FIFO behind an async mutex; each caller records
//     its enqueue instant for the wait-time metric.
//   - On failure, up to 3 retries with exponential backoff 500 ms * 2^attempt
//     and +/-30 % jitter. Retries re-enter the gate and consume tokens.
//   - Each attempt is bounded by the RPC deadline (default 10 s).
//
// Clocks use `tokio::time::Instant` so tests can run under a paused runtime.
// =============================================================================

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Result};
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use serde::Serialize;
use tracing::{debug, warn};

/// Retries after the initial attempt. Total attempts are capped at 4.
const MAX_RETRIES: u32 = 3;

/// Base backoff before jitter.
const BACKOFF_BASE_MS: u64 = 500;

/// Counters exposed on the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct RpcMetricsSnapshot {
    pub total_calls: u64,
    pub rate_limit_hits: u64,
    pub avg_queue_wait_ms: f64,
    pub current_queue_depth: u64,
}

/// Token-bucket gate over external RPC operations.
pub struct RateLimitedRpc {
    max_in_window: usize,
    window: Duration,
    rpc_timeout: Duration,

    /// Admission timestamps inside the current window, oldest first. The
    /// async mutex doubles as the FIFO queue: tokio wakes waiters in order.
    admissions: Mutex<VecDeque<Instant>>,

    total_calls: AtomicU64,
    rate_limit_hits: AtomicU64,
    queue_wait_total_ms: AtomicU64,
    queue_depth: AtomicU64,
}

impl RateLimitedRpc {
    /// Create a gate admitting `max_in_window` operations per `window`.
    pub fn new(max_in_window: u32, window: Duration, rpc_timeout: Duration) -> Self {
        Self {
            max_in_window: max_in_window.max(1) as usize,
            window,
            rpc_timeout,
            admissions: Mutex::new(VecDeque::new()),
            total_calls: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
            queue_wait_total_ms: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
        }
    }

    // -------------------------------------------------------------------------
    // Calling
    // -------------------------------------------------------------------------

    /// Run `op` under the rate limit with retries.
    ///
    /// `op` is a factory so each retry gets a fresh future. The last error is
    /// propagated once all attempts are exhausted.
    pub async fn call<T, F, Fut>(&self, label: &str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            self.acquire().await;
            self.total_calls.fetch_add(1, Ordering::Relaxed);

            match tokio::time::timeout(self.rpc_timeout, op()).await {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        debug!(label, attempt, "rpc succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    warn!(label, attempt, error = %e, "rpc attempt failed");
                    last_err = Some(e);
                }
                Err(_) => {
                    warn!(
                        label,
                        attempt,
                        timeout_ms = self.rpc_timeout.as_millis() as u64,
                        "rpc attempt timed out"
                    );
                    last_err = Some(anyhow!(
                        "rpc '{label}' timed out after {} ms",
                        self.rpc_timeout.as_millis()
                    ));
                }
            }

            if attempt < MAX_RETRIES {
                tokio::time::sleep(Self::backoff(attempt)).await;
            }
        }

        Err(last_err
            .unwrap_or_else(|| anyhow!("rpc '{label}' failed with no recorded error"))
            .context(format!("rpc '{label}' exhausted {} attempts", MAX_RETRIES + 1)))
    }

    /// Exponential backoff with +/-30 % jitter.
    fn backoff(attempt: u32) -> Duration {
        let base = BACKOFF_BASE_MS * (1u64 << attempt);
        let jitter = rand::thread_rng().gen_range(0.7..1.3);
        Duration::from_millis((base as f64 * jitter) as u64)
    }

    // -------------------------------------------------------------------------
    // Admission
    // -------------------------------------------------------------------------

    /// Wait for a token. Callers are served FIFO; the mutex is held across
    /// the in-window sleep so later arrivals cannot overtake.
    async fn acquire(&self) {
        let enqueued_at = Instant::now();
        self.queue_depth.fetch_add(1, Ordering::Relaxed);

        let mut admissions = self.admissions.lock().await;
        let mut counted_hit = false;

        loop {
            let now = Instant::now();
            while let Some(front) = admissions.front() {
                if now.duration_since(*front) >= self.window {
                    admissions.pop_front();
                } else {
                    break;
                }
            }

            if admissions.len() < self.max_in_window {
                admissions.push_back(now);
                break;
            }

            if !counted_hit {
                self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                counted_hit = true;
            }

            // Oldest admission ages out first; sleep until it does.
            let oldest = *admissions.front().expect("window is full");
            let wait = self.window.saturating_sub(now.duration_since(oldest));
            tokio::time::sleep(wait).await;
        }

        drop(admissions);

        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
        self.queue_wait_total_ms.fetch_add(
            enqueued_at.elapsed().as_millis() as u64,
            Ordering::Relaxed,
        );
    }

    // -------------------------------------------------------------------------
    // Metrics
    // -------------------------------------------------------------------------

    /// Produce a serialisable snapshot of the current counters.
    pub fn metrics(&self) -> RpcMetricsSnapshot {
        let total = self.total_calls.load(Ordering::Relaxed);
        let wait_total = self.queue_wait_total_ms.load(Ordering::Relaxed);
        RpcMetricsSnapshot {
            total_calls: total,
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            avg_queue_wait_ms: if total > 0 {
                wait_total as f64 / total as f64
            } else {
                0.0
            },
            current_queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RateLimitedRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedRpc")
            .field("max_in_window", &self.max_in_window)
            .field("window", &self.window)
            .field("total_calls", &self.total_calls.load(Ordering::Relaxed))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn gate(max: u32, window_ms: u64) -> Arc<RateLimitedRpc> {
        Arc::new(RateLimitedRpc::new(
            max,
            Duration::from_millis(window_ms),
            Duration::from_millis(5_000),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn twelve_calls_through_a_five_per_window_gate() {
        let rpc = gate(5, 1_000);
        let start = Instant::now();

        let mut handles = Vec::new();
        for i in 0..12u32 {
            let rpc = rpc.clone();
            handles.push(tokio::spawn(async move {
                rpc.call("op", || async move { Ok::<_, anyhow::Error>(i) })
                    .await
            }));
        }

        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }

        // 12 calls through a 5-token window need at least two full windows.
        assert!(start.elapsed() >= Duration::from_millis(2_000));

        let m = rpc.metrics();
        assert_eq!(m.total_calls, 12);
        assert!(m.rate_limit_hits >= 1);
        assert_eq!(m.current_queue_depth, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_consume_attempts_then_propagate_last_error() {
        let rpc = gate(5, 100);
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result: Result<()> = rpc
            .call("always-fails", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow!("venue rejected"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        let msg = format!("{:#}", result.unwrap_err());
        assert!(msg.contains("venue rejected"));
        assert!(msg.contains("exhausted 4 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers_on_retry() {
        let rpc = gate(5, 100);
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result = rpc
            .call("flaky", move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(anyhow!("throttled"))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_times_out() {
        let rpc = Arc::new(RateLimitedRpc::new(
            5,
            Duration::from_millis(100),
            Duration::from_millis(50),
        ));

        let result: Result<()> = rpc
            .call("sleepy", || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;

        let msg = format!("{:#}", result.unwrap_err());
        assert!(msg.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_release_by_aging_not_completion() {
        let rpc = gate(2, 1_000);
        let start = Instant::now();

        // Two immediate admissions fill the window.
        rpc.call("a", || async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();
        rpc.call("b", || async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));

        // The third must wait for the first admission to age out.
        rpc.call("c", || async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1_000));
    }
}
