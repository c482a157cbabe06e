//! Token bucket admission for oracle calls.
//!
//! The gate is the only place an analysis pass suspends, so it is also where
//! cancellation is observed.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

/// The analysis pass was cancelled before it finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("analysis cancelled")]
pub struct Cancelled;

/// Sending half of a cancellation signal.
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// Create a connected canceller and token.
    pub fn pair() -> (Canceller, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Canceller { tx }, CancelToken { rx: Some(rx) })
    }

    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolve once cancellation is requested.
    ///
    /// Pends forever if the canceller is dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Rate limiter for oracle calls.
///
/// Holds up to `burst` tokens and earns one more every `refill_interval`. A
/// zero interval disables throttling.
#[derive(Debug)]
pub struct RateGate {
    burst: u32,
    refill_interval: Duration,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    refilled_at: Instant,
}

impl RateGate {
    pub fn new(burst: u32, refill_interval: Duration) -> Self {
        let burst = burst.max(1);
        Self {
            burst,
            refill_interval,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// A gate that admits every call immediately.
    pub fn unlimited() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Wait for a token.
    ///
    /// Fails with [`Cancelled`] if `cancel` fires before a token is granted.
    pub async fn admit(&self, cancel: &CancelToken) -> Result<(), Cancelled> {
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            let wait = {
                let mut bucket = self.bucket.lock().await;
                match bucket.take(self.burst, self.refill_interval, Instant::now()) {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate gate waiting for token");
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = cancel.cancelled() => return Err(Cancelled),
            }
        }
    }
}

impl Bucket {
    fn refill(&mut self, burst: u32, interval: Duration, now: Instant) {
        if interval.is_zero() {
            self.tokens = burst;
            self.refilled_at = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.refilled_at);
        let earned = elapsed.as_nanos() / interval.as_nanos();
        if earned == 0 {
            return;
        }

        let missing = u128::from(burst - self.tokens);
        if earned >= missing {
            self.tokens = burst;
            self.refilled_at = now;
        } else {
            // earned < burst here, so the narrowing is lossless.
            self.tokens += earned as u32;
            self.refilled_at += interval * earned as u32;
        }
    }

    /// Take a token, or report how long until the next one is earned.
    fn take(&mut self, burst: u32, interval: Duration, now: Instant) -> Result<(), Duration> {
        self.refill(burst, interval, now);
        if self.tokens > 0 {
            self.tokens -= 1;
            return Ok(());
        }
        // An interval too large to add to an instant never refills.
        Err(self
            .refilled_at
            .checked_add(interval)
            .map_or(Duration::MAX, |next| next.saturating_duration_since(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn burst_is_admitted_immediately() {
        let gate = RateGate::new(3, MINUTE);
        let start = Instant::now();
        for _ in 0..3 {
            gate.admit(&CancelToken::never()).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_refill_after_burst() {
        let gate = RateGate::new(2, MINUTE);
        let start = Instant::now();
        for _ in 0..3 {
            gate.admit(&CancelToken::never()).await.unwrap();
        }
        assert!(start.elapsed() >= MINUTE);
        assert!(start.elapsed() < MINUTE * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_burst() {
        let gate = RateGate::new(2, MINUTE);
        gate.admit(&CancelToken::never()).await.unwrap();
        gate.admit(&CancelToken::never()).await.unwrap();

        tokio::time::sleep(MINUTE * 10).await;

        let start = Instant::now();
        gate.admit(&CancelToken::never()).await.unwrap();
        gate.admit(&CancelToken::never()).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        gate.admit(&CancelToken::never()).await.unwrap();
        assert!(start.elapsed() >= MINUTE);
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_gate_never_waits() {
        let gate = RateGate::unlimited();
        let start = Instant::now();
        for _ in 0..100 {
            gate.admit(&CancelToken::never()).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_while_waiting() {
        let gate = RateGate::new(1, MINUTE);
        let (canceller, token) = CancelToken::pair();
        gate.admit(&token).await.unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        assert_eq!(gate.admit(&token).await, Err(Cancelled));
        assert!(start.elapsed() < MINUTE);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_interval_waits_instead_of_overflowing() {
        let gate = RateGate::new(1, Duration::from_secs(u64::MAX));
        let (canceller, token) = CancelToken::pair();
        gate.admit(&token).await.unwrap();

        let waited = tokio::time::timeout(MINUTE, gate.admit(&token)).await;
        assert!(waited.is_err());

        canceller.cancel();
        assert_eq!(gate.admit(&token).await, Err(Cancelled));
    }

    #[tokio::test]
    async fn cancelled_token_is_refused_even_with_tokens() {
        let gate = RateGate::new(10, MINUTE);
        let (canceller, token) = CancelToken::pair();
        canceller.cancel();
        assert_eq!(gate.admit(&token).await, Err(Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_canceller_does_not_cancel() {
        let gate = RateGate::new(1, MINUTE);
        let (canceller, token) = CancelToken::pair();
        drop(canceller);

        gate.admit(&token).await.unwrap();
        gate.admit(&token).await.unwrap();
        assert!(!token.is_cancelled());
    }
}
