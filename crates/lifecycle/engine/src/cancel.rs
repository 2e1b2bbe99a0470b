//! Cancellation signal and run deadline.
//!
//! Every suspension point in the engine (retry backoff, poll ticks, settle
//! delay) waits through a [`CancelToken`] so that an external cancel or the
//! overall deadline interrupts it between ticks, not only at submission.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Why a wait was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// [`CancelHandle::cancel`] was called.
    Cancelled,
    /// The run deadline passed.
    DeadlineExceeded,
}

impl std::fmt::Display for Interruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interruption::Cancelled => write!(f, "cancelled"),
            Interruption::DeadlineExceeded => write!(f, "run deadline exceeded"),
        }
    }
}

/// Owner side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Request cancellation. In-flight control-plane operations are not rolled back.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observer side of a cancellation signal, optionally bound to a deadline.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
    // Keeps the channel open for tokens that have no external handle.
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl CancelToken {
    /// Create a linked handle/token pair.
    pub fn pair() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        let tx = Arc::new(tx);
        (
            CancelHandle { tx: tx.clone() },
            CancelToken {
                rx,
                deadline: None,
                _keepalive: Some(tx),
            },
        )
    }

    /// A token that is never cancelled and has no deadline.
    pub fn never() -> Self {
        Self::pair().1
    }

    /// Bind the token to a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Bind the token to an absolute deadline, keeping the earlier one.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check.
    pub fn interruption(&self) -> Option<Interruption> {
        if *self.rx.borrow() {
            return Some(Interruption::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interruption::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interruption().is_some()
    }

    /// Resolves once cancelled or past the deadline.
    pub async fn interrupted(&self) -> Interruption {
        let mut rx = self.rx.clone();
        let signalled = async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = signalled => Interruption::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Interruption::DeadlineExceeded,
            },
            None => {
                signalled.await;
                Interruption::Cancelled
            }
        }
    }

    /// Sleep for `duration` unless interrupted first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interruption> {
        if let Some(reason) = self.interruption() {
            return Err(reason);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            reason = self.interrupted() => Err(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_signal() {
        let token = CancelToken::never();
        let start = Instant::now();
        token.sleep(Duration::from_secs(30)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let (handle, token) = CancelToken::pair();
        let sleeper = tokio::spawn(async move { token.sleep(Duration::from_secs(600)).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();

        assert_eq!(sleeper.await.unwrap(), Err(Interruption::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_sleep() {
        let token = CancelToken::never().with_timeout(Duration::from_secs(5));
        let start = Instant::now();
        let result = token.sleep(Duration::from_secs(60)).await;
        assert_eq!(result, Err(Interruption::DeadlineExceeded));
        assert!(start.elapsed() < Duration::from_secs(60));
        assert!(token.is_interrupted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_deadline_wins() {
        let token = CancelToken::never()
            .with_timeout(Duration::from_secs(10))
            .with_timeout(Duration::from_secs(100));
        let remaining = token.deadline().unwrap() - Instant::now();
        assert!(remaining <= Duration::from_secs(10));
    }
}
