use chrono::{DateTime, Utc};
use tokio::sync::watch;

use strada_shared::RequestStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The request reached a terminal status while we were waiting.
    Resolved(RequestStatus),
    /// The offer deadline passed without a driver response.
    DeadlineElapsed,
    /// The owning trip was cancelled mid-wait.
    Cancelled,
}

/// Suspends one dispatch attempt until its booking request resolves.
///
/// Event-driven: wakes on the request's status channel, the offer deadline,
/// or the trip's cancellation signal, whichever fires first. The select
/// drops the losing futures, so timers and subscriptions never outlive the
/// wait. No lock is held while suspended; drivers and the expiry sweep act
/// freely on the request in the meantime.
pub struct ResponseWaiter;

impl ResponseWaiter {
    pub async fn wait(
        status_rx: watch::Receiver<RequestStatus>,
        expires_at: DateTime<Utc>,
        cancel_rx: watch::Receiver<bool>,
    ) -> WaitOutcome {
        let remaining = (expires_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);

        tokio::select! {
            status = Self::resolved(status_rx) => WaitOutcome::Resolved(status),
            _ = tokio::time::sleep(remaining) => WaitOutcome::DeadlineElapsed,
            _ = Self::cancelled(cancel_rx) => WaitOutcome::Cancelled,
        }
    }

    async fn resolved(mut rx: watch::Receiver<RequestStatus>) -> RequestStatus {
        loop {
            let current = *rx.borrow_and_update();
            if current.is_terminal() {
                return current;
            }
            if rx.changed().await.is_err() {
                // Sender gone without a terminal transition; only the
                // deadline can end this wait now.
                std::future::pending::<()>().await;
            }
        }
    }

    async fn cancelled(mut rx: watch::Receiver<bool>) {
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
