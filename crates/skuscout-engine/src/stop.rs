//! Batch cancellation: an explicit stop request or a wall-clock deadline.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;

/// Requests that running batches stop starting new work. Cloneable; safe to
/// hand to a signal handler.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Workers finish their current attempt and then exit.
    pub fn stop(&self) {
        if !self.tx.send_replace(true) {
            tracing::info!("stop requested");
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn signal(&self, deadline: Option<Instant>) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
            deadline,
        }
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker-side view of the stop state.
#[derive(Debug, Clone)]
pub(crate) struct StopSignal {
    rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl StopSignal {
    pub(crate) fn is_stopped(&self) -> bool {
        *self.rx.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once a stop is requested or the deadline passes.
    pub(crate) async fn stopped(&mut self) {
        let deadline = self.deadline;
        let flag = async {
            if self.rx.wait_for(|stop| *stop).await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        match deadline {
            Some(deadline) => {
                tokio::select! {
                    () = flag => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => flag.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn stop_is_sticky_and_visible_to_signals() {
        let handle = StopHandle::new();
        let signal = handle.signal(None);
        assert!(!signal.is_stopped());
        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
        assert!(signal.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_without_explicit_request() {
        let handle = StopHandle::new();
        let mut signal = handle.signal(Some(Instant::now() + Duration::from_secs(5)));
        assert!(!signal.is_stopped());
        signal.stopped().await;
        assert!(signal.is_stopped());
        assert!(!handle.is_stopped());
    }

    #[tokio::test]
    async fn stopped_resolves_on_request() {
        let handle = StopHandle::new();
        let mut signal = handle.signal(None);
        let remote = handle.clone();
        tokio::spawn(async move { remote.stop() });
        signal.stopped().await;
        assert!(signal.is_stopped());
    }
}
