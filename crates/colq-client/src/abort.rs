// SPDX-License-Identifier: MIT OR Apache-2.0
//! Composite cancellation over `tokio::sync::watch`.
//!
//! A query owns an internal handle/signal pair; when the caller supplies
//! their own signal, the two are combined into one derived signal that
//! fires when either parent fires. Triggering is idempotent.

use tokio::sync::watch;

// ---------------------------------------------------------------------------
// AbortHandle / AbortSignal
// ---------------------------------------------------------------------------

/// The triggering side of a cancellation pair.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Create a fresh handle/signal pair.
    #[must_use]
    pub fn new() -> (AbortHandle, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        (AbortHandle { tx }, AbortSignal { rx })
    }

    /// Trigger cancellation. Idempotent.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    /// Whether this handle has already fired.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// The observing side of a cancellation pair.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// Whether cancellation has been triggered.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is triggered. If every handle is dropped
    /// without firing, this pends forever, which is what a `select!` arm
    /// wants.
    pub async fn aborted(&mut self) {
        if !self.fired_or_closed().await {
            std::future::pending::<()>().await;
        }
    }

    /// Resolve `true` when fired, `false` when all handles dropped silently.
    async fn fired_or_closed(&mut self) -> bool {
        loop {
            if *self.rx.borrow_and_update() {
                return true;
            }
            if self.rx.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Derive a signal that fires when either parent fires.
    ///
    /// The watcher tasks exit once their parent can no longer fire, so an
    /// unfired parent does not pin resources beyond its own lifetime.
    #[must_use]
    pub fn either(a: AbortSignal, b: AbortSignal) -> AbortSignal {
        let (handle, signal) = AbortHandle::new();
        for mut parent in [a, b] {
            let handle = handle.clone();
            tokio::spawn(async move {
                if parent.fired_or_closed().await {
                    handle.abort();
                }
            });
        }
        signal
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn abort_is_observed() {
        let (handle, mut signal) = AbortHandle::new();
        assert!(!signal.is_aborted());
        handle.abort();
        signal.aborted().await;
        assert!(signal.is_aborted());
    }

    #[tokio::test]
    async fn abort_is_idempotent() {
        let (handle, signal) = AbortHandle::new();
        handle.abort();
        handle.abort();
        assert!(signal.is_aborted());
    }

    #[tokio::test]
    async fn unfired_signal_pends() {
        let (_handle, mut signal) = AbortHandle::new();
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.aborted()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn dropped_handle_without_firing_pends() {
        let (handle, mut signal) = AbortHandle::new();
        drop(handle);
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.aborted()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn either_fires_on_first_parent() {
        let (h1, s1) = AbortHandle::new();
        let (_h2, s2) = AbortHandle::new();
        let mut combined = AbortSignal::either(s1, s2);
        h1.abort();
        tokio::time::timeout(Duration::from_secs(1), combined.aborted())
            .await
            .expect("combined signal fires");
    }

    #[tokio::test]
    async fn either_fires_on_second_parent() {
        let (_h1, s1) = AbortHandle::new();
        let (h2, s2) = AbortHandle::new();
        let mut combined = AbortSignal::either(s1, s2);
        h2.abort();
        tokio::time::timeout(Duration::from_secs(1), combined.aborted())
            .await
            .expect("combined signal fires");
    }

    #[tokio::test]
    async fn either_stays_quiet_when_parents_close_silently() {
        let (h1, s1) = AbortHandle::new();
        let (h2, s2) = AbortHandle::new();
        let mut combined = AbortSignal::either(s1, s2);
        drop(h1);
        drop(h2);
        let waited = tokio::time::timeout(Duration::from_millis(20), combined.aborted()).await;
        assert!(waited.is_err());
    }
}
