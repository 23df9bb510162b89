//! Process-wide cancellation.

use tokio::sync::watch;

/// Owner side of the cancellation signal.
///
/// Every consumer loop and periodic task holds a [`ShutdownSignal`] obtained
/// from [`Shutdown::subscribe`]; calling [`Shutdown::trigger`] stops all of
/// them cooperatively.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown has been triggered, or immediately if it
    /// already was. A dropped [`Shutdown`] counts as triggered.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn late_subscribers_observe_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let mut signal = shutdown.subscribe();
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("signal should resolve immediately");
    }

    #[tokio::test]
    async fn cancelled_waits_for_trigger() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();

        let pending = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(pending.is_err());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("signal should resolve after trigger");
    }
}
