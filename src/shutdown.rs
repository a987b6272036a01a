//! Cooperative shutdown for node tasks.

use tokio::sync::watch;

/// Fires the shutdown of every task holding a matching `ShutdownSignal`.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered or the trigger is dropped.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_resolves_after_trigger() {
        let (trigger, mut signal) = shutdown_channel();
        let waiter = tokio::spawn(async move { signal.wait().await });
        trigger.trigger();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_trigger_counts_as_shutdown() {
        let (trigger, mut signal) = shutdown_channel();
        drop(trigger);
        signal.wait().await;
    }

    #[test]
    fn test_late_subscriber_sees_trigger() {
        let (trigger, _signal) = shutdown_channel();
        trigger.trigger();
        assert!(trigger.signal().is_triggered());
    }
}
