// src/hardware/shutdown.rs - Global emergency shutdown primitive
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

/// Why actuation was halted.
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownReason {
    pub message: String,
}

#[derive(Debug, Default)]
struct ShutdownState {
    reason: Option<ShutdownReason>,
    invocations: usize,
}

/// Latching shutdown switch shared by every actuator.
///
/// The first reason wins; later invocations are counted and logged but do not
/// replace it. Subscribers receive the reason once over a broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    state: Arc<Mutex<ShutdownState>>,
    tx: broadcast::Sender<ShutdownReason>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4);
        Self {
            state: Arc::new(Mutex::new(ShutdownState::default())),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.tx.subscribe()
    }

    pub fn invoke_shutdown(&self, message: impl Into<String>) {
        let message = message.into();
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.invocations += 1;
        if state.reason.is_some() {
            tracing::warn!("Shutdown already in progress, ignoring: {}", message);
            return;
        }
        tracing::error!("Emergency shutdown: {}", message);
        let reason = ShutdownReason { message };
        state.reason = Some(reason.clone());
        let _ = self.tx.send(reason);
    }

    pub fn is_shutdown(&self) -> bool {
        self.reason().is_some()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        match self.state.lock() {
            Ok(state) => state.reason.clone(),
            Err(poisoned) => poisoned.into_inner().reason.clone(),
        }
    }

    /// Total number of `invoke_shutdown` calls, including ignored ones.
    pub fn invocations(&self) -> usize {
        match self.state.lock() {
            Ok(state) => state.invocations,
            Err(poisoned) => poisoned.into_inner().invocations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_reason_wins() {
        let signal = ShutdownSignal::new();
        let mut rx = signal.subscribe();
        signal.invoke_shutdown("first");
        signal.invoke_shutdown("second");
        assert_eq!(signal.invocations(), 2);
        assert_eq!(signal.reason().map(|r| r.message), Some("first".to_string()));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.message, "first");
        assert!(rx.try_recv().is_err());
    }
}
