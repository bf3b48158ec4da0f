//! Notification sink
//!
//! The claimer never renders UI. It emits two event streams for whatever
//! frontend is listening: a human-readable progress log and a structured
//! key-found stream. Every emission is mirrored to `tracing` so headless
//! runs still leave a trail.

use tokio::sync::mpsc;
use tracing::info;

/// A successfully claimed key, paired with the email that claimed it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFound {
    pub email: String,
    pub key: String,
}

/// Event sink handed to the claimer. Cloneable; all clones feed the same
/// receivers. Sends never block and never fail the claimer: a dropped
/// receiver just means nobody is listening.
#[derive(Debug, Clone)]
pub struct Signals {
    log_tx: mpsc::UnboundedSender<String>,
    key_tx: mpsc::UnboundedSender<KeyFound>,
}

impl Signals {
    /// Create a sink plus the two receivers the caller consumes.
    pub fn channel() -> (
        Self,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedReceiver<KeyFound>,
    ) {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (key_tx, key_rx) = mpsc::unbounded_channel();
        (Self { log_tx, key_tx }, log_rx, key_rx)
    }

    /// A sink with no listeners. Emissions still reach `tracing`.
    pub fn sink() -> Self {
        let (signals, _log_rx, _key_rx) = Self::channel();
        signals
    }

    /// Emit a progress message on the log stream.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        let _ = self.log_tx.send(message);
    }

    /// Emit a claimed key on the structured stream.
    pub fn key_found(&self, email: &str, key: &str) {
        let event = KeyFound {
            email: email.to_string(),
            key: key.to_string(),
        };
        let _ = self.key_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_events_reach_receiver() {
        let (signals, mut log_rx, _key_rx) = Signals::channel();
        signals.log("✅ logged in");
        assert_eq!(log_rx.recv().await.unwrap(), "✅ logged in");
    }

    #[tokio::test]
    async fn test_key_found_events_are_structured() {
        let (signals, _log_rx, mut key_rx) = Signals::channel();
        signals.key_found("a@b.c", "ABCDE-12345");
        let event = key_rx.recv().await.unwrap();
        assert_eq!(event.email, "a@b.c");
        assert_eq!(event.key, "ABCDE-12345");
    }

    #[test]
    fn test_sink_never_panics_without_listeners() {
        let signals = Signals::sink();
        signals.log("nobody listening");
        signals.key_found("a@b.c", "XY9");
    }
}
