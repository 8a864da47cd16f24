//! Events streamed from a running session to its consumer.

use serde_json::Value;
use tokio::sync::mpsc;

/// One observable step of a session turn. The embedding UI renders
/// these; the session never blocks on the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Assistant-visible text for the chat transcript.
    AssistantText(String),
    ToolStarted {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolFinished {
        id: String,
        name: String,
        ok: bool,
        summary: String,
    },
    /// Advisory line from the runtime itself (canonicalization notes,
    /// loop warnings, slow-tool warnings).
    SystemNotice(String),
    Error(String),
    Cancelled,
}

/// Fire-and-forget sender. A consumer that went away is not an error.
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that drops everything, for headless use.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn notice<S: Into<String>>(&self, text: S) {
        self.emit(SessionEvent::SystemNotice(text.into()));
    }
}
