//! Support types for bidirectional (live) mode.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::content::{Blob, Content, Role};

/// One client-to-model request in live mode.
#[derive(Debug, Clone, Default)]
pub struct LiveRequest {
    /// A content turn to send.
    pub content: Option<Content>,
    /// Raw realtime bytes to send.
    pub blob: Option<Blob>,
    /// Close the connection.
    pub close: bool,
}

/// The queue feeding a live connection's sender task.
///
/// Cloneable; senders push from anywhere, the single sender task drains.
#[derive(Debug, Clone)]
pub struct LiveRequestQueue {
    tx: mpsc::UnboundedSender<LiveRequest>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<LiveRequest>>>,
}

impl LiveRequestQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Enqueue a content turn.
    pub fn send_content(&self, content: Content) {
        let _ = self.tx.send(LiveRequest {
            content: Some(content),
            ..LiveRequest::default()
        });
    }

    /// Enqueue realtime bytes.
    pub fn send_realtime(&self, blob: Blob) {
        let _ = self.tx.send(LiveRequest {
            blob: Some(blob),
            ..LiveRequest::default()
        });
    }

    /// Enqueue a close signal.
    pub fn close(&self) {
        let _ = self.tx.send(LiveRequest {
            close: true,
            ..LiveRequest::default()
        });
    }

    /// Dequeue the next request. `None` when all senders are gone.
    pub async fn recv(&self) -> Option<LiveRequest> {
        self.rx.lock().await.recv().await
    }
}

impl Default for LiveRequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A running streaming-tool task, cancellable by tool name.
#[derive(Debug)]
pub struct ActiveStreamingTool {
    /// The background task piping results into the live queue.
    pub task: JoinHandle<()>,
}

/// One cached entry of live audio/text awaiting transcription into
/// regular history.
#[derive(Debug, Clone)]
pub struct TranscriptionEntry {
    /// Which side produced the entry.
    pub role: Role,
    /// Text payload, when already textual.
    pub text: Option<String>,
    /// Raw payload, when audio/video.
    pub data: Option<Blob>,
}

impl TranscriptionEntry {
    /// Convert into a plain content turn for history seeding.
    #[must_use]
    pub fn into_content(self) -> Option<Content> {
        match (self.text, self.data) {
            (Some(text), _) => Some(Content::new(
                self.role,
                vec![crate::content::Part::text(text)],
            )),
            (None, Some(blob)) => Some(Content::new(
                self.role,
                vec![crate::content::Part::InlineData(blob)],
            )),
            (None, None) => None,
        }
    }
}
