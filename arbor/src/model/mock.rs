//! Mock model implementation for testing.
//!
//! Returns scripted responses in sequence, cycling through them, and
//! records every request it receives so tests can assert on the contents
//! handed to the model.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::content::{Blob, Content};
use crate::error::{AgentError, Result};

use super::{Llm, LlmConnection, LlmRequest, LlmResponse, LlmResponseStream};

/// A scripted model for tests.
#[derive(Debug)]
pub struct MockLlm {
    model_name: String,
    responses: Vec<LlmResponse>,
    response_index: AtomicUsize,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlm {
    /// Create a mock serving the given responses in order, cycling.
    #[must_use]
    pub fn scripted(model_name: impl Into<String>, responses: Vec<LlmResponse>) -> Self {
        Self {
            model_name: model_name.into(),
            responses,
            response_index: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: a mock answering every call with the same text.
    #[must_use]
    pub fn text(model_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::scripted(
            model_name,
            vec![LlmResponse::new(Content::model_text(text))],
        )
    }

    /// The requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().expect("request log poisoned").clone()
    }

    fn next_response(&self) -> LlmResponse {
        if self.responses.is_empty() {
            return LlmResponse::error("no_script", "mock has no scripted responses");
        }
        let index = self.response_index.fetch_add(1, Ordering::SeqCst);
        self.responses[index % self.responses.len()].clone()
    }

    fn record(&self, request: &LlmRequest) {
        self.requests
            .lock()
            .expect("request log poisoned")
            .push(request.clone());
    }
}

#[async_trait]
impl Llm for MockLlm {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn generate_content(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.record(request);
        Ok(self.next_response())
    }

    async fn generate_content_stream(&self, request: &LlmRequest) -> Result<LlmResponseStream> {
        self.record(request);
        let response = self.next_response();
        // Mimic an SSE transport: a partial text chunk, then the full
        // response with partial unset.
        let mut items = Vec::new();
        if let Some(content) = &response.content {
            let text = content.text();
            if !text.is_empty() && !response.partial {
                items.push(Ok(
                    LlmResponse::new(Content::model_text(text)).with_partial(true)
                ));
            }
        }
        items.push(Ok(response));
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn connect(&self, request: &LlmRequest) -> Result<Arc<dyn LlmConnection>> {
        self.record(request);
        Ok(Arc::new(MockLlmConnection::scripted(
            self.responses.clone(),
        )))
    }
}

/// What a [`MockLlmConnection`] observed being sent.
#[derive(Debug, Clone)]
pub enum SentItem {
    /// `send_history` payload.
    History(Vec<Content>),
    /// `send_content` payload.
    Content(Content),
    /// `send_realtime` payload.
    Realtime(Blob),
    /// `close` was called.
    Closed,
}

/// A scripted live connection: `receive` yields the scripted responses,
/// sends are recorded for assertions.
#[derive(Debug)]
pub struct MockLlmConnection {
    responses: Mutex<Option<Vec<LlmResponse>>>,
    sent: Mutex<Vec<SentItem>>,
}

impl MockLlmConnection {
    /// Create a connection whose receive stream yields these responses.
    #[must_use]
    pub fn scripted(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(Some(responses)),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Everything sent over the connection so far.
    #[must_use]
    pub fn sent(&self) -> Vec<SentItem> {
        self.sent.lock().expect("sent log poisoned").clone()
    }

    fn push(&self, item: SentItem) {
        self.sent.lock().expect("sent log poisoned").push(item);
    }
}

#[async_trait]
impl LlmConnection for MockLlmConnection {
    async fn send_history(&self, contents: Vec<Content>) -> Result<()> {
        self.push(SentItem::History(contents));
        Ok(())
    }

    async fn send_content(&self, content: Content) -> Result<()> {
        self.push(SentItem::Content(content));
        Ok(())
    }

    async fn send_realtime(&self, blob: Blob) -> Result<()> {
        self.push(SentItem::Realtime(blob));
        Ok(())
    }

    async fn receive(&self) -> Result<LlmResponseStream> {
        let responses = self
            .responses
            .lock()
            .expect("responses lock poisoned")
            .take()
            .ok_or_else(|| AgentError::internal("receive() called twice on mock connection"))?;
        let (tx, rx) = mpsc::unbounded_channel::<Result<LlmResponse>>();
        for response in responses {
            let _ = tx.send(Ok(response));
        }
        drop(tx);
        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    async fn close(&self) -> Result<()> {
        self.push(SentItem::Closed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    #[tokio::test]
    async fn test_mock_cycles_responses() {
        let mock = MockLlm::scripted(
            "mock",
            vec![
                LlmResponse::new(Content::model_text("first")),
                LlmResponse::new(Content::model_text("second")),
            ],
        );
        let request = LlmRequest::new();

        let r1 = mock.generate_content(&request).await.expect("generate");
        let r2 = mock.generate_content(&request).await.expect("generate");
        let r3 = mock.generate_content(&request).await.expect("generate");
        let text = |r: &LlmResponse| r.content.as_ref().map(Content::text);
        assert_eq!(text(&r1).as_deref(), Some("first"));
        assert_eq!(text(&r2).as_deref(), Some("second"));
        assert_eq!(text(&r3).as_deref(), Some("first"));
        assert_eq!(mock.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_stream_ends_with_full_response() {
        let mock = MockLlm::text("mock", "done");
        let mut stream = mock
            .generate_content_stream(&LlmRequest::new())
            .await
            .expect("stream");

        let mut last = None;
        let mut count = 0;
        while let Some(item) = stream.next().await {
            last = Some(item.expect("item"));
            count += 1;
        }
        assert_eq!(count, 2);
        let last = last.expect("non-empty stream");
        assert!(!last.partial);
    }
}
