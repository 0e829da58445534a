use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use dispatch_core::stream::StopReason;
use dispatch_core::{CompletionRequest, GatewayError, LlmProvider, ProviderStream, StreamEvent, TokenUsage};

/// Pre-programmed responses for deterministic tests without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Yield these events, then end.
    Stream(Vec<StreamEvent>),
    /// Yield these events, then never yield again. For cancellation and
    /// timeout tests.
    Hang(Vec<StreamEvent>),
    /// Fail the `stream()` call itself.
    Error(GatewayError),
    /// Sleep, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// One text delta followed by `Done` with the given usage.
    pub fn stream_text(text: &str, usage: TokenUsage) -> Self {
        Self::stream_chunks(&[text], usage)
    }

    /// One delta per chunk followed by `Done` with the given usage.
    pub fn stream_chunks(chunks: &[&str], usage: TokenUsage) -> Self {
        let mut events = vec![StreamEvent::Start];
        events.extend(chunks.iter().map(|c| StreamEvent::TextDelta {
            delta: c.to_string(),
        }));
        events.push(StreamEvent::Done {
            usage,
            stop_reason: StopReason::EndTurn,
        });
        Self::Stream(events)
    }

    /// Some text, then a mid-stream error.
    pub fn stream_error(partial: &str, error: GatewayError) -> Self {
        let mut events = vec![StreamEvent::Start];
        if !partial.is_empty() {
            events.push(StreamEvent::TextDelta {
                delta: partial.to_string(),
            });
        }
        events.push(StreamEvent::Error { error });
        Self::Stream(events)
    }

    /// Some text, then silence.
    pub fn hang_after(chunks: &[&str]) -> Self {
        let mut events = vec![StreamEvent::Start];
        events.extend(chunks.iter().map(|c| StreamEvent::TextDelta {
            delta: c.to_string(),
        }));
        Self::Hang(events)
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Provider that replays responses in order and records every request.
pub struct MockProvider {
    responses: Vec<MockResponse>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every request received so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ProviderStream, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let Some(response) = self.responses.get(idx).cloned() else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };
        resolve_response(response).await
    }
}

/// Nested delays are unrolled iteratively to avoid recursive async.
async fn resolve_response(mut current: MockResponse) -> Result<ProviderStream, GatewayError> {
    loop {
        match current {
            MockResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
            MockResponse::Hang(events) => {
                return Ok(Box::pin(stream::iter(events).chain(stream::pending())))
            }
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}
