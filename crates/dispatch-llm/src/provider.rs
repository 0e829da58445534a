use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::instrument;

use dispatch_core::{CompletionRequest, GatewayError, LlmProvider, ProviderStream, StreamEvent};

use crate::converter;
use crate::sse::{self, SseParser};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Streaming client for the Anthropic Messages API, authenticated with an
/// API key. One instance serves every tier; the model comes from the
/// request.
pub struct AnthropicProvider {
    client: Client,
    api_key: SecretString,
    endpoint: String,
    idle_timeout: Duration,
}

impl AnthropicProvider {
    pub fn new(api_key: SecretString, base_url: &str) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
            idle_timeout: SSE_IDLE_TIMEOUT,
        })
    }

    /// Override how long the stream may sit without data before it fails.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    #[instrument(skip_all, fields(model = %request.model))]
    async fn stream(&self, request: &CompletionRequest) -> Result<ProviderStream, GatewayError> {
        let body = converter::build_request_body(request);

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(status, "provider rejected request");
            return Err(match GatewayError::from_status(status, body) {
                GatewayError::RateLimited { .. } => GatewayError::RateLimited { retry_after },
                other => other,
            });
        }

        Ok(Box::pin(SseStream::with_idle_timeout(
            resp.bytes_stream(),
            self.idle_timeout,
        )))
    }
}

/// Adapts a reqwest byte stream into [`StreamEvent`]s. Fails with
/// `StreamInterrupted` if no bytes arrive within the idle timeout, or if
/// the body ends before a terminal event.
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: SseParser,
    /// Undecoded bytes. Decoding waits for a complete frame so a multi-byte
    /// character split across chunks survives.
    buffer: BytesMut,
    pending: VecDeque<StreamEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    closed: bool,
}

impl SseStream {
    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: SseParser::new(),
            buffer: BytesMut::with_capacity(8192),
            pending: VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            closed: false,
        }
    }

    /// Parse every complete SSE frame in the buffer. With `all`, the
    /// trailing partial frame is parsed too.
    fn drain_frames(&mut self, all: bool) {
        loop {
            let frame = match frame_end(&self.buffer) {
                Some(end) => self.buffer.split_to(end),
                None if all && !self.buffer.is_empty() => self.buffer.split(),
                None => break,
            };
            let Ok(text) = std::str::from_utf8(&frame) else {
                tracing::warn!(len = frame.len(), "skipping SSE frame with invalid UTF-8");
                continue;
            };
            let text = text.replace("\r\n", "\n");
            for (event_type, data) in sse::parse_sse_lines(&text) {
                self.pending.extend(self.parser.parse_event(&event_type, &data));
            }
        }
    }

    fn fail(&mut self, message: String) -> Poll<Option<StreamEvent>> {
        self.closed = true;
        Poll::Ready(Some(StreamEvent::Error {
            error: GatewayError::StreamInterrupted(message),
        }))
    }
}

impl Stream for SseStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if event.is_terminal() {
                    self.closed = true;
                    self.pending.clear();
                }
                return Poll::Ready(Some(event));
            }
            if self.closed {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(deadline);
                    self.buffer.extend_from_slice(&bytes);
                    self.drain_frames(false);
                }
                Poll::Ready(Some(Err(e))) => return self.fail(e.to_string()),
                Poll::Ready(None) => {
                    self.drain_frames(true);
                    if self.pending.is_empty() && !self.parser.is_finished() {
                        return self.fail("stream ended before message_stop".into());
                    }
                    if self.pending.is_empty() {
                        self.closed = true;
                    }
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        let secs = self.idle_duration.as_secs();
                        return self.fail(format!("idle timeout after {secs}s"));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

/// End offset of the first complete frame: a blank line after `\n` or
/// `\r\n` line endings.
fn frame_end(buf: &[u8]) -> Option<usize> {
    buf.iter().enumerate().find_map(|(i, &b)| {
        if b != b'\n' {
            return None;
        }
        match &buf[i + 1..] {
            [b'\n', ..] => Some(i + 2),
            [b'\r', b'\n', ..] => Some(i + 3),
            _ => None,
        }
    })
}
