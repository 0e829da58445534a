use serde::Deserialize;
use serde_json::Value;

use dispatch_core::stream::StopReason;
use dispatch_core::{GatewayError, StreamEvent, TokenUsage};

/// State machine for the Anthropic Messages streaming protocol.
///
/// Only text content is surfaced. Usage arrives in two parts: prompt-side
/// counts on `message_start`, the output count on `message_delta`.
#[derive(Default)]
pub struct SseParser {
    usage: TokenUsage,
    stop_reason: Option<String>,
    finished: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal event has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Parse one SSE event into zero or more stream events.
    pub fn parse_event(&mut self, event_type: &str, data: &str) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut events = Vec::new();

        match event_type {
            "message_start" => {
                if let Ok(msg) = serde_json::from_str::<MessageStartEvent>(data) {
                    if let Some(usage) = msg.message.usage {
                        self.usage.input_tokens = usage.input_tokens.unwrap_or(0);
                        self.usage.cache_read_tokens = usage.cache_read_input_tokens.unwrap_or(0);
                        self.usage.cache_creation_tokens =
                            usage.cache_creation_input_tokens.unwrap_or(0);
                    }
                }
                events.push(StreamEvent::Start);
            }

            "content_block_delta" => {
                if let Ok(delta) = serde_json::from_str::<ContentBlockDeltaEvent>(data) {
                    if delta.delta.get("type").and_then(Value::as_str) == Some("text_delta") {
                        let text = delta.delta.get("text").and_then(Value::as_str).unwrap_or("");
                        if !text.is_empty() {
                            events.push(StreamEvent::TextDelta {
                                delta: text.to_string(),
                            });
                        }
                    }
                }
            }

            "message_delta" => {
                if let Ok(delta) = serde_json::from_str::<MessageDeltaEvent>(data) {
                    if let Some(usage) = delta.usage {
                        if let Some(output) = usage.output_tokens {
                            self.usage.output_tokens = output;
                        }
                    }
                    if let Some(reason) = delta.delta.and_then(|d| d.stop_reason) {
                        self.stop_reason = Some(reason);
                    }
                }
            }

            "message_stop" => {
                self.finished = true;
                events.push(StreamEvent::Done {
                    usage: self.usage,
                    stop_reason: StopReason::from_provider(self.stop_reason.as_deref()),
                });
            }

            "error" => {
                self.finished = true;
                let error = match serde_json::from_str::<ErrorEvent>(data) {
                    Ok(err) => classify_error(&err),
                    Err(_) => GatewayError::StreamInterrupted(format!("malformed error event: {data}")),
                };
                events.push(StreamEvent::Error { error });
            }

            // ping, content_block_start/stop
            _ => {}
        }

        events
    }

    /// Usage accumulated so far.
    pub fn token_usage(&self) -> TokenUsage {
        self.usage
    }
}

fn classify_error(err: &ErrorEvent) -> GatewayError {
    match err.error.error_type.as_str() {
        "overloaded_error" => GatewayError::ProviderOverloaded,
        "rate_limit_error" => GatewayError::RateLimited { retry_after: None },
        "authentication_error" | "permission_error" => {
            GatewayError::AuthenticationFailed(err.error.message.clone())
        }
        "invalid_request_error" | "not_found_error" => {
            GatewayError::InvalidRequest(err.error.message.clone())
        }
        _ => GatewayError::ServerError {
            status: 500,
            body: err.error.message.clone(),
        },
    }
}

/// Split raw SSE text into (event_type, data) pairs. Multi-line `data:`
/// fields are joined with newlines.
pub fn parse_sse_lines(raw: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut event = String::new();
    let mut data: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if line.is_empty() {
            flush_event(&mut events, &mut event, &mut data);
        } else if let Some(value) = line.strip_prefix("event:") {
            event = value.trim_start().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value));
        }
        // comments (":") and unknown fields are ignored
    }
    flush_event(&mut events, &mut event, &mut data);

    events
}

fn flush_event(events: &mut Vec<(String, String)>, event: &mut String, data: &mut Vec<&str>) {
    if !event.is_empty() || !data.is_empty() {
        events.push((std::mem::take(event), data.join("\n")));
        data.clear();
    }
}

#[derive(Deserialize)]
struct MessageStartEvent {
    message: MessageStartPayload,
}

#[derive(Deserialize)]
struct MessageStartPayload {
    usage: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct UsagePayload {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    cache_read_input_tokens: Option<u32>,
    cache_creation_input_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ContentBlockDeltaEvent {
    delta: Value,
}

#[derive(Deserialize)]
struct MessageDeltaEvent {
    delta: Option<MessageDeltaPayload>,
    usage: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct MessageDeltaPayload {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorPayload,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = r#"{"type":"message_start","message":{"id":"msg_1","role":"assistant","content":[],"model":"claude-haiku-4-5-20251001","usage":{"input_tokens":120,"output_tokens":1,"cache_read_input_tokens":30}}}"#;

    fn delta(text: &str) -> String {
        serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": text}
        })
        .to_string()
    }

    #[test]
    fn text_stream_with_usage() {
        let mut parser = SseParser::new();
        let events = parser.parse_event("message_start", START);
        assert!(matches!(events[..], [StreamEvent::Start]));

        assert!(parser
            .parse_event("content_block_start", r#"{"index":0,"content_block":{"type":"text","text":""}}"#)
            .is_empty());

        let events = parser.parse_event("content_block_delta", &delta("Reserve margin "));
        assert!(matches!(&events[..], [StreamEvent::TextDelta { delta }] if delta == "Reserve margin "));
        parser.parse_event("content_block_delta", &delta("is 14%."));
        parser.parse_event("content_block_stop", r#"{"index":0}"#);
        parser.parse_event(
            "message_delta",
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":42}}"#,
        );

        let events = parser.parse_event("message_stop", r#"{"type":"message_stop"}"#);
        match &events[..] {
            [StreamEvent::Done { usage, stop_reason }] => {
                assert_eq!(usage.input_tokens, 120);
                assert_eq!(usage.cache_read_tokens, 30);
                assert_eq!(usage.output_tokens, 42);
                assert_eq!(*stop_reason, StopReason::EndTurn);
            }
            other => panic!("expected Done, got {other:?}"),
        }
        assert!(parser.is_finished());
    }

    #[test]
    fn max_tokens_stop_reason() {
        let mut parser = SseParser::new();
        parser.parse_event("message_start", START);
        parser.parse_event(
            "message_delta",
            r#"{"delta":{"stop_reason":"max_tokens"},"usage":{"output_tokens":1024}}"#,
        );
        let events = parser.parse_event("message_stop", "{}");
        assert!(matches!(
            &events[..],
            [StreamEvent::Done { stop_reason: StopReason::MaxTokens, .. }]
        ));
    }

    #[test]
    fn empty_and_non_text_deltas_are_skipped() {
        let mut parser = SseParser::new();
        assert!(parser.parse_event("content_block_delta", &delta("")).is_empty());
        assert!(parser
            .parse_event(
                "content_block_delta",
                r#"{"delta":{"type":"input_json_delta","partial_json":"{"}}"#
            )
            .is_empty());
        assert!(parser.parse_event("ping", "{}").is_empty());
    }

    #[test]
    fn error_events_are_classified() {
        let cases = [
            ("overloaded_error", "provider_overloaded"),
            ("rate_limit_error", "rate_limited"),
            ("authentication_error", "authentication_failed"),
            ("invalid_request_error", "invalid_request"),
            ("api_error", "server_error"),
        ];
        for (kind, expected) in cases {
            let mut parser = SseParser::new();
            let data = format!(r#"{{"type":"error","error":{{"type":"{kind}","message":"m"}}}}"#);
            match &parser.parse_event("error", &data)[..] {
                [StreamEvent::Error { error }] => assert_eq!(error.error_kind(), expected),
                other => panic!("expected error for {kind}, got {other:?}"),
            }
        }
    }

    #[test]
    fn nothing_after_terminal_event() {
        let mut parser = SseParser::new();
        parser.parse_event("message_stop", "{}");
        assert!(parser.parse_event("content_block_delta", &delta("late")).is_empty());
        assert!(parser.parse_event("message_stop", "{}").is_empty());
    }

    #[test]
    fn parse_lines_handles_spacing_and_multiline_data() {
        let raw = "event: message_start\ndata: {\"a\":1}\n\nevent:ping\ndata:{}\n\n: comment\ndata: line1\ndata: line2\n\n";
        let events = parse_sse_lines(raw);
        assert_eq!(
            events,
            vec![
                ("message_start".to_string(), "{\"a\":1}".to_string()),
                ("ping".to_string(), "{}".to_string()),
                (String::new(), "line1\nline2".to_string()),
            ]
        );
    }

    #[test]
    fn parse_lines_flushes_trailing_event() {
        let events = parse_sse_lines("event: message_stop\ndata: {}");
        assert_eq!(events, vec![("message_stop".to_string(), "{}".to_string())]);
    }
}
