use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, warn};

use dispatch_core::{ChatTurn, CompletionRequest, LlmProvider, StreamEvent, TokenUsage};
use dispatch_settings::HistorySettings;

use crate::error::HistoryError;
use crate::tokens::estimate_history_tokens;

const SUMMARY_PROMPT: &str = "Summarize the conversation below for another assistant that will \
continue it. Keep every figure, name, date and open question. Write plain prose, no preamble.";

const SUMMARY_PREFIX: &str = "[Summary of the earlier conversation]";

pub const DEFAULT_SUMMARY_TIMEOUT: Duration = Duration::from_secs(20);

/// How the history was reduced.
#[derive(Clone, Debug, PartialEq)]
pub enum HistoryMode {
    Unchanged,
    /// Older turns replaced by one summary turn. Carries the summary call's
    /// token usage.
    Summarized { usage: TokenUsage },
    /// Summary call failed; only the most recent turns were kept.
    Truncated,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompressedHistory {
    pub turns: Vec<ChatTurn>,
    pub mode: HistoryMode,
}

/// Condenses long histories with one cheap model call.
pub struct HistoryCompressor {
    provider: Arc<dyn LlmProvider>,
    model: String,
    settings: HistorySettings,
    summary_timeout: Duration,
}

impl HistoryCompressor {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, settings: HistorySettings) -> Self {
        Self {
            provider,
            model: model.into(),
            settings,
            summary_timeout: DEFAULT_SUMMARY_TIMEOUT,
        }
    }

    pub fn with_summary_timeout(mut self, timeout: Duration) -> Self {
        self.summary_timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Never fails: a failed summary call falls back to truncation.
    pub async fn compress(&self, history: &[ChatTurn]) -> CompressedHistory {
        let start = history.len().saturating_sub(self.settings.max_turns);
        let capped = &history[start..];

        let tokens = estimate_history_tokens(capped);
        if tokens <= self.settings.token_threshold || capped.len() <= self.settings.keep_recent {
            return CompressedHistory {
                turns: capped.to_vec(),
                mode: HistoryMode::Unchanged,
            };
        }

        let split = capped.len() - self.settings.keep_recent;
        let (older, recent) = capped.split_at(split);
        debug!(tokens, older = older.len(), recent = recent.len(), "summarizing history");

        let outcome = match tokio::time::timeout(self.summary_timeout, self.summarize(older)).await {
            Ok(result) => result,
            Err(_) => Err(HistoryError::Provider(dispatch_core::GatewayError::Timeout(
                self.summary_timeout,
            ))),
        };

        match outcome {
            Ok((summary, usage)) => {
                let mut turns = Vec::with_capacity(recent.len() + 1);
                turns.push(ChatTurn::user(format!("{SUMMARY_PREFIX}\n{summary}")));
                turns.extend_from_slice(recent);
                CompressedHistory {
                    turns,
                    mode: HistoryMode::Summarized { usage },
                }
            }
            Err(error) => {
                warn!(%error, "history summary failed, truncating");
                self.truncated(capped)
            }
        }
    }

    fn truncated(&self, capped: &[ChatTurn]) -> CompressedHistory {
        let keep = capped.len().saturating_sub(self.settings.fallback_turns);
        CompressedHistory {
            turns: capped[keep..].to_vec(),
            mode: HistoryMode::Truncated,
        }
    }

    async fn summarize(&self, older: &[ChatTurn]) -> Result<(String, TokenUsage), HistoryError> {
        let transcript = older
            .iter()
            .map(|t| format!("{}: {}", t.role.as_str(), t.content.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");
        let request = CompletionRequest {
            model: self.model.clone(),
            max_tokens: self.settings.summary_max_tokens,
            system: SUMMARY_PROMPT.to_string(),
            messages: vec![ChatTurn::user(transcript)],
        };

        let mut stream = self.provider.stream(&request).await?;
        let mut summary = String::new();
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Start => {}
                StreamEvent::TextDelta { delta } => summary.push_str(&delta),
                StreamEvent::Done { usage, .. } => {
                    let summary = summary.trim();
                    if summary.is_empty() {
                        return Err(HistoryError::EmptySummary);
                    }
                    return Ok((summary.to_string(), usage));
                }
                StreamEvent::Error { error } => return Err(error.into()),
            }
        }
        Err(HistoryError::Incomplete)
    }
}
