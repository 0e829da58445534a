use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::tokens::TokenUsage;

/// Events emitted by a provider while streaming one completion. Ordering
/// contract:
///
/// Start → TextDelta* → (Done | Error)
///
/// Nothing follows a terminal event.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Start,
    TextDelta { delta: String },
    Done { usage: TokenUsage, stop_reason: StopReason },
    Error { error: GatewayError },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
}

impl StopReason {
    pub fn from_provider(raw: Option<&str>) -> Self {
        match raw {
            Some("max_tokens") => Self::MaxTokens,
            Some("stop_sequence") => Self::StopSequence,
            _ => Self::EndTurn,
        }
    }
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
