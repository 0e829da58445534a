//! Shared vocabulary for the dispatch chat pipeline.
//!
//! Nothing in this crate performs I/O. Stage implementations live in
//! `dispatch-engine`; provider implementations live in `dispatch-llm`.

pub mod chat;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod stream;
pub mod tier;
pub mod tokens;
pub mod usage;

pub use chat::{ChatQuery, ChatStreamEvent, MetricSnapshot, SuggestedAction};
pub use errors::GatewayError;
pub use ids::{RequestId, SessionId};
pub use messages::{ChatRole, ChatTurn};
pub use provider::{CompletionRequest, LlmProvider, ProviderStream};
pub use stream::StreamEvent;
pub use tier::{DetailLevel, ModelTier};
pub use tokens::TokenUsage;
pub use usage::UsageEvent;
