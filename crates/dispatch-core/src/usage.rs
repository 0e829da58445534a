use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::tier::ModelTier;
use crate::tokens::TokenUsage;

/// Model id recorded for answers that never reached a provider.
pub const NO_MODEL: &str = "none";

/// Append-only record of one produced answer (or auxiliary model call).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UsageEvent {
    pub session_id: SessionId,
    pub tier: ModelTier,
    pub model_id: String,
    /// Every prompt-side token, including the two cache counts below.
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_read_tokens: u32,
    #[serde(default)]
    pub cache_creation_tokens: u32,
    pub query_type: String,
    pub page: String,
    pub was_cached: bool,
    pub was_local: bool,
    pub timestamp: DateTime<Utc>,
}

impl UsageEvent {
    /// A paid model call.
    pub fn model_call(
        session_id: SessionId,
        tier: ModelTier,
        model_id: impl Into<String>,
        usage: TokenUsage,
        query_type: impl Into<String>,
        page: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            tier,
            model_id: model_id.into(),
            input_tokens: usage.total_input(),
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_tokens,
            cache_creation_tokens: usage.cache_creation_tokens,
            query_type: query_type.into(),
            page: page.into(),
            was_cached: false,
            was_local: false,
            timestamp: Utc::now(),
        }
    }

    /// A zero-cost answer served by the local matcher or the response cache.
    pub fn free_answer(
        session_id: SessionId,
        tier: ModelTier,
        query_type: impl Into<String>,
        page: impl Into<String>,
        cached: bool,
    ) -> Self {
        Self {
            session_id,
            tier,
            model_id: NO_MODEL.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            query_type: query_type.into(),
            page: page.into(),
            was_cached: cached,
            was_local: !cached,
            timestamp: Utc::now(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.was_cached || self.was_local
    }

    /// The provider-reported split, for pricing. Cache reads and writes are
    /// billed at their own rates.
    pub fn token_usage(&self) -> TokenUsage {
        let cached = self.cache_read_tokens.saturating_add(self.cache_creation_tokens);
        TokenUsage {
            input_tokens: self.input_tokens.saturating_sub(cached),
            output_tokens: self.output_tokens,
            cache_read_tokens: self.cache_read_tokens,
            cache_creation_tokens: self.cache_creation_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_call_counts_cached_prompt_tokens() {
        let usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 40,
            cache_read_tokens: 900,
            cache_creation_tokens: 0,
        };
        let event = UsageEvent::model_call(
            SessionId::from_raw("s1"),
            ModelTier::Mid,
            "model-x",
            usage,
            "status",
            "/dashboard",
        );
        assert_eq!(event.input_tokens, 1000);
        assert_eq!(event.output_tokens, 40);
        assert!(!event.is_free());
        assert_eq!(event.token_usage(), usage);
    }

    #[test]
    fn free_answers_are_flagged() {
        let local = UsageEvent::free_answer(SessionId::anonymous(), ModelTier::Cheap, "local", "/", false);
        assert!(local.was_local && !local.was_cached);
        assert_eq!(local.model_id, NO_MODEL);

        let cached = UsageEvent::free_answer(SessionId::anonymous(), ModelTier::Mid, "status", "/", true);
        assert!(cached.was_cached && !cached.was_local);
        assert!(cached.is_free());
    }
}
