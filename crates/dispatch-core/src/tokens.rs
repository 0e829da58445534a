use serde::{Deserialize, Serialize};

/// Per-call token usage, raw from the provider.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cache_read_tokens: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cache_creation_tokens: u32,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Default::default()
        }
    }

    /// Total prompt-side tokens, counting provider-side prompt caching.
    pub fn total_input(&self) -> u32 {
        self.input_tokens + self.cache_read_tokens + self.cache_creation_tokens
    }

    pub fn is_zero(&self) -> bool {
        self.total_input() == 0 && self.output_tokens == 0
    }
}
