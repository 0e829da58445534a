use dispatch_core::ChatTurn;

/// Per-turn framing overhead.
const TURN_OVERHEAD: u32 = 4;

/// Estimate token count for text content.
/// Approximation: bytes / 4, rounded up.
pub fn estimate_text_tokens(text: &str) -> u32 {
    u32::try_from(text.len().div_ceil(4)).unwrap_or(u32::MAX)
}

pub fn estimate_turn_tokens(turn: &ChatTurn) -> u32 {
    TURN_OVERHEAD.saturating_add(estimate_text_tokens(&turn.content))
}

pub fn estimate_history_tokens(turns: &[ChatTurn]) -> u32 {
    turns
        .iter()
        .map(estimate_turn_tokens)
        .fold(0u32, u32::saturating_add)
}
