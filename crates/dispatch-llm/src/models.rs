use dispatch_core::{ModelTier, TokenUsage};

/// Pricing for one Claude model, in US dollars per million tokens.
#[derive(Clone, Debug)]
pub struct ModelPricing {
    pub name: &'static str,
    pub display_name: &'static str,
    pub context_window: usize,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
    pub cache_read_cost_per_mtok: f64,
    pub cache_write_cost_per_mtok: f64,
}

impl ModelPricing {
    pub fn calculate_cost(&self, usage: &TokenUsage) -> f64 {
        let per_mtok = |tokens: u32, rate: f64| tokens as f64 / 1_000_000.0 * rate;
        per_mtok(usage.input_tokens, self.input_cost_per_mtok)
            + per_mtok(usage.output_tokens, self.output_cost_per_mtok)
            + per_mtok(usage.cache_read_tokens, self.cache_read_cost_per_mtok)
            + per_mtok(usage.cache_creation_tokens, self.cache_write_cost_per_mtok)
    }
}

pub static CLAUDE_OPUS_4_6: ModelPricing = ModelPricing {
    name: "claude-opus-4-6",
    display_name: "Claude Opus 4.6",
    context_window: 200_000,
    input_cost_per_mtok: 15.0,
    output_cost_per_mtok: 75.0,
    cache_read_cost_per_mtok: 1.5,
    cache_write_cost_per_mtok: 18.75,
};

pub static CLAUDE_SONNET_4_5: ModelPricing = ModelPricing {
    name: "claude-sonnet-4-5-20250929",
    display_name: "Claude Sonnet 4.5",
    context_window: 200_000,
    input_cost_per_mtok: 3.0,
    output_cost_per_mtok: 15.0,
    cache_read_cost_per_mtok: 0.3,
    cache_write_cost_per_mtok: 3.75,
};

pub static CLAUDE_HAIKU_4_5: ModelPricing = ModelPricing {
    name: "claude-haiku-4-5-20251001",
    display_name: "Claude Haiku 4.5",
    context_window: 200_000,
    input_cost_per_mtok: 1.0,
    output_cost_per_mtok: 5.0,
    cache_read_cost_per_mtok: 0.1,
    cache_write_cost_per_mtok: 1.25,
};

static ALL_MODELS: &[&ModelPricing] = &[&CLAUDE_OPUS_4_6, &CLAUDE_SONNET_4_5, &CLAUDE_HAIKU_4_5];

pub fn find_model(name: &str) -> Option<&'static ModelPricing> {
    ALL_MODELS.iter().find(|m| m.name == name).copied()
}

/// Reference model for a tier. Used to price calls whose configured model
/// is missing from the table.
pub fn default_model_for(tier: ModelTier) -> &'static ModelPricing {
    match tier {
        ModelTier::Cheap => &CLAUDE_HAIKU_4_5,
        ModelTier::Mid => &CLAUDE_SONNET_4_5,
        ModelTier::Deep => &CLAUDE_OPUS_4_6,
    }
}

/// Cost of one call. Unknown models are priced at the tier's reference
/// model so spend is never under-counted as zero.
pub fn cost_of(model: &str, tier: ModelTier, usage: &TokenUsage) -> f64 {
    find_model(model)
        .unwrap_or_else(|| default_model_for(tier))
        .calculate_cost(usage)
}

pub fn all_models() -> &'static [&'static ModelPricing] {
    ALL_MODELS
}
