//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file only needs the fields it changes.

use std::path::PathBuf;
use std::time::Duration;

use dispatch_core::ModelTier;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Longest accepted rate-limit window (30 days).
pub const MAX_RATE_WINDOW_SECS: u64 = 30 * 24 * 3600;
/// Longest accepted provider stream deadline (1 hour).
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 3600;

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    pub server: ServerSettings,
    pub rate_limit: RateLimitSettings,
    pub budget: BudgetSettings,
    pub tiers: TierSettings,
    pub history: HistorySettings,
    pub cache: CacheSettings,
    pub provider: ProviderSettings,
    pub storage: StorageSettings,
    pub context: ContextSettings,
    pub logging: LoggingSettings,
}

impl DispatchSettings {
    /// Clamp out-of-range values and correct broken invariants. Called
    /// automatically during loading; bad values are corrected with a warning
    /// rather than rejected.
    pub fn validate(&mut self) {
        let budget = &mut self.budget;
        if !(0.0..=1.0).contains(&budget.soft_ratio) {
            let clamped = budget.soft_ratio.clamp(0.0, 1.0);
            tracing::warn!("budget softRatio out of range ({}), clamped to {clamped}", budget.soft_ratio);
            budget.soft_ratio = clamped;
        }
        if budget.ceiling_usd < 0.0 {
            tracing::warn!("budget ceilingUsd negative ({}), using 0", budget.ceiling_usd);
            budget.ceiling_usd = 0.0;
        }
        if budget.window_hours == 0 {
            tracing::warn!("budget windowHours is 0, using 1");
            budget.window_hours = 1;
        }

        let rl = &mut self.rate_limit;
        if rl.max_requests == 0 {
            tracing::warn!("rateLimit maxRequests is 0, using 1");
            rl.max_requests = 1;
        }
        if rl.window_secs == 0 {
            tracing::warn!("rateLimit windowSecs is 0, using 1");
            rl.window_secs = 1;
        }
        if rl.window_secs > MAX_RATE_WINDOW_SECS {
            tracing::warn!(
                "rateLimit windowSecs too large ({}), clamped to {MAX_RATE_WINDOW_SECS}",
                rl.window_secs
            );
            rl.window_secs = MAX_RATE_WINDOW_SECS;
        }

        let server = &mut self.server;
        if server.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            tracing::warn!(
                "server requestTimeoutSecs too large ({}), clamped to {MAX_REQUEST_TIMEOUT_SECS}",
                server.request_timeout_secs
            );
            server.request_timeout_secs = MAX_REQUEST_TIMEOUT_SECS;
        }

        let h = &mut self.history;
        if h.max_turns == 0 {
            h.max_turns = 1;
        }
        if h.keep_recent > h.max_turns {
            tracing::warn!(
                "history keepRecent ({}) > maxTurns ({}), correcting",
                h.keep_recent,
                h.max_turns
            );
            h.keep_recent = h.max_turns;
        }
        if h.fallback_turns == 0 {
            h.fallback_turns = 1;
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Upper bound on one provider stream. Expiry behaves like a client
    /// disconnect.
    pub request_timeout_secs: u64,
}

impl ServerSettings {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_secs: u64,
    pub sweep_interval_secs: u64,
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window_secs: 3600,
            sweep_interval_secs: 600,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BudgetSettings {
    /// Rolling window the spend is summed over.
    pub window_hours: u32,
    /// Spend ceiling for the window, in US dollars.
    pub ceiling_usd: f64,
    /// Fraction of the ceiling at which the top tier is withdrawn.
    pub soft_ratio: f64,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            window_hours: 24,
            ceiling_usd: 5.0,
            soft_ratio: 0.8,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TierProfileSettings {
    pub model: String,
    pub max_output_tokens: u32,
    pub label: String,
}

impl Default for TierProfileSettings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_output_tokens: 2048,
            label: "Standard".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TierSettings {
    pub cheap: TierProfileSettings,
    pub mid: TierProfileSettings,
    pub deep: TierProfileSettings,
}

impl TierSettings {
    pub fn profile(&self, tier: ModelTier) -> &TierProfileSettings {
        match tier {
            ModelTier::Cheap => &self.cheap,
            ModelTier::Mid => &self.mid,
            ModelTier::Deep => &self.deep,
        }
    }
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            cheap: TierProfileSettings {
                model: "claude-haiku-4-5-20251001".to_string(),
                max_output_tokens: 1024,
                label: "Quick answer".to_string(),
            },
            mid: TierProfileSettings::default(),
            deep: TierProfileSettings {
                model: "claude-opus-4-6".to_string(),
                max_output_tokens: 4096,
                label: "Deep analysis".to_string(),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistorySettings {
    /// Only the most recent `max_turns` turns are considered at all.
    pub max_turns: usize,
    /// Estimated token count above which the history is summarized.
    pub token_threshold: u32,
    /// Turns kept verbatim after a summary.
    pub keep_recent: usize,
    /// Turns kept when the summary call fails.
    pub fallback_turns: usize,
    pub summary_max_tokens: u32,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_turns: 20,
            token_threshold: 3000,
            keep_recent: 4,
            fallback_turns: 6,
            summary_max_tokens: 400,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Whether top-tier answers are written to the response cache.
    pub cache_deep_answers: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub base_url: String,
}

impl ProviderSettings {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<SecretString> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .map(SecretString::from)
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub database_path: PathBuf,
    /// Keep the usage ledger in memory only.
    pub in_memory: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: crate::loader::dispatch_dir().join("usage.db"),
            in_memory: false,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// Directory of agency report JSON files, one report per file.
    pub reports_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_policy() {
        let s = DispatchSettings::default();
        assert_eq!(s.rate_limit.max_requests, 20);
        assert_eq!(s.rate_limit.window(), Duration::from_secs(3600));
        assert_eq!(s.history.max_turns, 20);
        assert_eq!(s.history.fallback_turns, 6);
        assert!(!s.cache.cache_deep_answers);
        assert_eq!(s.server.request_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn tier_profiles_by_tier() {
        let tiers = TierSettings::default();
        assert_eq!(tiers.profile(ModelTier::Cheap).label, "Quick answer");
        assert_eq!(tiers.profile(ModelTier::Deep).model, "claude-opus-4-6");
        assert!(
            tiers.profile(ModelTier::Cheap).max_output_tokens
                < tiers.profile(ModelTier::Deep).max_output_tokens
        );
    }

    #[test]
    fn json_field_names_are_camel_case() {
        let json = serde_json::to_value(DispatchSettings::default()).unwrap();
        assert!(json["rateLimit"].get("maxRequests").is_some());
        assert!(json["budget"].get("ceilingUsd").is_some());
        assert!(json["cache"].get("cacheDeepAnswers").is_some());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let s: DispatchSettings =
            serde_json::from_str(r#"{"rateLimit": {"maxRequests": 5}}"#).unwrap();
        assert_eq!(s.rate_limit.max_requests, 5);
        assert_eq!(s.rate_limit.window_secs, 3600);
        assert_eq!(s.server.port, 8787);
    }

    #[test]
    fn validate_corrects_bad_values() {
        let mut s = DispatchSettings::default();
        s.budget.soft_ratio = 1.7;
        s.rate_limit.max_requests = 0;
        s.history.keep_recent = 50;
        s.validate();
        assert_eq!(s.budget.soft_ratio, 1.0);
        assert_eq!(s.rate_limit.max_requests, 1);
        assert_eq!(s.history.keep_recent, s.history.max_turns);
    }

    #[test]
    fn validate_bounds_durations() {
        let mut s = DispatchSettings::default();
        s.rate_limit.window_secs = u64::MAX;
        s.server.request_timeout_secs = u64::MAX;
        s.validate();
        assert_eq!(s.rate_limit.window_secs, MAX_RATE_WINDOW_SECS);
        assert_eq!(s.server.request_timeout_secs, MAX_REQUEST_TIMEOUT_SECS);
        // both are usable as deadlines without overflow
        let now = std::time::Instant::now();
        assert!(now.checked_add(s.rate_limit.window() * 2).is_some());
        assert!(s.server.request_timeout().and_then(|t| now.checked_add(t)).is_some());
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let server = ServerSettings {
            request_timeout_secs: 0,
            ..Default::default()
        };
        assert!(server.request_timeout().is_none());
    }
}
