use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

use dispatch_core::{ModelTier, UsageEvent};
use dispatch_settings::BudgetSettings;
use dispatch_store::UsageLedger;

/// Spend over the current budgeting window and the cap it implies.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct BudgetStatus {
    /// Highest tier a request may use. `None` means uncapped.
    pub tier_cap: Option<ModelTier>,
    pub spend_usd: f64,
    pub ceiling_usd: f64,
    pub window_hours: u32,
}

impl BudgetStatus {
    /// Effective tier for a classified request. Never above `classified`.
    pub fn apply(&self, classified: ModelTier) -> ModelTier {
        classified.capped(self.tier_cap)
    }
}

/// Cap implied by `spend` against `ceiling`.
///
/// At or above the ceiling only the cheap tier remains; from
/// `soft_ratio × ceiling` the top tier is withdrawn.
pub fn cap_for(spend: f64, ceiling: f64, soft_ratio: f64) -> Option<ModelTier> {
    if ceiling <= 0.0 || spend >= ceiling {
        Some(ModelTier::Cheap)
    } else if spend >= ceiling * soft_ratio {
        Some(ModelTier::Mid)
    } else {
        None
    }
}

/// Dollar cost of one ledger entry.
pub fn event_cost(event: &UsageEvent) -> f64 {
    if event.is_free() {
        return 0.0;
    }
    dispatch_llm::cost_of(&event.model_id, event.tier, &event.token_usage())
}

/// Read-only view over the usage ledger. Safe to call on every request.
pub struct BudgetGovernor {
    ledger: Arc<dyn UsageLedger>,
    settings: BudgetSettings,
}

impl BudgetGovernor {
    pub fn new(ledger: Arc<dyn UsageLedger>, settings: BudgetSettings) -> Self {
        Self { ledger, settings }
    }

    pub fn status(&self) -> BudgetStatus {
        self.status_at(Utc::now())
    }

    /// An unreadable ledger leaves requests uncapped.
    pub fn status_at(&self, now: DateTime<Utc>) -> BudgetStatus {
        let since = now - Duration::hours(i64::from(self.settings.window_hours));
        let spend_usd = match self.ledger.events_since(since) {
            Ok(events) => events.iter().map(event_cost).sum(),
            Err(error) => {
                warn!(%error, "usage ledger unreadable, budget cap not applied");
                return BudgetStatus {
                    tier_cap: None,
                    spend_usd: 0.0,
                    ceiling_usd: self.settings.ceiling_usd,
                    window_hours: self.settings.window_hours,
                };
            }
        };
        BudgetStatus {
            tier_cap: cap_for(spend_usd, self.settings.ceiling_usd, self.settings.soft_ratio),
            spend_usd,
            ceiling_usd: self.settings.ceiling_usd,
            window_hours: self.settings.window_hours,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::{SessionId, TokenUsage};
    use dispatch_store::{MemoryUsageLedger, StoreError};
    use proptest::prelude::*;

    const OPUS: &str = "claude-opus-4-6";

    fn settings(ceiling: f64) -> BudgetSettings {
        BudgetSettings {
            window_hours: 24,
            ceiling_usd: ceiling,
            soft_ratio: 0.8,
        }
    }

    fn opus_call(output_tokens: u32, age: Duration) -> UsageEvent {
        let mut event = UsageEvent::model_call(
            SessionId::from_raw("s1"),
            ModelTier::Deep,
            OPUS,
            TokenUsage::new(0, output_tokens),
            "analysis",
            "/",
        );
        event.timestamp = Utc::now() - age;
        event
    }

    struct BrokenLedger;

    impl UsageLedger for BrokenLedger {
        fn append(&self, _: &UsageEvent) -> Result<(), StoreError> {
            Err(StoreError::Database("disk I/O error".into()))
        }

        fn events_since(&self, _: DateTime<Utc>) -> Result<Vec<UsageEvent>, StoreError> {
            Err(StoreError::Database("disk I/O error".into()))
        }
    }

    #[test]
    fn cap_thresholds() {
        assert_eq!(cap_for(0.0, 5.0, 0.8), None);
        assert_eq!(cap_for(3.99, 5.0, 0.8), None);
        assert_eq!(cap_for(4.0, 5.0, 0.8), Some(ModelTier::Mid));
        assert_eq!(cap_for(5.0, 5.0, 0.8), Some(ModelTier::Cheap));
        assert_eq!(cap_for(0.0, 0.0, 0.8), Some(ModelTier::Cheap));
    }

    #[test]
    fn spend_is_summed_over_window_only() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        // 75_000 opus output tokens = $5.625
        ledger.append(&opus_call(75_000, Duration::hours(30))).unwrap();
        let governor = BudgetGovernor::new(ledger.clone(), settings(5.0));
        assert_eq!(governor.status().tier_cap, None);

        ledger.append(&opus_call(60_000, Duration::hours(1))).unwrap();
        let status = governor.status();
        assert!((status.spend_usd - 4.5).abs() < 1e-9);
        assert_eq!(status.tier_cap, Some(ModelTier::Mid));
        assert_eq!(status.apply(ModelTier::Deep), ModelTier::Mid);
        assert_eq!(status.apply(ModelTier::Cheap), ModelTier::Cheap);
    }

    #[test]
    fn free_answers_cost_nothing() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        for _ in 0..100 {
            ledger
                .append(&UsageEvent::free_answer(
                    SessionId::anonymous(),
                    ModelTier::Deep,
                    "cache_hit",
                    "/",
                    true,
                ))
                .unwrap();
        }
        let governor = BudgetGovernor::new(ledger, settings(0.01));
        assert_eq!(governor.status().spend_usd, 0.0);
        assert_eq!(governor.status().tier_cap, None);
    }

    #[test]
    fn cache_reads_are_priced_at_the_cache_rate() {
        let cached = UsageEvent::model_call(
            SessionId::from_raw("s1"),
            ModelTier::Deep,
            OPUS,
            TokenUsage {
                input_tokens: 100_000,
                output_tokens: 0,
                cache_read_tokens: 900_000,
                cache_creation_tokens: 0,
            },
            "analysis",
            "/",
        );
        let uncached = UsageEvent::model_call(
            SessionId::from_raw("s1"),
            ModelTier::Deep,
            OPUS,
            TokenUsage::new(1_000_000, 0),
            "analysis",
            "/",
        );
        assert_eq!(cached.input_tokens, uncached.input_tokens);
        assert!(event_cost(&cached) < event_cost(&uncached));
        let expected = dispatch_llm::cost_of(OPUS, ModelTier::Deep, &cached.token_usage());
        assert!((event_cost(&cached) - expected).abs() < 1e-9);
    }

    #[test]
    fn status_has_no_side_effects() {
        let ledger = Arc::new(MemoryUsageLedger::new());
        ledger.append(&opus_call(10_000, Duration::minutes(5))).unwrap();
        let governor = BudgetGovernor::new(ledger.clone(), settings(5.0));
        assert_eq!(governor.status(), governor.status());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn unreadable_ledger_fails_open() {
        let governor = BudgetGovernor::new(Arc::new(BrokenLedger), settings(5.0));
        let status = governor.status();
        assert_eq!(status.tier_cap, None);
        assert_eq!(status.apply(ModelTier::Deep), ModelTier::Deep);
    }

    fn tier() -> impl Strategy<Value = ModelTier> {
        prop_oneof![Just(ModelTier::Cheap), Just(ModelTier::Mid), Just(ModelTier::Deep)]
    }

    proptest! {
        #[test]
        fn effective_tier_never_exceeds_classified_or_cap(
            classified in tier(),
            spend in 0.0f64..20.0,
            ceiling in 0.0f64..10.0,
            soft in 0.1f64..1.0,
        ) {
            let cap = cap_for(spend, ceiling, soft);
            let status = BudgetStatus { tier_cap: cap, spend_usd: spend, ceiling_usd: ceiling, window_hours: 24 };
            let effective = status.apply(classified);
            prop_assert!(effective <= classified);
            if let Some(cap) = cap {
                prop_assert!(effective <= cap);
                prop_assert_eq!(effective, classified.min(cap));
            }
        }

        #[test]
        fn more_spend_never_loosens_the_cap(a in 0.0f64..10.0, b in 0.0f64..10.0) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let loose = cap_for(low, 5.0, 0.8).unwrap_or(ModelTier::Deep);
            let tight = cap_for(high, 5.0, 0.8).unwrap_or(ModelTier::Deep);
            prop_assert!(tight <= loose);
        }
    }
}
