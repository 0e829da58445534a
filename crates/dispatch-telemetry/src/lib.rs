mod metrics;

pub use metrics::{Degradation, HistogramSummary, MetricsSnapshot, Outcome, PipelineMetrics};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default filter directive. Overridden by RUST_LOG.
    pub level: String,
    /// Per-module overrides (e.g. "dispatch_llm" => "debug").
    pub module_levels: Vec<(String, String)>,
    /// JSON lines on stdout instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_levels: Vec::new(),
            json: true,
        }
    }
}

impl TelemetryConfig {
    fn filter_directive(&self) -> String {
        let mut filter = self.level.to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_lowercase()));
        }
        filter
    }
}

/// Initialize the tracing subscriber. Call once at startup; later calls
/// (for instance from tests) are ignored.
pub fn init_telemetry(config: &TelemetryConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    if tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_directive_includes_module_levels() {
        let config = TelemetryConfig {
            level: "INFO".into(),
            module_levels: vec![("dispatch_llm".into(), "DEBUG".into())],
            json: false,
        };
        assert_eq!(config.filter_directive(), "info,dispatch_llm=debug");
    }

    #[test]
    fn init_twice_does_not_panic() {
        let config = TelemetryConfig {
            json: false,
            ..Default::default()
        };
        init_telemetry(&config);
        init_telemetry(&config);
    }
}
