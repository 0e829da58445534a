use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use dispatch_core::LlmProvider;
use dispatch_engine::{ChatPipeline, DirectoryReportSource, ReportAssembler};
use dispatch_llm::AnthropicProvider;
use dispatch_server::ServerConfig;
use dispatch_settings::DispatchSettings;
use dispatch_store::{Database, MemoryUsageLedger, SqliteUsageLedger, UsageLedger};
use dispatch_telemetry::{init_telemetry, TelemetryConfig};

/// Tiered chat gateway for the operations dashboard.
#[derive(Debug, Parser)]
#[command(name = "dispatch", version)]
struct Args {
    /// Settings file. Defaults to ~/.dispatch/settings.json when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port, overriding the settings file.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => dispatch_settings::load_settings_from_path(path)?,
        None => dispatch_settings::load_settings()?,
    };
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    settings.validate();

    init_telemetry(&TelemetryConfig {
        level: settings.logging.level.clone(),
        module_levels: vec![],
        json: settings.logging.json,
    });
    tracing::info!("starting dispatch");

    let pipeline = build_pipeline(&settings)?;
    let handle = dispatch_server::start(ServerConfig::from_settings(&settings), pipeline)
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port, "dispatch ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn build_pipeline(settings: &DispatchSettings) -> anyhow::Result<ChatPipeline> {
    let ledger: Arc<dyn UsageLedger> = if settings.storage.in_memory {
        Arc::new(MemoryUsageLedger::new())
    } else {
        let path = &settings.storage.database_path;
        let db = Database::open(path)
            .with_context(|| format!("failed to open usage database {}", path.display()))?;
        Arc::new(SqliteUsageLedger::new(db))
    };

    let provider: Option<Arc<dyn LlmProvider>> = match settings.provider.api_key() {
        Some(key) => Some(Arc::new(AnthropicProvider::new(key, &settings.provider.base_url)?)),
        None => {
            tracing::warn!(
                env = %settings.provider.api_key_env,
                "no API key configured; chat requests will be refused"
            );
            None
        }
    };

    let mut pipeline = ChatPipeline::new(settings, provider, ledger);
    if let Some(dir) = &settings.context.reports_dir {
        let sources = DirectoryReportSource::discover(dir)
            .with_context(|| format!("failed to read reports from {}", dir.display()))?;
        tracing::info!(dir = %dir.display(), sources = sources.len(), "report sources loaded");
        pipeline = pipeline.with_domain(Arc::new(ReportAssembler::new(sources)));
    }
    Ok(pipeline)
}
