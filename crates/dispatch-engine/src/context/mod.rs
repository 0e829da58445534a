//! Domain context for a chat request.
//!
//! Gathering and compression are separate stages: [`DomainDataSource`]
//! touches the slow collaborators once per request, and
//! [`compress::compress`] renders the result for a tier without refetching.

pub mod compress;
pub mod sources;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ContextError;

pub use compress::{compress, fallback_context};
pub use sources::{DirectoryReportSource, StaticReportSource};

/// System prompt shared by every tier.
pub const SYSTEM_PROMPT: &str = include_str!("../../prompts/system.txt");

/// Default per-source fetch deadline.
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

/// One agency's latest report.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgencyReport {
    pub agency: String,
    pub summary: String,
    /// Headline figures, rendered in key order.
    pub metrics: BTreeMap<String, serde_json::Value>,
    pub details: Vec<String>,
    /// Pages this report is most relevant to, such as `/grid`.
    pub pages: Vec<String>,
}

impl AgencyReport {
    pub fn is_relevant_to(&self, page: &str) -> bool {
        let page = page.trim_end_matches('/');
        self.pages.iter().any(|p| {
            let p = p.trim_end_matches('/');
            !p.is_empty() && (page == p || page.starts_with(&format!("{p}/")))
        })
    }
}

/// Everything gathered for one request. Never reused across requests.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RawContext {
    pub date: NaiveDate,
    pub page: String,
    pub reports: Vec<AgencyReport>,
    /// Sources that failed; their data is missing from `reports`.
    pub degraded: Vec<String>,
}

impl RawContext {
    pub fn new(page: impl Into<String>) -> Self {
        Self {
            date: Utc::now().date_naive(),
            page: page.into(),
            reports: Vec::new(),
            degraded: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// The domain-data collaborator.
#[async_trait]
pub trait DomainDataSource: Send + Sync {
    /// Best-effort gather. Partial failure is reported through
    /// [`RawContext::degraded`]; `Err` means nothing usable was found.
    async fn assemble(&self, page: &str) -> Result<RawContext, ContextError>;
}

/// One agency feed.
#[async_trait]
pub trait ReportSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<AgencyReport, ContextError>;
}

/// Fetches every [`ReportSource`] concurrently.
pub struct ReportAssembler {
    sources: Vec<Arc<dyn ReportSource>>,
    source_timeout: Duration,
}

impl ReportAssembler {
    pub fn new(sources: Vec<Arc<dyn ReportSource>>) -> Self {
        Self {
            sources,
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
        }
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    async fn fetch_one(&self, source: &Arc<dyn ReportSource>) -> Result<AgencyReport, ContextError> {
        match tokio::time::timeout(self.source_timeout, source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(ContextError::Source {
                source_name: source.name().to_string(),
                message: format!("timed out after {}s", self.source_timeout.as_secs()),
            }),
        }
    }
}

#[async_trait]
impl DomainDataSource for ReportAssembler {
    async fn assemble(&self, page: &str) -> Result<RawContext, ContextError> {
        let mut raw = RawContext::new(page);
        if self.sources.is_empty() {
            return Ok(raw);
        }

        let results = join_all(self.sources.iter().map(|s| self.fetch_one(s))).await;
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(report) => raw.reports.push(report),
                Err(error) => {
                    warn!(source = source.name(), %error, "report source failed");
                    raw.degraded.push(source.name().to_string());
                }
            }
        }

        if raw.reports.is_empty() {
            return Err(ContextError::AllSourcesFailed(self.sources.len()));
        }
        debug!(
            reports = raw.reports.len(),
            degraded = raw.degraded.len(),
            "context assembled"
        );
        Ok(raw)
    }
}
