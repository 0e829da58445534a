use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{AgencyReport, ReportSource};
use crate::error::ContextError;

/// One agency report stored as a JSON file. The file is re-read on every
/// fetch so updates show up without a restart.
pub struct DirectoryReportSource {
    name: String,
    path: PathBuf,
}

impl DirectoryReportSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, path }
    }

    /// One source per `*.json` file in `dir`, sorted by file name.
    pub fn discover(dir: &Path) -> Result<Vec<Arc<dyn ReportSource>>, ContextError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| ContextError::Io(format!("{}: {e}", dir.display())))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        debug!(dir = %dir.display(), reports = paths.len(), "discovered report files");

        Ok(paths
            .into_iter()
            .map(|p| Arc::new(Self::new(p)) as Arc<dyn ReportSource>)
            .collect())
    }
}

#[async_trait]
impl ReportSource for DirectoryReportSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<AgencyReport, ContextError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ContextError::Io(format!("{}: {e}", self.path.display())))?;
        let mut report: AgencyReport =
            serde_json::from_str(&raw).map_err(|e| ContextError::InvalidReport {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;
        if report.agency.trim().is_empty() {
            report.agency = self.name.clone();
        }
        Ok(report)
    }
}

/// A fixed report held in memory.
pub struct StaticReportSource {
    report: AgencyReport,
}

impl StaticReportSource {
    pub fn new(report: AgencyReport) -> Self {
        Self { report }
    }
}

#[async_trait]
impl ReportSource for StaticReportSource {
    fn name(&self) -> &str {
        &self.report.agency
    }

    async fn fetch(&self) -> Result<AgencyReport, ContextError> {
        Ok(self.report.clone())
    }
}
