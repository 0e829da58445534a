use std::time::Duration;

use dispatch_core::GatewayError;

/// Failures reported before any event is streamed. Everything after the
/// first event is reported in-band as an `error` event instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("rate limit exceeded")]
    RateLimited { remaining: u32, retry_after: Duration },
}

/// Raw context assembly failed outright. Partial failures are carried as
/// degradation markers on the assembled context instead.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("report source {source_name} failed: {message}")]
    Source { source_name: String, message: String },

    #[error("all {0} report sources failed")]
    AllSourcesFailed(usize),

    #[error("IO error: {0}")]
    Io(String),

    #[error("invalid report {path}: {message}")]
    InvalidReport { path: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("summary call failed: {0}")]
    Provider(#[from] GatewayError),

    #[error("summary call returned no text")]
    EmptySummary,

    #[error("summary stream ended without completing")]
    Incomplete,
}

/// The answer text carried a marker that does not follow the annotation
/// grammar.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("unterminated {tag} marker at byte {offset}")]
    Unterminated { tag: &'static str, offset: usize },

    #[error("invalid {tag} payload: {detail}")]
    InvalidPayload { tag: &'static str, detail: String },
}

#[derive(Debug, thiserror::Error)]
#[error("cache write failed: {0}")]
pub struct CacheWriteError(pub String);
