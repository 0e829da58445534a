//! The chat request pipeline: admission, free answers, tier selection,
//! context and history preparation, and the streamed model call.

#![deny(unsafe_code)]

pub mod annotations;
pub mod budget;
pub mod cache;
pub mod classify;
pub mod context;
pub mod error;
pub mod history;
pub mod local;
pub mod pipeline;
pub mod rate_limit;
pub mod tokens;
pub mod truncate;

pub use annotations::{Annotations, ExtractedAnswer};
pub use budget::{BudgetGovernor, BudgetStatus};
pub use cache::{CacheEntry, MemoryResponseCache, ResponseCache};
pub use classify::{Classification, KeywordClassifier, QueryClassifier, QueryType};
pub use context::{
    AgencyReport, DirectoryReportSource, DomainDataSource, RawContext, ReportAssembler,
    ReportSource, StaticReportSource,
};
pub use error::{AnnotationError, CacheWriteError, ContextError, HistoryError, PipelineError};
pub use history::{CompressedHistory, HistoryCompressor, HistoryMode};
pub use local::LocalAnswer;
pub use pipeline::{ChatPipeline, ChatStream, PipelineConfig};
pub use rate_limit::{Admission, RateLimiter};
