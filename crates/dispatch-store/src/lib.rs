pub mod database;
pub mod error;
pub mod schema;
pub mod usage;

pub use database::Database;
pub use error::StoreError;
pub use usage::{MemoryUsageLedger, SqliteUsageLedger, TierUsage, UsageLedger, UsageSummary};
