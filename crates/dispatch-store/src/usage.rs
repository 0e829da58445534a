use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use dispatch_core::{ModelTier, SessionId, UsageEvent};

use crate::database::Database;
use crate::error::StoreError;

/// Append-only record of produced answers. Reads are windowed by time.
pub trait UsageLedger: Send + Sync {
    fn append(&self, event: &UsageEvent) -> Result<(), StoreError>;

    /// Events with `timestamp >= since`, oldest first.
    fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<UsageEvent>, StoreError>;

    fn summary_since(&self, since: DateTime<Utc>) -> Result<UsageSummary, StoreError> {
        Ok(UsageSummary::from_events(since, &self.events_since(since)?))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierUsage {
    pub answers: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Aggregate view of a ledger window.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UsageSummary {
    pub since: DateTime<Utc>,
    pub total_answers: u64,
    pub cached_answers: u64,
    pub local_answers: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub by_tier: BTreeMap<ModelTier, TierUsage>,
}

impl UsageSummary {
    pub fn from_events(since: DateTime<Utc>, events: &[UsageEvent]) -> Self {
        let mut summary = Self {
            since,
            total_answers: 0,
            cached_answers: 0,
            local_answers: 0,
            input_tokens: 0,
            output_tokens: 0,
            by_tier: BTreeMap::new(),
        };
        for event in events {
            summary.total_answers += 1;
            summary.cached_answers += u64::from(event.was_cached);
            summary.local_answers += u64::from(event.was_local);
            summary.input_tokens += u64::from(event.input_tokens);
            summary.output_tokens += u64::from(event.output_tokens);

            let tier = summary.by_tier.entry(event.tier).or_default();
            tier.answers += 1;
            tier.input_tokens += u64::from(event.input_tokens);
            tier.output_tokens += u64::from(event.output_tokens);
        }
        summary
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Ledger backed by the `usage_events` table.
pub struct SqliteUsageLedger {
    db: Database,
}

impl SqliteUsageLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl UsageLedger for SqliteUsageLedger {
    #[instrument(skip_all, fields(tier = %event.tier, query_type = %event.query_type))]
    fn append(&self, event: &UsageEvent) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO usage_events
                 (session_id, tier, model_id, input_tokens, output_tokens, cache_read_tokens,
                  cache_creation_tokens, query_type, page, was_cached, was_local, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    event.session_id.as_str(),
                    event.tier.as_str(),
                    event.model_id,
                    event.input_tokens,
                    event.output_tokens,
                    event.cache_read_tokens,
                    event.cache_creation_tokens,
                    event.query_type,
                    event.page,
                    event.was_cached,
                    event.was_local,
                    format_timestamp(&event.timestamp),
                ],
            )?;
            Ok(())
        })
    }

    fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<UsageEvent>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, tier, model_id, input_tokens, output_tokens, cache_read_tokens,
                        cache_creation_tokens, query_type, page, was_cached, was_local, timestamp
                 FROM usage_events WHERE timestamp >= ?1 ORDER BY timestamp, id",
            )?;
            let rows = stmt.query_map([format_timestamp(&since)], |row| {
                Ok(RawUsageRow {
                    session_id: row.get(0)?,
                    tier: row.get(1)?,
                    model_id: row.get(2)?,
                    input_tokens: row.get(3)?,
                    output_tokens: row.get(4)?,
                    cache_read_tokens: row.get(5)?,
                    cache_creation_tokens: row.get(6)?,
                    query_type: row.get(7)?,
                    page: row.get(8)?,
                    was_cached: row.get(9)?,
                    was_local: row.get(10)?,
                    timestamp: row.get(11)?,
                })
            })?;

            let mut events = Vec::new();
            for row in rows {
                events.push(row?.into_event()?);
            }
            Ok(events)
        })
    }
}

struct RawUsageRow {
    session_id: String,
    tier: String,
    model_id: String,
    input_tokens: u32,
    output_tokens: u32,
    cache_read_tokens: u32,
    cache_creation_tokens: u32,
    query_type: String,
    page: String,
    was_cached: bool,
    was_local: bool,
    timestamp: String,
}

impl RawUsageRow {
    fn into_event(self) -> Result<UsageEvent, StoreError> {
        let tier = self.tier.parse::<ModelTier>().map_err(|detail| StoreError::CorruptRow {
            table: "usage_events",
            column: "tier",
            detail,
        })?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| StoreError::CorruptRow {
                table: "usage_events",
                column: "timestamp",
                detail: e.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(UsageEvent {
            session_id: SessionId::from_raw(self.session_id),
            tier,
            model_id: self.model_id,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cache_read_tokens: self.cache_read_tokens,
            cache_creation_tokens: self.cache_creation_tokens,
            query_type: self.query_type,
            page: self.page,
            was_cached: self.was_cached,
            was_local: self.was_local,
            timestamp,
        })
    }
}

/// Process-local ledger. Used when persistence is disabled and in tests.
#[derive(Default)]
pub struct MemoryUsageLedger {
    events: RwLock<Vec<UsageEvent>>,
}

impl MemoryUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Copy of every event, in append order.
    pub fn all(&self) -> Vec<UsageEvent> {
        self.events.read().clone()
    }
}

impl UsageLedger for MemoryUsageLedger {
    fn append(&self, event: &UsageEvent) -> Result<(), StoreError> {
        self.events.write().push(event.clone());
        Ok(())
    }

    fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<UsageEvent>, StoreError> {
        let mut events: Vec<UsageEvent> = self
            .events
            .read()
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}
