//! Table-by-table replication.
//!
//! For each table: parse → normalize headers → prepare schema → load. Tables
//! run strictly one after another and a failed table never stops the run.
//!
//! Per-table state machine:
//!
//! ```text
//! PENDING → PARSING → SCHEMA_READY → LOADING → SUCCEEDED | PARTIALLY_SUCCEEDED | FAILED
//!    ↑                                                                          │
//!    └──────────────────────── while retry attempts remain ─────────────────────┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    cleaner::ValueCleaner,
    columns::{HeaderMapping, normalize_table_name},
    config::ReplicationConfig,
    destination::Destination,
    loader::{BulkLoader, LoadErrorKind, LoadRequest, LoadResult},
    parser::{self, ParsedCsv},
    schema::SchemaManager,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableState {
    Pending,
    Parsing,
    SchemaReady,
    Loading,
    Succeeded,
    PartiallySucceeded,
    Failed,
}

impl TableState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TableState::Succeeded | TableState::PartiallySucceeded | TableState::Failed
        )
    }

    fn from_result(result: &LoadResult) -> Self {
        if result.success {
            TableState::Succeeded
        } else if result.partial_success {
            TableState::PartiallySucceeded
        } else {
            TableState::Failed
        }
    }
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TableState::Pending => "PENDING",
            TableState::Parsing => "PARSING",
            TableState::SchemaReady => "SCHEMA_READY",
            TableState::Loading => "LOADING",
            TableState::Succeeded => "SUCCEEDED",
            TableState::PartiallySucceeded => "PARTIALLY_SUCCEEDED",
            TableState::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// One configured table. `csv` holds the decoded text, or the reason the
/// source could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSource {
    pub name: String,
    pub csv: Result<String, String>,
}

impl TableSource {
    pub fn new(name: impl Into<String>, csv: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            csv: Ok(csv.into()),
        }
    }

    pub fn unreadable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            csv: Err(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub logical_name: String,
    pub table: String,
    pub columns: HeaderMapping,
    pub state: TableState,
    pub attempts: u32,
    pub result: LoadResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableReport>,
}

impl RunReport {
    pub fn count(&self, state: TableState) -> usize {
        self.tables.iter().filter(|t| t.state == state).count()
    }

    pub fn total_inserted(&self) -> usize {
        self.tables.iter().map(|t| t.result.inserted).sum()
    }

    pub fn all_succeeded(&self) -> bool {
        self.tables.iter().all(|t| t.state == TableState::Succeeded)
    }
}

pub struct Replicator<D: Destination> {
    loader: BulkLoader<D>,
    schema: SchemaManager,
    config: ReplicationConfig,
}

impl<D: Destination> Replicator<D> {
    pub fn new(destination: D, config: ReplicationConfig) -> Result<Self, regex::Error> {
        let cleaner = ValueCleaner::new(config.cleaner_config()?);
        Ok(Self {
            loader: BulkLoader::new(destination, cleaner, config.loader_options()),
            schema: SchemaManager::new(config.schema_visibility),
            config,
        })
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn destination(&self) -> &D {
        self.loader.destination()
    }

    pub fn into_destination(self) -> D {
        self.loader.into_destination()
    }

    pub fn replicate_all<I>(&mut self, sources: I) -> RunReport
    where
        I: IntoIterator<Item = TableSource>,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("Replication run {run_id} started");
        let mut tables = Vec::new();
        for source in sources {
            let report = match &source.csv {
                Ok(text) => self.replicate_table(&source.name, text),
                Err(reason) => self.unreadable_table(&source.name, reason),
            };
            tables.push(report);
        }
        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            tables,
        };
        info!(
            "Replication run {run_id} finished: {} succeeded, {} partial, {} failed, {} row(s) inserted",
            report.count(TableState::Succeeded),
            report.count(TableState::PartiallySucceeded),
            report.count(TableState::Failed),
            report.total_inserted()
        );
        report
    }

    pub fn replicate_table(&mut self, logical_name: &str, csv_text: &str) -> TableReport {
        let table = normalize_table_name(logical_name);
        let raw_mode = self.config.raw_mode || self.config.forces_raw(logical_name);
        let strategy = self.config.import_strategy;
        if raw_mode && !self.config.raw_mode {
            info!("Table '{table}' is on the forced raw list; skipping value cleaning");
        }

        let mut tracker = StateTracker::new(&table);
        let mut parsed: Option<(ParsedCsv, HeaderMapping)> = None;
        let policy = self.config.table_retry;
        let label = format!("replicate {table}");

        let (result, attempts) = policy.retry_until(
            &label,
            |attempt| {
                if attempt > 1 {
                    tracker.transition(TableState::Pending);
                }
                tracker.transition(TableState::Parsing);
                let (csv, mapping) = parsed.get_or_insert_with(|| {
                    let csv = parser::parse_csv(csv_text);
                    let mapping = HeaderMapping::from_headers(&csv.headers);
                    (csv, mapping)
                });
                if csv.is_empty() {
                    return LoadResult::empty_input(&table, strategy, raw_mode);
                }
                let columns = mapping.names();
                if let Err(err) = self.schema.prepare(
                    self.loader.destination_mut(),
                    &table,
                    &columns,
                    self.config.schema_strategy,
                ) {
                    error!("Schema preparation for '{table}' failed: {err}");
                    return LoadResult::schema_failure(
                        &table,
                        strategy,
                        raw_mode,
                        csv.records.len(),
                        &err,
                    );
                }
                tracker.transition(TableState::SchemaReady);
                tracker.transition(TableState::Loading);
                let mut result = self.loader.load(LoadRequest {
                    table: &table,
                    columns: &columns,
                    records: &csv.records,
                    strategy,
                    raw_mode,
                });
                result.parse_warnings = csv.warnings.len();
                let state = TableState::from_result(&result);
                tracker.transition(state);
                if state == TableState::Failed {
                    warn!(
                        "Attempt {attempt} for '{table}' failed: {}",
                        result
                            .errors
                            .first()
                            .map(|e| e.message.as_str())
                            .unwrap_or("no rows inserted")
                    );
                }
                result
            },
            |result| !should_retry(result),
        );

        if tracker.state != TableState::from_result(&result) {
            tracker.transition(TableState::from_result(&result));
        }
        let state = tracker.state;
        let columns = parsed.map(|(_, mapping)| mapping).unwrap_or_default();
        TableReport {
            logical_name: logical_name.to_string(),
            table,
            columns,
            state,
            attempts,
            result,
        }
    }

    /// Reports a table whose source never produced text. Nothing is attempted.
    fn unreadable_table(&self, logical_name: &str, reason: &str) -> TableReport {
        let table = normalize_table_name(logical_name);
        error!("Table '{table}' could not be read: {reason}");
        let raw_mode = self.config.raw_mode || self.config.forces_raw(logical_name);
        TableReport {
            logical_name: logical_name.to_string(),
            table: table.clone(),
            columns: HeaderMapping::default(),
            state: TableState::Failed,
            attempts: 0,
            result: LoadResult::unreadable_input(
                &table,
                self.config.import_strategy,
                raw_mode,
                reason,
            ),
        }
    }
}

/// Retry only attempts that landed nothing and could plausibly land something.
fn should_retry(result: &LoadResult) -> bool {
    if result.success || result.partial_success {
        return false;
    }
    if result.total == 0 && result.errors.is_empty() {
        return false;
    }
    !result
        .errors
        .iter()
        .any(|e| e.kind == LoadErrorKind::EmptyInput)
}

struct StateTracker<'a> {
    table: &'a str,
    state: TableState,
}

impl<'a> StateTracker<'a> {
    fn new(table: &'a str) -> Self {
        Self {
            table,
            state: TableState::Pending,
        }
    }

    fn transition(&mut self, next: TableState) {
        debug!("{}: {} -> {}", self.table, self.state, next);
        self.state = next;
    }
}
