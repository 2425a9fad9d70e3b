//! Bulk loading of parsed records into one destination table.
//!
//! Two strategies share the same input and result:
//!
//! - [`ImportStrategy::Streaming`] re-serializes every record to CSV and issues
//!   one bulk copy. The table either receives every row or the load fails.
//! - [`ImportStrategy::Batched`] inserts fixed-size batches in input order. A
//!   rejected batch is recorded with a sample record and skipped; a missing
//!   table aborts the remaining batches.
//!
//! Either way the caller gets a [`LoadResult`], never a bare error.

use std::{
    thread,
    time::{Duration, Instant},
};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    cleaner::ValueCleaner,
    destination::{Destination, DestinationError},
    parser::{self, RawRecord},
    schema::SchemaError,
};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_INTER_BATCH_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ImportStrategy {
    /// One bulk copy per table.
    Streaming,
    /// Independent inserts of fixed-size batches.
    #[default]
    Batched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadErrorKind {
    EmptyInput,
    /// The source file could not be read or decoded.
    Input,
    Schema,
    BatchInsert,
    StreamingCopyMismatch,
    Transfer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadError {
    /// Batch index for batch errors; `None` for table-level errors.
    pub index: Option<usize>,
    pub kind: LoadErrorKind,
    pub message: String,
    pub fatal: bool,
    pub sample: Option<Vec<(String, Option<String>)>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadResult {
    pub table: String,
    pub strategy: ImportStrategy,
    pub raw_mode: bool,
    pub total: usize,
    pub inserted: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub errors: Vec<LoadError>,
    pub success: bool,
    pub partial_success: bool,
    pub batches_attempted: usize,
    pub parse_warnings: usize,
    pub cleaning_warnings: usize,
    pub elapsed_ms: u64,
}

impl LoadResult {
    fn new(table: &str, strategy: ImportStrategy, raw_mode: bool, total: usize) -> Self {
        Self {
            table: table.to_string(),
            strategy,
            raw_mode,
            total,
            inserted: 0,
            failed: total,
            success_rate: 0.0,
            errors: Vec::new(),
            success: false,
            partial_success: false,
            batches_attempted: 0,
            parse_warnings: 0,
            cleaning_warnings: 0,
            elapsed_ms: 0,
        }
    }

    /// A table whose schema could not be prepared: one fatal error, nothing attempted.
    pub fn schema_failure(
        table: &str,
        strategy: ImportStrategy,
        raw_mode: bool,
        total: usize,
        err: &SchemaError,
    ) -> Self {
        let mut result = Self::new(table, strategy, raw_mode, total);
        result.push_table_error(LoadErrorKind::Schema, err.to_string());
        result.finalize();
        result
    }

    pub fn empty_input(table: &str, strategy: ImportStrategy, raw_mode: bool) -> Self {
        let mut result = Self::new(table, strategy, raw_mode, 0);
        result.push_table_error(LoadErrorKind::EmptyInput, "CSV text has no header row");
        result.finalize();
        result
    }

    pub fn unreadable_input(
        table: &str,
        strategy: ImportStrategy,
        raw_mode: bool,
        reason: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(table, strategy, raw_mode, 0);
        result.push_table_error(LoadErrorKind::Input, reason);
        result.finalize();
        result
    }

    pub fn has_fatal_error(&self) -> bool {
        self.errors.iter().any(|e| e.fatal)
    }

    fn push_table_error(&mut self, kind: LoadErrorKind, message: impl Into<String>) {
        self.errors.push(LoadError {
            index: None,
            kind,
            message: message.into(),
            fatal: true,
            sample: None,
        });
    }

    fn finalize(&mut self) {
        self.failed = self.total.saturating_sub(self.inserted);
        self.success_rate = if self.total == 0 {
            0.0
        } else {
            self.inserted as f64 / self.total as f64
        };
        self.success = !self.has_fatal_error() && self.inserted > 0;
        self.partial_success = self.inserted > 0 && !self.errors.is_empty();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderOptions {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            inter_batch_delay: DEFAULT_INTER_BATCH_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
    pub table: &'a str,
    pub columns: &'a [String],
    pub records: &'a [RawRecord],
    pub strategy: ImportStrategy,
    pub raw_mode: bool,
}

/// Owns the destination handle for the whole run.
#[derive(Debug)]
pub struct BulkLoader<D> {
    destination: D,
    cleaner: ValueCleaner,
    options: LoaderOptions,
}

impl<D: Destination> BulkLoader<D> {
    pub fn new(destination: D, cleaner: ValueCleaner, options: LoaderOptions) -> Self {
        Self {
            destination,
            cleaner,
            options: LoaderOptions {
                batch_size: options.batch_size.max(1),
                ..options
            },
        }
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    pub fn destination_mut(&mut self) -> &mut D {
        &mut self.destination
    }

    pub fn into_destination(self) -> D {
        self.destination
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    pub fn load(&mut self, request: LoadRequest<'_>) -> LoadResult {
        let started = Instant::now();
        let mut result = LoadResult::new(
            request.table,
            request.strategy,
            request.raw_mode,
            request.records.len(),
        );
        match request.strategy {
            ImportStrategy::Streaming => self.load_streaming(&request, &mut result),
            ImportStrategy::Batched => self.load_batched(&request, &mut result),
        }
        result.finalize();
        result.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            "Loaded '{}' via {:?}: {}/{} row(s), {} error(s)",
            result.table,
            result.strategy,
            result.inserted,
            result.total,
            result.errors.len()
        );
        result
    }

    fn prepare_rows(
        &self,
        columns: &[String],
        records: &[RawRecord],
        raw_mode: bool,
        result: &mut LoadResult,
    ) -> Vec<Vec<Option<String>>> {
        if raw_mode {
            return records.iter().map(|r| r.values().to_vec()).collect();
        }
        let values: Vec<&[Option<String>]> = records.iter().map(RawRecord::values).collect();
        let cleaned = self.cleaner.clean_rows(columns, &values);
        result.cleaning_warnings += cleaned.warnings.len();
        cleaned.rows
    }

    fn load_batched(&mut self, request: &LoadRequest<'_>, result: &mut LoadResult) {
        let batch_size = self.options.batch_size;
        for (index, batch) in request.records.chunks(batch_size).enumerate() {
            if index > 0 && !self.options.inter_batch_delay.is_zero() {
                thread::sleep(self.options.inter_batch_delay);
            }
            let rows = self.prepare_rows(request.columns, batch, request.raw_mode, result);
            result.batches_attempted += 1;
            match self
                .destination
                .insert_rows(request.table, request.columns, &rows)
            {
                Ok(_) => result.inserted += batch.len(),
                Err(err) => {
                    let fatal = err.is_fatal();
                    result.errors.push(batch_error(index, &err, fatal, batch));
                    if fatal {
                        error!(
                            "Batch {index} of '{}' failed fatally, abandoning remaining batches: {err}",
                            request.table
                        );
                        break;
                    }
                    warn!("Batch {index} of '{}' rejected: {err}", request.table);
                }
            }
        }
    }

    fn load_streaming(&mut self, request: &LoadRequest<'_>, result: &mut LoadResult) {
        if request.records.is_empty() {
            return;
        }
        let rows = self.prepare_rows(request.columns, request.records, request.raw_mode, result);
        let payload = match parser::serialize_rows(request.columns, &rows) {
            Ok(payload) => payload,
            Err(err) => {
                result.push_table_error(
                    LoadErrorKind::Transfer,
                    format!("serializing copy payload: {err}"),
                );
                return;
            }
        };
        result.batches_attempted = 1;
        let copied = self.copy_and_count(request, &payload);
        match copied {
            Ok(copied) if copied == request.records.len() as u64 => {
                result.inserted = request.records.len();
            }
            Ok(copied) => {
                error!(
                    "Copy into '{}' landed {copied} of {} row(s)",
                    request.table,
                    request.records.len()
                );
                result.push_table_error(
                    LoadErrorKind::StreamingCopyMismatch,
                    format!(
                        "destination gained {copied} row(s) but {} were sent",
                        request.records.len()
                    ),
                );
            }
            Err(err) => {
                error!("Copy into '{}' failed: {err}", request.table);
                result.push_table_error(LoadErrorKind::Transfer, err.to_string());
            }
        }
    }

    /// Rows the destination gained across the copy.
    fn copy_and_count(
        &mut self,
        request: &LoadRequest<'_>,
        payload: &[u8],
    ) -> Result<u64, DestinationError> {
        let before = self.destination.row_count(request.table)?;
        self.destination
            .copy_csv(request.table, request.columns, payload)?;
        let after = self.destination.row_count(request.table)?;
        Ok(after.saturating_sub(before))
    }
}

fn batch_error(index: usize, err: &DestinationError, fatal: bool, batch: &[RawRecord]) -> LoadError {
    LoadError {
        index: Some(index),
        kind: LoadErrorKind::BatchInsert,
        message: err.to_string(),
        fatal,
        sample: batch.first().map(RawRecord::to_pairs),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        destination::memory::{FaultPlan, MemoryDestination},
        schema::SchemaChange,
    };

    fn records(count: usize) -> (Vec<String>, Vec<RawRecord>) {
        let headers: Arc<[String]> = Arc::from(vec!["id".to_string(), "total".to_string()]);
        let records = (0..count)
            .map(|i| {
                RawRecord::new(
                    Arc::clone(&headers),
                    vec![Some(format!("{i}")), Some(format!("SAR {i},000.50"))],
                    i as u64 + 2,
                )
            })
            .collect();
        (headers.to_vec(), records)
    }

    fn loader(faults: FaultPlan, batch_size: usize) -> BulkLoader<MemoryDestination> {
        let mut dest = MemoryDestination::with_faults(faults);
        dest.apply_schema_change(&SchemaChange::CreateTable {
            table: "t".to_string(),
            columns: vec!["id".to_string(), "total".to_string()],
        })
        .unwrap();
        BulkLoader::new(
            dest,
            ValueCleaner::default(),
            LoaderOptions {
                batch_size,
                inter_batch_delay: Duration::ZERO,
            },
        )
    }

    fn request<'a>(
        columns: &'a [String],
        records: &'a [RawRecord],
        strategy: ImportStrategy,
        raw_mode: bool,
    ) -> LoadRequest<'a> {
        LoadRequest {
            table: "t",
            columns,
            records,
            strategy,
            raw_mode,
        }
    }

    #[test]
    fn batched_load_cleans_values() {
        let (columns, records) = records(3);
        let mut loader = loader(FaultPlan::default(), 2);
        let result = loader.load(request(&columns, &records, ImportStrategy::Batched, false));
        assert!(result.success);
        assert!(!result.partial_success);
        assert_eq!(result.inserted, 3);
        assert_eq!(result.batches_attempted, 2);
        assert_eq!(result.success_rate, 1.0);
        assert_eq!(
            loader.destination().column_values("t", "total").unwrap()[1].as_deref(),
            Some("1000.5")
        );
    }

    #[test]
    fn raw_mode_skips_cleaning() {
        let (columns, records) = records(1);
        let mut loader = loader(FaultPlan::default(), 10);
        loader.load(request(&columns, &records, ImportStrategy::Batched, true));
        assert_eq!(
            loader.destination().column_values("t", "total").unwrap()[0].as_deref(),
            Some("SAR 0,000.50")
        );
    }

    #[test]
    fn rejected_batch_is_skipped() {
        let (columns, records) = records(50);
        let mut loader = loader(
            FaultPlan {
                reject_inserts: [3].into_iter().collect(),
                ..FaultPlan::default()
            },
            5,
        );
        let result = loader.load(request(&columns, &records, ImportStrategy::Batched, false));
        assert_eq!(result.batches_attempted, 10);
        assert_eq!(result.inserted, 45);
        assert_eq!(result.failed, 5);
        assert!(!result.success);
        assert!(result.partial_success);
        assert_eq!(result.errors.len(), 1);
        let err = &result.errors[0];
        assert_eq!(err.index, Some(3));
        assert!(!err.fatal);
        let sample = err.sample.as_ref().unwrap();
        assert_eq!(sample[0], ("id".to_string(), Some("15".to_string())));
    }

    #[test]
    fn missing_table_aborts_remaining_batches() {
        let (columns, records) = records(10);
        let mut loader = loader(
            FaultPlan {
                missing_table_inserts: [1].into_iter().collect(),
                ..FaultPlan::default()
            },
            2,
        );
        let result = loader.load(request(&columns, &records, ImportStrategy::Batched, false));
        assert_eq!(result.batches_attempted, 2);
        assert_eq!(result.inserted, 2);
        assert!(!result.success);
        assert!(result.partial_success);
        assert!(result.errors[0].fatal);
    }

    #[test]
    fn streaming_copies_everything() {
        let (columns, records) = records(4);
        let mut loader = loader(FaultPlan::default(), 1);
        let result = loader.load(request(&columns, &records, ImportStrategy::Streaming, false));
        assert!(result.success);
        assert_eq!(result.inserted, 4);
        assert_eq!(loader.destination().copy_calls(), 1);
        assert_eq!(loader.destination().insert_calls(), 0);
    }

    #[test]
    fn streaming_shortfall_is_a_fatal_mismatch() {
        let (columns, records) = records(4);
        let mut loader = loader(
            FaultPlan {
                copy_shortfall: 1,
                ..FaultPlan::default()
            },
            1,
        );
        let result = loader.load(request(&columns, &records, ImportStrategy::Streaming, false));
        assert!(!result.success);
        assert!(!result.partial_success);
        assert_eq!(result.inserted, 0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, LoadErrorKind::StreamingCopyMismatch);
        assert!(result.errors[0].fatal);
    }

    #[test]
    fn streaming_copy_failure_is_fatal() {
        let (columns, records) = records(2);
        let mut loader = loader(
            FaultPlan {
                fail_copy: true,
                ..FaultPlan::default()
            },
            1,
        );
        let result = loader.load(request(&columns, &records, ImportStrategy::Streaming, true));
        assert_eq!(result.errors[0].kind, LoadErrorKind::Transfer);
        assert!(!result.success);
    }

    #[test]
    fn empty_record_set_is_not_a_success() {
        let (columns, records) = records(0);
        let mut loader = loader(FaultPlan::default(), 10);
        let result = loader.load(request(&columns, &records, ImportStrategy::Batched, false));
        assert!(!result.success);
        assert!(result.errors.is_empty());
        assert_eq!(result.success_rate, 0.0);
    }
}
