//! The relational store the loader writes into.
//!
//! A [`Destination`] exposes typed schema introspection, typed schema changes,
//! multi-row inserts, and a bulk CSV copy channel. [`memory::MemoryDestination`]
//! backs tests and dry runs; `postgres::PostgresDestination` is available with
//! the `postgres` feature.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use thiserror::Error;

use crate::schema::SchemaChange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TablePresence {
    Present { columns: Vec<String> },
    Absent,
}

impl TablePresence {
    pub fn is_present(&self) -> bool {
        matches!(self, TablePresence::Present { .. })
    }
}

#[derive(Debug, Error)]
pub enum DestinationError {
    #[error("table '{0}' does not exist")]
    TableMissing(String),
    #[error("column '{column}' does not exist on table '{table}'")]
    ColumnMissing { table: String, column: String },
    #[error("rejected by destination: {0}")]
    Rejected(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DestinationError {
    /// Fatal errors abort the remaining batches of the current table.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DestinationError::TableMissing(_))
    }
}

pub trait Destination {
    fn describe_table(&mut self, table: &str) -> Result<TablePresence, DestinationError>;

    fn apply_schema_change(&mut self, change: &SchemaChange) -> Result<(), DestinationError>;

    /// Inserts all `rows` atomically; each row is aligned with `columns`.
    fn insert_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Option<String>>],
    ) -> Result<u64, DestinationError>;

    /// Bulk-loads CSV text whose first line names `columns`.
    fn copy_csv(
        &mut self,
        table: &str,
        columns: &[String],
        csv: &[u8],
    ) -> Result<u64, DestinationError>;

    fn row_count(&mut self, table: &str) -> Result<u64, DestinationError>;
}

impl<D: Destination + ?Sized> Destination for Box<D> {
    fn describe_table(&mut self, table: &str) -> Result<TablePresence, DestinationError> {
        (**self).describe_table(table)
    }

    fn apply_schema_change(&mut self, change: &SchemaChange) -> Result<(), DestinationError> {
        (**self).apply_schema_change(change)
    }

    fn insert_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Option<String>>],
    ) -> Result<u64, DestinationError> {
        (**self).insert_rows(table, columns, rows)
    }

    fn copy_csv(
        &mut self,
        table: &str,
        columns: &[String],
        csv: &[u8],
    ) -> Result<u64, DestinationError> {
        (**self).copy_csv(table, columns, csv)
    }

    fn row_count(&mut self, table: &str) -> Result<u64, DestinationError> {
        (**self).row_count(table)
    }
}
