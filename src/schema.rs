//! Destination schema management.
//!
//! [`SchemaManager::prepare`] makes the destination table's columns a superset
//! of the incoming normalized headers, either by recreating the table
//! ([`SchemaStrategy::Destructive`]) or by adding missing columns and
//! truncating rows ([`SchemaStrategy::Preserving`]). Every data column is
//! `TEXT`; typing is left to the value cleaner and downstream consumers.
//!
//! Schema changes are described by [`SchemaChange`] and rendered to SQL by
//! [`SchemaChange::to_sql`], so destinations never receive free-form DDL.

use std::{collections::HashSet, fmt};

use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    columns::MAX_IDENTIFIER_LEN,
    destination::{Destination, DestinationError, TablePresence},
    retry::BackoffPolicy,
};

pub const ROW_ID_COLUMN: &str = "_row_id";
pub const CREATED_AT_COLUMN: &str = "_created_at";
pub const UPDATED_AT_COLUMN: &str = "_updated_at";

pub fn system_columns() -> [&'static str; 3] {
    [ROW_ID_COLUMN, CREATED_AT_COLUMN, UPDATED_AT_COLUMN]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SchemaStrategy {
    /// Drop and recreate the table on every load.
    Destructive,
    /// Add missing columns and truncate, keeping dependent objects intact.
    #[default]
    Preserving,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaChange {
    CreateTable { table: String, columns: Vec<String> },
    DropTable { table: String },
    AddColumns { table: String, columns: Vec<String> },
    Truncate { table: String },
}

impl SchemaChange {
    pub fn table(&self) -> &str {
        match self {
            SchemaChange::CreateTable { table, .. }
            | SchemaChange::DropTable { table }
            | SchemaChange::AddColumns { table, .. }
            | SchemaChange::Truncate { table } => table,
        }
    }

    /// PostgreSQL statements implementing this change, in execution order.
    pub fn to_sql(&self) -> Vec<String> {
        match self {
            SchemaChange::CreateTable { table, columns } => {
                let data_columns = columns
                    .iter()
                    .map(|c| format!("{} TEXT", quote_ident(c)))
                    .collect::<Vec<_>>();
                let mut definitions = vec![format!(
                    "{} BIGSERIAL PRIMARY KEY",
                    quote_ident(ROW_ID_COLUMN)
                )];
                definitions.extend(data_columns);
                definitions.push(format!(
                    "{} TIMESTAMPTZ NOT NULL DEFAULT now()",
                    quote_ident(CREATED_AT_COLUMN)
                ));
                definitions.push(format!(
                    "{} TIMESTAMPTZ NOT NULL DEFAULT now()",
                    quote_ident(UPDATED_AT_COLUMN)
                ));
                vec![
                    format!(
                        "CREATE TABLE {} ({})",
                        quote_ident(table),
                        definitions.join(", ")
                    ),
                    format!(
                        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                        quote_ident(&created_at_index_name(table)),
                        quote_ident(table),
                        quote_ident(CREATED_AT_COLUMN)
                    ),
                ]
            }
            SchemaChange::DropTable { table } => {
                vec![format!("DROP TABLE IF EXISTS {} CASCADE", quote_ident(table))]
            }
            SchemaChange::AddColumns { table, columns } => vec![format!(
                "ALTER TABLE {} {}",
                quote_ident(table),
                columns
                    .iter()
                    .map(|c| format!("ADD COLUMN IF NOT EXISTS {} TEXT", quote_ident(c)))
                    .join(", ")
            )],
            SchemaChange::Truncate { table } => {
                vec![format!("TRUNCATE TABLE {}", quote_ident(table))]
            }
        }
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaChange::CreateTable { table, columns } => {
                write!(f, "create {table} with {} column(s)", columns.len())
            }
            SchemaChange::DropTable { table } => write!(f, "drop {table}"),
            SchemaChange::AddColumns { table, columns } => {
                write!(f, "add {} to {table}", columns.join(", "))
            }
            SchemaChange::Truncate { table } => write!(f, "truncate {table}"),
        }
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn created_at_index_name(table: &str) -> String {
    const SUFFIX: &str = "_created_at_idx";
    let keep = MAX_IDENTIFIER_LEN - SUFFIX.len();
    let base: String = table.chars().take(keep).collect();
    format!("{base}{SUFFIX}")
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema change on '{table}' failed: {source}")]
    Destination {
        table: String,
        #[source]
        source: DestinationError,
    },
    #[error("table '{table}' is not queryable after {attempts} attempt(s)")]
    NotVisible { table: String, attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaAction {
    Created,
    Recreated,
    Evolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaOutcome {
    pub table: String,
    pub action: SchemaAction,
    pub added_columns: Vec<String>,
    pub verify_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct SchemaManager {
    visibility: BackoffPolicy,
}

impl SchemaManager {
    pub fn new(visibility: BackoffPolicy) -> Self {
        Self { visibility }
    }

    pub fn prepare<D>(
        &self,
        destination: &mut D,
        table: &str,
        columns: &[String],
        strategy: SchemaStrategy,
    ) -> Result<SchemaOutcome, SchemaError>
    where
        D: Destination + ?Sized,
    {
        let presence = destination
            .describe_table(table)
            .map_err(|source| destination_error(table, source))?;

        let (changes, action, added_columns) = match (strategy, presence) {
            (SchemaStrategy::Destructive, TablePresence::Present { .. }) => (
                vec![
                    SchemaChange::DropTable {
                        table: table.to_string(),
                    },
                    create_change(table, columns),
                ],
                SchemaAction::Recreated,
                Vec::new(),
            ),
            (SchemaStrategy::Preserving, TablePresence::Present { columns: existing }) => {
                let missing = missing_columns(&existing, columns);
                let mut changes = Vec::with_capacity(2);
                if !missing.is_empty() {
                    changes.push(SchemaChange::AddColumns {
                        table: table.to_string(),
                        columns: missing.clone(),
                    });
                }
                changes.push(SchemaChange::Truncate {
                    table: table.to_string(),
                });
                (changes, SchemaAction::Evolved, missing)
            }
            (_, TablePresence::Absent) => (
                vec![create_change(table, columns)],
                SchemaAction::Created,
                Vec::new(),
            ),
        };

        for change in &changes {
            debug!("Applying schema change: {change}");
            destination
                .apply_schema_change(change)
                .map_err(|source| destination_error(table, source))?;
        }

        let verify_attempts = self.verify_visible(destination, table)?;
        info!(
            "Table '{table}' ready ({action:?}, {} new column(s))",
            added_columns.len()
        );
        Ok(SchemaOutcome {
            table: table.to_string(),
            action,
            added_columns,
            verify_attempts,
        })
    }

    fn verify_visible<D>(&self, destination: &mut D, table: &str) -> Result<u32, SchemaError>
    where
        D: Destination + ?Sized,
    {
        let label = format!("verify {table}");
        let (visible, attempts) = self.visibility.retry_until(
            &label,
            |_| matches!(
                destination.describe_table(table),
                Ok(TablePresence::Present { .. })
            ),
            |visible| *visible,
        );
        if visible {
            Ok(attempts)
        } else {
            Err(SchemaError::NotVisible {
                table: table.to_string(),
                attempts,
            })
        }
    }
}

fn create_change(table: &str, columns: &[String]) -> SchemaChange {
    SchemaChange::CreateTable {
        table: table.to_string(),
        columns: columns.to_vec(),
    }
}

fn destination_error(table: &str, source: DestinationError) -> SchemaError {
    SchemaError::Destination {
        table: table.to_string(),
        source,
    }
}

/// Incoming columns absent from `existing`, in incoming order.
pub fn missing_columns(existing: &[String], incoming: &[String]) -> Vec<String> {
    let existing: HashSet<&str> = existing.iter().map(String::as_str).collect();
    incoming
        .iter()
        .filter(|c| !existing.contains(c.as_str()))
        .unique()
        .cloned()
        .collect()
}
