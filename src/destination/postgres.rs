//! PostgreSQL destination built on the synchronous `postgres` client.
//!
//! Batches become one parameterized multi-row `INSERT` inside a transaction;
//! the streaming path uses `COPY ... FROM STDIN (FORMAT csv, HEADER true)`.

use std::io::Write;

use log::debug;
use postgres::{Client, NoTls, error::SqlState, types::ToSql};

use super::{Destination, DestinationError, TablePresence};
use crate::schema::{SchemaChange, quote_ident};

const MAX_BIND_PARAMETERS: usize = 65_535;

pub struct PostgresDestination {
    client: Client,
}

impl PostgresDestination {
    pub fn connect(url: &str) -> Result<Self, DestinationError> {
        let client = Client::connect(url, NoTls)
            .map_err(|err| DestinationError::Connection(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn map_error(table: &str, err: postgres::Error) -> DestinationError {
    match err.code() {
        Some(code) if *code == SqlState::UNDEFINED_TABLE => {
            DestinationError::TableMissing(table.to_string())
        }
        Some(code) if *code == SqlState::UNDEFINED_COLUMN => DestinationError::ColumnMissing {
            table: table.to_string(),
            column: err
                .as_db_error()
                .map(|db| db.message().to_string())
                .unwrap_or_default(),
        },
        Some(_) => DestinationError::Rejected(err.to_string()),
        None if err.is_closed() => DestinationError::Connection(err.to_string()),
        None => DestinationError::Rejected(err.to_string()),
    }
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert_statement(table: &str, columns: &[String], row_count: usize) -> String {
    let width = columns.len();
    let tuples = (0..row_count)
        .map(|row| {
            let placeholders = (1..=width)
                .map(|col| format!("${}", row * width + col))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({placeholders})")
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES {tuples}",
        quote_ident(table),
        column_list(columns)
    )
}

impl Destination for PostgresDestination {
    fn describe_table(&mut self, table: &str) -> Result<TablePresence, DestinationError> {
        let rows = self
            .client
            .query(
                "SELECT column_name::text FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1 \
                 ORDER BY ordinal_position",
                &[&table],
            )
            .map_err(|err| map_error(table, err))?;
        if rows.is_empty() {
            return Ok(TablePresence::Absent);
        }
        let columns = rows.iter().map(|row| row.get::<_, String>(0)).collect();
        Ok(TablePresence::Present { columns })
    }

    fn apply_schema_change(&mut self, change: &SchemaChange) -> Result<(), DestinationError> {
        let table = change.table();
        let mut transaction = self
            .client
            .transaction()
            .map_err(|err| map_error(table, err))?;
        for statement in change.to_sql() {
            debug!("{statement}");
            transaction
                .batch_execute(&statement)
                .map_err(|err| map_error(table, err))?;
        }
        transaction.commit().map_err(|err| map_error(table, err))
    }

    fn insert_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Option<String>>],
    ) -> Result<u64, DestinationError> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }
        let rows_per_statement = (MAX_BIND_PARAMETERS / columns.len()).max(1);
        let mut transaction = self
            .client
            .transaction()
            .map_err(|err| map_error(table, err))?;
        let mut inserted = 0u64;
        for chunk in rows.chunks(rows_per_statement) {
            let sql = insert_statement(table, columns, chunk.len());
            let params: Vec<&(dyn ToSql + Sync)> = chunk
                .iter()
                .flat_map(|row| row.iter().map(|value| value as &(dyn ToSql + Sync)))
                .collect();
            inserted += transaction
                .execute(sql.as_str(), &params)
                .map_err(|err| map_error(table, err))?;
        }
        transaction.commit().map_err(|err| map_error(table, err))?;
        Ok(inserted)
    }

    fn copy_csv(
        &mut self,
        table: &str,
        columns: &[String],
        csv: &[u8],
    ) -> Result<u64, DestinationError> {
        let sql = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT csv, HEADER true)",
            quote_ident(table),
            column_list(columns)
        );
        let mut writer = self
            .client
            .copy_in(sql.as_str())
            .map_err(|err| map_error(table, err))?;
        writer.write_all(csv)?;
        writer.finish().map_err(|err| map_error(table, err))
    }

    fn row_count(&mut self, table: &str) -> Result<u64, DestinationError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let row = self
            .client
            .query_one(sql.as_str(), &[])
            .map_err(|err| map_error(table, err))?;
        let count: i64 = row.get(0);
        Ok(u64::try_from(count).unwrap_or_default())
    }
}
