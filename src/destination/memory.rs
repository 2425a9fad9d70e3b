//! In-memory destination used by tests and `replicate --dry-run`.
//!
//! Tables hold text rows including the system columns. A [`FaultPlan`]
//! injects the failures a real store produces: tables that never become
//! visible, rejected or table-missing inserts, and short bulk copies.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use log::debug;

use super::{Destination, DestinationError, TablePresence};
use crate::{
    data::DATETIME_OUTPUT_FORMAT,
    parser,
    schema::{CREATED_AT_COLUMN, ROW_ID_COLUMN, SchemaChange, UPDATED_AT_COLUMN, system_columns},
};

#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Tables that `describe_table` always reports as absent.
    pub invisible_tables: HashSet<String>,
    /// Number of `describe_table` calls that report a freshly created table as absent.
    pub visibility_lag: usize,
    /// 0-based ordinals of `insert_rows` calls rejected with a data error.
    pub reject_inserts: HashSet<usize>,
    /// 0-based ordinals of `insert_rows` calls that fail as if the table vanished.
    pub missing_table_inserts: HashSet<usize>,
    /// Rows silently discarded from the end of each bulk copy.
    pub copy_shortfall: u64,
    pub fail_copy: bool,
    pub fail_schema_changes: bool,
}

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
    next_id: u64,
}

impl MemoryTable {
    fn new(data_columns: &[String]) -> Self {
        let mut columns = vec![ROW_ID_COLUMN.to_string()];
        columns.extend(data_columns.iter().cloned());
        columns.push(CREATED_AT_COLUMN.to_string());
        columns.push(UPDATED_AT_COLUMN.to_string());
        Self {
            columns,
            rows: Vec::new(),
            next_id: 1,
        }
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    fn push(&mut self, positions: &[usize], values: &[Option<String>]) {
        let now = Utc::now().format(DATETIME_OUTPUT_FORMAT).to_string();
        let mut row = vec![None; self.columns.len()];
        for (position, value) in positions.iter().zip(values) {
            row[*position] = value.clone();
        }
        for (column, value) in [
            (ROW_ID_COLUMN, self.next_id.to_string()),
            (CREATED_AT_COLUMN, now.clone()),
            (UPDATED_AT_COLUMN, now),
        ] {
            if let Some(position) = self.position(column) {
                row[position] = Some(value);
            }
        }
        self.next_id += 1;
        self.rows.push(row);
    }
}

#[derive(Debug, Default)]
pub struct MemoryDestination {
    tables: BTreeMap<String, MemoryTable>,
    faults: FaultPlan,
    pending_visibility: HashMap<String, usize>,
    history: Vec<SchemaChange>,
    insert_calls: usize,
    copy_calls: usize,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: FaultPlan) -> Self {
        Self {
            faults,
            ..Self::default()
        }
    }

    pub fn faults_mut(&mut self) -> &mut FaultPlan {
        &mut self.faults
    }

    pub fn history(&self) -> &[SchemaChange] {
        &self.history
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls
    }

    pub fn copy_calls(&self) -> usize {
        self.copy_calls
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Columns excluding the system columns, in table order.
    pub fn data_columns(&self, table: &str) -> Option<Vec<String>> {
        let system = system_columns();
        self.tables.get(table).map(|t| {
            t.columns
                .iter()
                .filter(|c| !system.contains(&c.as_str()))
                .cloned()
                .collect()
        })
    }

    pub fn column_values(&self, table: &str, column: &str) -> Option<Vec<Option<String>>> {
        let table = self.tables.get(table)?;
        let position = table.position(column)?;
        Some(table.rows.iter().map(|row| row[position].clone()).collect())
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut MemoryTable, DestinationError> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| DestinationError::TableMissing(table.to_string()))
    }

    fn write_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Option<String>>],
    ) -> Result<u64, DestinationError> {
        let target = self.table_mut(table)?;
        let positions = columns
            .iter()
            .map(|column| {
                target
                    .position(column)
                    .ok_or_else(|| DestinationError::ColumnMissing {
                        table: table.to_string(),
                        column: column.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(bad) = rows.iter().find(|row| row.len() != columns.len()) {
            return Err(DestinationError::Rejected(format!(
                "row has {} value(s) for {} column(s)",
                bad.len(),
                columns.len()
            )));
        }
        for row in rows {
            target.push(&positions, row);
        }
        Ok(rows.len() as u64)
    }
}

impl Destination for MemoryDestination {
    fn describe_table(&mut self, table: &str) -> Result<TablePresence, DestinationError> {
        if self.faults.invisible_tables.contains(table) {
            return Ok(TablePresence::Absent);
        }
        if let Some(remaining) = self.pending_visibility.get_mut(table)
            && *remaining > 0
        {
            *remaining -= 1;
            return Ok(TablePresence::Absent);
        }
        Ok(match self.tables.get(table) {
            Some(t) => TablePresence::Present {
                columns: t.columns.clone(),
            },
            None => TablePresence::Absent,
        })
    }

    fn apply_schema_change(&mut self, change: &SchemaChange) -> Result<(), DestinationError> {
        if self.faults.fail_schema_changes {
            return Err(DestinationError::Rejected(format!(
                "schema change refused: {change}"
            )));
        }
        debug!("memory destination: {change}");
        match change {
            SchemaChange::CreateTable { table, columns } => {
                if self.tables.contains_key(table) {
                    return Err(DestinationError::Rejected(format!(
                        "relation '{table}' already exists"
                    )));
                }
                self.tables.insert(table.clone(), MemoryTable::new(columns));
                if self.faults.visibility_lag > 0 {
                    self.pending_visibility
                        .insert(table.clone(), self.faults.visibility_lag);
                }
            }
            SchemaChange::DropTable { table } => {
                self.tables.remove(table);
            }
            SchemaChange::AddColumns { table, columns } => {
                let target = self.table_mut(table)?;
                for column in columns {
                    if target.position(column).is_none() {
                        target.columns.push(column.clone());
                        for row in &mut target.rows {
                            row.push(None);
                        }
                    }
                }
            }
            SchemaChange::Truncate { table } => {
                self.table_mut(table)?.rows.clear();
            }
        }
        self.history.push(change.clone());
        Ok(())
    }

    fn insert_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Option<String>>],
    ) -> Result<u64, DestinationError> {
        let call = self.insert_calls;
        self.insert_calls += 1;
        if self.faults.missing_table_inserts.contains(&call) {
            return Err(DestinationError::TableMissing(table.to_string()));
        }
        if self.faults.reject_inserts.contains(&call) {
            return Err(DestinationError::Rejected(format!(
                "invalid input in insert #{call}"
            )));
        }
        self.write_rows(table, columns, rows)
    }

    fn copy_csv(
        &mut self,
        table: &str,
        columns: &[String],
        csv: &[u8],
    ) -> Result<u64, DestinationError> {
        self.copy_calls += 1;
        if self.faults.fail_copy {
            return Err(DestinationError::Rejected("COPY aborted".to_string()));
        }
        let text = std::str::from_utf8(csv)
            .map_err(|err| DestinationError::Rejected(format!("invalid UTF-8 in copy: {err}")))?;
        let parsed = parser::parse_csv(text);
        if parsed.headers != columns {
            return Err(DestinationError::Rejected(
                "copy header does not match column list".to_string(),
            ));
        }
        if !parsed.warnings.is_empty() {
            return Err(DestinationError::Rejected(format!(
                "malformed copy payload at line {}",
                parsed.warnings[0].line
            )));
        }
        let keep = parsed
            .records
            .len()
            .saturating_sub(usize::try_from(self.faults.copy_shortfall).unwrap_or(usize::MAX));
        let rows: Vec<Vec<Option<String>>> = parsed.records[..keep]
            .iter()
            .map(|r| r.values().to_vec())
            .collect();
        self.write_rows(table, columns, &rows)
    }

    fn row_count(&mut self, table: &str) -> Result<u64, DestinationError> {
        Ok(self.table_mut(table)?.rows.len() as u64)
    }
}
