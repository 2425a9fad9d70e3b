//! Run configuration loaded from YAML.
//!
//! ```yaml
//! replication:
//!   raw_mode: false
//!   forced_raw_tables: [sales_by_item]
//!   import_strategy: batched
//!   schema_strategy: preserving
//!   batch_size: 100
//!   inter_batch_delay_ms: 100
//!   table_retry: { max_attempts: 3, delay_ms: 2000 }
//! tables:
//!   - name: Invoices
//!     path: exports/invoices.csv
//! ```
//!
//! Durations are milliseconds. Relative table paths resolve against the
//! directory holding the config file.

use std::{
    collections::BTreeSet,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{
    cleaner::{CleanerConfig, RuleSpec},
    columns::normalize_table_name,
    loader::{DEFAULT_BATCH_SIZE, DEFAULT_INTER_BATCH_DELAY, ImportStrategy, LoaderOptions},
    retry::{BackoffPolicy, duration_ms},
    schema::SchemaStrategy,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplicationConfig {
    /// Skip value cleaning for every table.
    pub raw_mode: bool,
    /// Tables that always load raw, by logical or destination name.
    pub forced_raw_tables: BTreeSet<String>,
    pub import_strategy: ImportStrategy,
    pub schema_strategy: SchemaStrategy,
    pub batch_size: usize,
    #[serde(rename = "inter_batch_delay_ms", with = "duration_ms")]
    pub inter_batch_delay: Duration,
    pub table_retry: BackoffPolicy,
    pub schema_visibility: BackoffPolicy,
    /// Replaces the built-in column classification table when present.
    pub classification: Option<Vec<RuleSpec>>,
    pub infer_numbers: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            raw_mode: false,
            forced_raw_tables: BTreeSet::new(),
            import_strategy: ImportStrategy::default(),
            schema_strategy: SchemaStrategy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            inter_batch_delay: DEFAULT_INTER_BATCH_DELAY,
            table_retry: BackoffPolicy::default(),
            schema_visibility: BackoffPolicy::new(5, Duration::from_millis(500)),
            classification: None,
            infer_numbers: true,
        }
    }
}

impl ReplicationConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be at least 1");
        ensure!(
            self.table_retry.max_attempts > 0,
            "table_retry.max_attempts must be at least 1"
        );
        ensure!(
            self.schema_visibility.max_attempts > 0,
            "schema_visibility.max_attempts must be at least 1"
        );
        Ok(())
    }

    pub fn cleaner_config(&self) -> Result<CleanerConfig, regex::Error> {
        match &self.classification {
            Some(rules) => CleanerConfig::from_rules(rules, self.infer_numbers),
            None => Ok(CleanerConfig {
                infer_numbers: self.infer_numbers,
                ..CleanerConfig::default()
            }),
        }
    }

    pub fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            batch_size: self.batch_size,
            inter_batch_delay: self.inter_batch_delay,
        }
    }

    /// True when `logical_name` (or its destination name) is on the forced list.
    pub fn forces_raw(&self, logical_name: &str) -> bool {
        self.forced_raw_tables.contains(logical_name)
            || self
                .forced_raw_tables
                .contains(&normalize_table_name(logical_name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableEntry {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub input_encoding: Option<String>,
    pub tables: Vec<TableEntry>,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let mut config: RunConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config file {path:?}"))?;
        config
            .replication
            .validate()
            .with_context(|| format!("Validating config file {path:?}"))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for table in &mut config.tables {
            if table.path.is_relative() {
                table.path = base.join(&table.path);
            }
        }
        Ok(config)
    }
}
