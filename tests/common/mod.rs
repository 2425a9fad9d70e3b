#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use csv_replicator::{config::ReplicationConfig, retry::BackoffPolicy};
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Replication settings with every delay zeroed so tests never sleep.
pub fn fast_config() -> ReplicationConfig {
    ReplicationConfig {
        inter_batch_delay: Duration::ZERO,
        table_retry: BackoffPolicy::new(3, Duration::ZERO),
        schema_visibility: BackoffPolicy::new(3, Duration::ZERO),
        ..ReplicationConfig::default()
    }
}

/// Builds CSV text from a header line and data lines.
pub fn csv_text(header: &str, rows: &[&str]) -> String {
    let mut text = String::from(header);
    text.push('\n');
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    text
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes a run config whose `replication` block disables all waiting.
    pub fn write_run_config(&self, name: &str, tables: &[(&str, &str)], extra: &str) -> PathBuf {
        let mut yaml = String::from(
            "replication:\n  inter_batch_delay_ms: 0\n  table_retry: { max_attempts: 2, delay_ms: 0 }\n  schema_visibility: { max_attempts: 2, delay_ms: 0 }\n",
        );
        for line in extra.lines() {
            yaml.push_str("  ");
            yaml.push_str(line);
            yaml.push('\n');
        }
        yaml.push_str("tables:\n");
        for (table, path) in tables {
            yaml.push_str(&format!("  - name: \"{table}\"\n    path: {path}\n"));
        }
        self.write(name, &yaml)
    }
}
