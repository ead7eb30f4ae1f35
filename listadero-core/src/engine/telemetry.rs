use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;

use crate::config::ObservabilitySection;
use crate::listing::{AttemptRecord, ListingKind};

use super::error::EngineError;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<TelemetryError> for EngineError {
    fn from(error: TelemetryError) -> Self {
        EngineError::Telemetry(error.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
struct AttemptLogEntry<'a> {
    submission_id: &'a str,
    #[serde(flatten)]
    record: &'a AttemptRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub timestamp: DateTime<Utc>,
    pub submission_id: String,
    pub kind: ListingKind,
    pub success: bool,
    pub duration_ms: i64,
    pub steps_total: usize,
    pub fields_skipped: usize,
    pub last_screenshot: Option<PathBuf>,
}

/// Durable record of what the engine attempted: a JSONL append log for
/// line-oriented tooling plus a SQLite database for queries. Attempts are
/// written as they happen, so an aborted submission leaves its partial
/// trail behind.
#[derive(Debug)]
pub struct FillTelemetry {
    log: Mutex<File>,
    db_path: PathBuf,
    flags: OpenFlags,
}

impl FillTelemetry {
    pub fn from_config(config: &ObservabilitySection) -> Result<Self, TelemetryError> {
        Self::new(&config.attempt_log, &config.metrics_db)
    }

    pub fn new(
        log_path: impl AsRef<Path>,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, TelemetryError> {
        let log_path = log_path.as_ref().to_path_buf();
        if let Some(parent) = log_path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            create_dir_all(parent)?;
        }
        let telemetry = Self {
            log: Mutex::new(file),
            db_path,
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };
        telemetry.initialize_db()?;
        Ok(telemetry)
    }

    fn initialize_db(&self) -> Result<(), TelemetryError> {
        let conn = self.open_db()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS fill_attempts (
                ts DATETIME DEFAULT CURRENT_TIMESTAMP,
                submission_id TEXT,
                step_index INTEGER,
                field_key TEXT,
                outcome TEXT,
                error_message TEXT,
                screenshot_path TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_fill_attempts_ts ON fill_attempts(ts DESC);
            CREATE TABLE IF NOT EXISTS fill_runs (
                ts DATETIME DEFAULT CURRENT_TIMESTAMP,
                submission_id TEXT,
                kind TEXT,
                success INTEGER,
                duration_ms INTEGER,
                steps_total INTEGER,
                fields_skipped INTEGER,
                last_screenshot TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_fill_runs_ts ON fill_runs(ts DESC);",
        )?;
        Ok(())
    }

    fn open_db(&self) -> Result<Connection, TelemetryError> {
        Ok(Connection::open_with_flags(&self.db_path, self.flags)?)
    }

    pub fn record_attempt(
        &self,
        submission_id: &str,
        record: &AttemptRecord,
    ) -> Result<(), TelemetryError> {
        let entry = AttemptLogEntry {
            submission_id,
            record,
        };
        let json = serde_json::to_string(&entry)?;
        if let Ok(mut guard) = self.log.lock() {
            writeln!(guard, "{json}")?;
            guard.flush()?;
        }
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO fill_attempts (
                submission_id, step_index, field_key, outcome, error_message, screenshot_path
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                submission_id,
                record.step_index as i64,
                record.field_key,
                record.outcome.as_str(),
                record.note.clone().unwrap_or_default(),
                record
                    .screenshot
                    .as_ref()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_default(),
            ],
        )?;
        Ok(())
    }

    pub fn record_run(&self, run: &RunSummary) -> Result<(), TelemetryError> {
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO fill_runs (
                submission_id, kind, success, duration_ms, steps_total, fields_skipped, last_screenshot
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.submission_id,
                run.kind.as_str(),
                if run.success { 1 } else { 0 },
                run.duration_ms,
                run.steps_total as i64,
                run.fields_skipped as i64,
                run.last_screenshot
                    .as_ref()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_default(),
            ],
        )?;
        Ok(())
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::AttemptOutcome;
    use tempfile::tempdir;

    #[test]
    fn telemetry_persists_attempts_and_runs() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("attempts.log");
        let db_path = dir.path().join("metrics.sqlite");
        let telemetry = FillTelemetry::new(&log_path, &db_path).unwrap();

        let record = AttemptRecord::new(2, "precio", AttemptOutcome::Transient)
            .with_note("readback mismatch for precio");
        telemetry.record_attempt("sub-1", &record).unwrap();
        telemetry
            .record_run(&RunSummary {
                timestamp: Utc::now(),
                submission_id: "sub-1".to_string(),
                kind: ListingKind::Property,
                success: true,
                duration_ms: 5400,
                steps_total: 6,
                fields_skipped: 0,
                last_screenshot: None,
            })
            .unwrap();

        let log_contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(log_contents.contains("readback mismatch"));
        assert!(log_contents.contains("sub-1"));

        let conn = Connection::open(&db_path).unwrap();
        let attempts: i64 = conn
            .query_row("SELECT COUNT(*) FROM fill_attempts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(attempts, 1);
        let outcome: String = conn
            .query_row("SELECT outcome FROM fill_attempts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(outcome, "transient");
        let runs: i64 = conn
            .query_row("SELECT COUNT(*) FROM fill_runs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(runs, 1);
    }
}
