use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Transient,
    Structural,
    Fatal,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Transient => "transient",
            AttemptOutcome::Structural => "structural",
            AttemptOutcome::Fatal => "fatal",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AttemptOutcome::Success),
            "transient" => Ok(AttemptOutcome::Transient),
            "structural" => Ok(AttemptOutcome::Structural),
            "fatal" => Ok(AttemptOutcome::Fatal),
            other => Err(format!("unknown attempt outcome: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub step_index: usize,
    pub field_key: String,
    pub outcome: AttemptOutcome,
    pub at: DateTime<Utc>,
    pub screenshot: Option<PathBuf>,
    pub note: Option<String>,
}

impl AttemptRecord {
    pub fn new(step_index: usize, field_key: impl Into<String>, outcome: AttemptOutcome) -> Self {
        Self {
            step_index,
            field_key: field_key.into(),
            outcome,
            at: Utc::now(),
            screenshot: None,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_screenshot(mut self, path: Option<PathBuf>) -> Self {
        self.screenshot = path;
        self
    }
}

/// Audit trail of one submission. Records can only be appended; nothing is
/// ever rewritten or removed.
#[derive(Debug, Default)]
pub struct AttemptTrail {
    records: Vec<AttemptRecord>,
}

impl AttemptTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: AttemptRecord) {
        self.records.push(record);
    }

    pub fn entries(&self) -> &[AttemptRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn for_step(&self, step_index: usize) -> impl Iterator<Item = &AttemptRecord> {
        self.records
            .iter()
            .filter(move |record| record.step_index == step_index)
    }

    /// Step indices that completed successfully, used to re-derive the plan
    /// position after a reanchor reload.
    pub fn succeeded_steps(&self) -> Vec<usize> {
        let mut steps: Vec<usize> = self
            .records
            .iter()
            .filter(|record| record.outcome == AttemptOutcome::Success)
            .map(|record| record.step_index)
            .collect();
        steps.sort_unstable();
        steps.dedup();
        steps
    }

    pub fn into_entries(self) -> Vec<AttemptRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trail_is_append_only() {
        let mut trail = AttemptTrail::new();
        trail.record(AttemptRecord::new(0, "titulo", AttemptOutcome::Transient));
        trail.record(AttemptRecord::new(0, "titulo", AttemptOutcome::Success));
        trail.record(AttemptRecord::new(1, "precio", AttemptOutcome::Success));
        assert_eq!(trail.len(), 3);
        assert_eq!(trail.for_step(0).count(), 2);
        assert_eq!(trail.succeeded_steps(), vec![0, 1]);
    }

    #[test]
    fn outcome_round_trips_through_strings() {
        for outcome in [
            AttemptOutcome::Success,
            AttemptOutcome::Transient,
            AttemptOutcome::Structural,
            AttemptOutcome::Fatal,
        ] {
            assert_eq!(outcome.as_str().parse::<AttemptOutcome>(), Ok(outcome));
        }
    }
}
