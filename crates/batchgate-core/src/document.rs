use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::model::{format_timestamp, parse_timestamp, RunGateRecord};
use crate::queue::TaskQueue;

/// The persisted state of one batch: gate record plus task queue.
///
/// ```json
/// { "cron_run_log": { "run-date": "2026-01-01 00:00:00", "run-status": "finished" },
///   "tasks": { "0": "t1" } }
/// ```
///
/// Unknown top-level keys are carried through untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub cron_run_log: RunLogFields,
    #[serde(default, skip_serializing_if = "TaskQueue::is_empty")]
    pub tasks: TaskQueue,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Raw gate fields as stored; either may be missing in a damaged document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLogFields {
    #[serde(rename = "run-date", default, skip_serializing_if = "Option::is_none")]
    pub run_date: Option<String>,
    #[serde(rename = "run-status", default, skip_serializing_if = "Option::is_none")]
    pub run_status: Option<String>,
}

impl StateDocument {
    /// Document for a store that has never been written.
    pub fn bootstrap(now: NaiveDateTime) -> Self {
        let mut doc = Self::default();
        doc.set_gate_record(&RunGateRecord::bootstrap(now));
        doc
    }

    pub fn gate_record(&self) -> Result<RunGateRecord, CoreError> {
        let (Some(date), Some(status)) = (&self.cron_run_log.run_date, &self.cron_run_log.run_status) else {
            return Err(CoreError::MissingKeys);
        };
        Ok(RunGateRecord { run_date: parse_timestamp(date)?, run_status: status.parse()? })
    }

    pub fn set_gate_record(&mut self, record: &RunGateRecord) {
        self.cron_run_log = RunLogFields {
            run_date: Some(format_timestamp(&record.run_date)),
            run_status: Some(record.run_status.as_str().to_string()),
        };
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}
