use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Timestamp layout used in the state document and the audit log.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Layout of a logical run date (and of per-day log file names).
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Finished,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "running" => Ok(RunStatus::Running),
            "finished" => Ok(RunStatus::Finished),
            other => Err(CoreError::InvalidRunStatus(other.to_string())),
        }
    }
}

/// When the current (or most recent) batch started, and whether it is done.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunGateRecord {
    pub run_date: NaiveDateTime,
    pub run_status: RunStatus,
}

impl RunGateRecord {
    /// Record written the first time a store is created.
    pub fn bootstrap(now: NaiveDateTime) -> Self {
        Self { run_date: now, run_status: RunStatus::Running }
    }
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime, CoreError> {
    NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT).map_err(|_| CoreError::InvalidDate(s.to_string()))
}

/// Accepts either `Y-m-d` (pinned to midnight) or `Y-m-d H:i:s`.
pub fn parse_logical_now(s: &str) -> Result<NaiveDateTime, CoreError> {
    let s = s.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT) {
        return Ok(ts);
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| CoreError::InvalidDate(s.to_string()))
}
