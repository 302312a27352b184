use std::fmt;

use batchgate_core::{format_timestamp, parse_timestamp};
use chrono::NaiveDateTime;

/// Severity of an audit line. Anything that is not `Error` or `Info` is
/// written with the neutral `--` marker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LogStatus {
    Error,
    Info,
    #[default]
    Success,
    Custom(String),
}

impl LogStatus {
    pub fn as_str(&self) -> &str {
        match self {
            LogStatus::Error => "Error",
            LogStatus::Info => "Info",
            LogStatus::Success => "Success",
            LogStatus::Custom(s) => s,
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            LogStatus::Error => "!!",
            LogStatus::Info => "??",
            _ => "--",
        }
    }
}

impl From<&str> for LogStatus {
    fn from(s: &str) -> Self {
        match s.trim() {
            x if x.eq_ignore_ascii_case("error") => LogStatus::Error,
            x if x.eq_ignore_ascii_case("info") => LogStatus::Info,
            x if x.eq_ignore_ascii_case("success") => LogStatus::Success,
            x => LogStatus::Custom(x.to_string()),
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub status: LogStatus,
    pub at: NaiveDateTime,
    pub message: String,
}

const MARKERS: [&str; 3] = [" !! ", " ?? ", " -- "];

impl LogEntry {
    pub fn new(status: LogStatus, at: NaiveDateTime, message: &str) -> Self {
        // one entry per line
        let message = message.trim_end().replace('\r', "").replace('\n', "\\n");
        Self { status, at, message }
    }

    /// `"<STATUS padded to 8> <marker> <Y-m-d H:i:s> <marker> <message>\n"`
    pub fn to_line(&self) -> String {
        let m = self.status.marker();
        format!("{:<8} {m} {} {m} {}\n", self.status.as_str(), format_timestamp(&self.at), self.message)
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\n', '\r']);
        let (idx, marker) = MARKERS
            .iter()
            .filter_map(|m| line.find(m).map(|i| (i, *m)))
            .min_by_key(|(i, _)| *i)?;
        let status = LogStatus::from(line[..idx].trim_end());
        let rest = &line[idx + marker.len()..];
        let ts = rest.get(..19)?;
        let message = rest.get(19..)?.strip_prefix(marker)?;
        Some(Self { status, at: parse_timestamp(ts).ok()?, message: message.to_string() })
    }
}
