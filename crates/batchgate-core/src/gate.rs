use chrono::NaiveDateTime;

use crate::interval::RelativeOffset;
use crate::model::{RunGateRecord, RunStatus};

/// Outcome of the run gate for one invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// A finished batch is past its cooldown; a new batch starts now.
    Fresh,
    /// A batch is in progress (or crashed); carry on with the stored queue.
    Resume,
    /// The batch already ran for the current interval.
    Refused,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Refused)
    }
}

/// Pure gate decision. `interval` is applied to `now` to find the cutoff; a
/// finished run strictly older than the cutoff is admitted fresh, equal
/// timestamps refuse.
pub fn evaluate(record: &RunGateRecord, now: NaiveDateTime, interval: &RelativeOffset) -> Admission {
    match record.run_status {
        RunStatus::Running => Admission::Resume,
        RunStatus::Finished => match interval.apply(now) {
            Some(cutoff) if record.run_date < cutoff => Admission::Fresh,
            _ => Admission::Refused,
        },
    }
}

impl RunGateRecord {
    /// Evaluates the gate and applies the FINISHED -> RUNNING transition on a
    /// fresh admission.
    pub fn admit(&mut self, now: NaiveDateTime, interval: &RelativeOffset) -> Admission {
        let admission = evaluate(self, now, interval);
        if admission == Admission::Fresh {
            self.run_status = RunStatus::Running;
            self.run_date = now;
        }
        admission
    }

    pub fn finish(&mut self) {
        self.run_status = RunStatus::Finished;
    }
}
