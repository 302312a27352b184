use std::fmt;
use std::str::FromStr;

use chrono::{Duration, Months, NaiveDateTime};

use crate::error::CoreError;

/// Relative time offset such as `-24 hours` or `1 week 2 days ago`.
///
/// Calendar units (months, years) are kept apart from fixed-length units so
/// that `-1 month` lands on the same day of the previous month.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelativeOffset {
    pub months: i32,
    pub seconds: i64,
}

impl RelativeOffset {
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let invalid = || CoreError::InvalidInterval(input.to_string());

        let mut words: Vec<&str> = input.split_whitespace().collect();
        let negate = matches!(words.last(), Some(w) if w.eq_ignore_ascii_case("ago"));
        if negate {
            words.pop();
        }
        if words.is_empty() {
            return Err(invalid());
        }

        let mut offset = RelativeOffset::default();
        let mut pending: Option<i64> = None;
        for word in words {
            let (number, unit) = split_number(word);
            match (number, unit.is_empty()) {
                (Some(n), true) => {
                    if pending.replace(n).is_some() {
                        return Err(invalid());
                    }
                }
                (number, false) => {
                    let n = match (number, pending.take()) {
                        (Some(n), None) => n,
                        (None, Some(n)) => n,
                        _ => return Err(invalid()),
                    };
                    offset.add_unit(n, unit).ok_or_else(invalid)?;
                }
                (None, true) => return Err(invalid()),
            }
        }
        if pending.is_some() {
            return Err(invalid());
        }

        if negate {
            offset.months = -offset.months;
            offset.seconds = -offset.seconds;
        }
        Ok(offset)
    }

    fn add_unit(&mut self, n: i64, unit: &str) -> Option<()> {
        let unit = unit.to_ascii_lowercase();
        let unit = unit.strip_suffix('s').filter(|u| !u.is_empty()).unwrap_or(&unit);
        let seconds_per = match unit {
            "sec" | "second" => 1,
            "min" | "minute" => 60,
            "hour" => 3_600,
            "day" => 86_400,
            "week" => 7 * 86_400,
            "fortnight" => 14 * 86_400,
            "month" => {
                self.months = self.months.checked_add(i32::try_from(n).ok()?)?;
                return Some(());
            }
            "year" => {
                self.months = self.months.checked_add(i32::try_from(n.checked_mul(12)?).ok()?)?;
                return Some(());
            }
            _ => return None,
        };
        self.seconds = self.seconds.checked_add(n.checked_mul(seconds_per)?)?;
        Some(())
    }

    /// Shift `from` by this offset; `None` if the result leaves chrono's range.
    pub fn apply(&self, from: NaiveDateTime) -> Option<NaiveDateTime> {
        let shifted = if self.months >= 0 {
            from.checked_add_months(Months::new(self.months.unsigned_abs()))?
        } else {
            from.checked_sub_months(Months::new(self.months.unsigned_abs()))?
        };
        shifted.checked_add_signed(Duration::try_seconds(self.seconds)?)
    }
}

/// Splits `-24hours` into (`Some(-24)`, `"hours"`); a bare unit yields `None`.
fn split_number(word: &str) -> (Option<i64>, &str) {
    let digits_end = word
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '+' || c == '-'))))
        .map(|(i, _)| i)
        .unwrap_or(word.len());
    let (num, unit) = word.split_at(digits_end);
    (num.parse::<i64>().ok(), unit)
}

impl FromStr for RelativeOffset {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RelativeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.months, self.seconds) {
            (0, s) => write!(f, "{s:+} seconds"),
            (m, 0) => write!(f, "{m:+} months"),
            (m, s) => write!(f, "{m:+} months {s:+} seconds"),
        }
    }
}
