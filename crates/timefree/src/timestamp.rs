use std::fmt;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};

use crate::error::{Result, TimefreeError};

const FORMAT: &str = "%Y%m%d%H%M%S";

/// The broadcast day starts at 05:00 local time, not at midnight.
const BROADCAST_DAY_OFFSET_HOURS: i64 = 5;

/// Service-local wall clock time in the 14-digit `YYYYMMDDhhmmss` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    pub fn parse(input: &str) -> Result<Self> {
        if input.len() != 14 || !input.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimefreeError::invalid_reference(
                input,
                "timestamp must be 14 digits (YYYYMMDDhhmmss)",
            ));
        }
        NaiveDateTime::parse_from_str(input, FORMAT)
            .map(Self)
            .map_err(|e| TimefreeError::invalid_reference(input, e.to_string()))
    }

    /// Schedule documents are bucketed by broadcast day.
    pub fn schedule_date(&self) -> String {
        (self.0 - TimeDelta::hours(BROADCAST_DAY_OFFSET_HOURS))
            .format("%Y%m%d")
            .to_string()
    }

    pub fn checked_add(&self, offset: Duration) -> Option<Self> {
        let delta = TimeDelta::from_std(offset).ok()?;
        self.0.checked_add_signed(delta).map(Self)
    }

    /// Elapsed time from `earlier` to `self`, zero when `earlier` is later.
    pub fn duration_since(&self, earlier: &Timestamp) -> Duration {
        (self.0 - earlier.0).to_std().unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(FORMAT))
    }
}
