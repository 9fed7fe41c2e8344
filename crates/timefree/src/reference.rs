use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, TimefreeError};
use crate::timestamp::Timestamp;

/// Matches `.../ts/<station>/<YYYYMMDDhhmmss>` with an optional trailing slash,
/// query or fragment. A 13 or 15 digit timestamp does not match.
pub static REFERENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|/)ts/([A-Za-z0-9_-]+)/(\d{14})/?(?:[?#].*)?$").unwrap()
});

/// A program as named on a page reference: station plus nominal start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramRef {
    pub station_id: String,
    pub start_at: Timestamp,
}

impl ProgramRef {
    /// Parse a page reference such as `https://radiko.jp/#!/ts/TBS/20240101120000`.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let caps = REFERENCE_REGEX.captures(input).ok_or_else(|| {
            TimefreeError::invalid_reference(input, "expected `.../ts/<station>/<YYYYMMDDhhmmss>`")
        })?;
        Self::new(&caps[1], &caps[2])
    }

    pub fn new(station_id: &str, start_at: &str) -> Result<Self> {
        if station_id.is_empty()
            || !station_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(TimefreeError::invalid_reference(
                station_id,
                "station id must be alphanumeric",
            ));
        }
        Ok(Self {
            station_id: station_id.to_owned(),
            start_at: Timestamp::parse(start_at)?,
        })
    }
}

impl fmt::Display for ProgramRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.station_id, self.start_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_page_reference() {
        let r = ProgramRef::parse("https://radiko.jp/#!/ts/ABC123/20240101120000").unwrap();
        assert_eq!(r.station_id, "ABC123");
        assert_eq!(r.start_at.to_string(), "20240101120000");

        let r = ProgramRef::parse("https://example.invalid/ts/TBS/20240101120000/?x=1").unwrap();
        assert_eq!(r.station_id, "TBS");
    }

    #[test]
    fn rejects_malformed_references() {
        let thirteen = ProgramRef::parse("https://radiko.jp/#!/ts/ABC123/2024010112000");
        assert!(matches!(thirteen, Err(TimefreeError::InvalidReference { .. })));

        let fifteen = ProgramRef::parse("https://radiko.jp/#!/ts/ABC123/202401011200000");
        assert!(fifteen.is_err());

        let missing_station = ProgramRef::parse("https://radiko.jp/#!/ts/20240101120000");
        assert!(missing_station.is_err());

        assert!(ProgramRef::parse("https://radiko.jp/#!/live/TBS").is_err());
        assert!(ProgramRef::parse("").is_err());
    }

    #[test]
    fn rejects_impossible_dates() {
        assert!(ProgramRef::parse("https://radiko.jp/#!/ts/TBS/20240230120000").is_err());
    }

    #[test]
    fn explicit_pair() {
        let r = ProgramRef::new("QRR", "20240101050000").unwrap();
        assert_eq!(r.to_string(), "QRR/20240101050000");
        assert!(ProgramRef::new("Q R", "20240101050000").is_err());
    }
}
