//! RNC identifier format and per-year counter.
//!
//! An RNC number is `YYYY-NNN`: a four digit year, a dash, and a sequence
//! number zero-padded to at least three digits. Sequences above 999 widen
//! (`2025-1000`). The persisted form must match `^[0-9]{4}-[0-9]{3,}$`.

use crate::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

static RNC_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]{4})-([0-9]{3,})$").expect("Invalid RNC number regex"));

/// Largest year that still renders as four digits.
pub const MAX_YEAR: i32 = 9999;

// ============================================================================
// RNC NUMBER
// ============================================================================

/// A well-formed RNC number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RncNumber {
    year: i32,
    sequence: u64,
}

impl RncNumber {
    /// Build a number from a year and a counter value.
    ///
    /// The counter value comes straight from a `BIGINT` column, so it is
    /// validated here rather than trusted.
    pub fn new(year: i32, sequence: i64) -> Result<Self, ValidationError> {
        if !(0..=MAX_YEAR).contains(&year) {
            return Err(ValidationError::InvalidRncNumber {
                value: format!("{}-{:03}", year, sequence),
                reason: format!("year must be between 0 and {}", MAX_YEAR),
            });
        }
        if sequence < 1 {
            return Err(ValidationError::InvalidRncNumber {
                value: format!("{:04}-{:03}", year, sequence),
                reason: "sequence must be at least 1".to_string(),
            });
        }
        Ok(Self {
            year,
            sequence: sequence as u64,
        })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The `YYYY-` prefix shared by every number of `year`.
    pub fn year_prefix(year: i32) -> String {
        format!("{:04}-", year)
    }
}

impl fmt::Display for RncNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:03}", self.year, self.sequence)
    }
}

impl FromStr for RncNumber {
    type Err = ValidationError;

    /// Parse the canonical form only. `2025-0042` is rejected because it
    /// would render back as `2025-042`; use [`legacy_suffix`] for lenient
    /// reads of stored values.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ValidationError::InvalidRncNumber {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let caps = RNC_FORMAT
            .captures(s)
            .ok_or_else(|| invalid("expected YYYY-NNN"))?;
        let year: i32 = caps[1].parse().map_err(|_| invalid("year is not numeric"))?;
        let sequence: i64 = caps[2]
            .parse()
            .map_err(|_| invalid("sequence is out of range"))?;

        let number = RncNumber::new(year, sequence)?;
        if number.to_string() != s {
            return Err(invalid("sequence has extra leading zeros"));
        }
        Ok(number)
    }
}

impl Serialize for RncNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RncNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// LEGACY SUFFIX PARSING
// ============================================================================

/// Numeric suffix of a stored `rnc_number` for `year`.
///
/// Stored values may be free text carried in by CSV import. Only
/// `"{year}-{digits}"` (surrounding whitespace ignored, any number of leading
/// zeros) yields a value; everything else is `None`.
pub fn legacy_suffix(value: &str, year: i32) -> Option<u64> {
    let prefix = RncNumber::year_prefix(year);
    let suffix = value.trim().strip_prefix(prefix.as_str())?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Highest parsable suffix among `values` for `year`, or 0.
pub fn max_legacy_suffix<'a, I>(values: I, year: i32) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    values
        .into_iter()
        .filter_map(|value| legacy_suffix(value, year))
        .max()
        .unwrap_or(0)
}

// ============================================================================
// YEAR COUNTER
// ============================================================================

/// Per-year sequence source. `last_seq` is the highest number ever issued
/// for `year`, whether or not a case ended up carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearCounter {
    pub year: i32,
    pub last_seq: i64,
}

impl YearCounter {
    /// Value the counter takes after one advance.
    ///
    /// `current` is `None` when the year has no row yet. `floor` lifts the
    /// counter over numbers that exist in the case table without having gone
    /// through the counter (imports, rows older than the counter table).
    pub fn advance(current: Option<i64>, floor: i64) -> i64 {
        current.unwrap_or(0).max(floor).max(0) + 1
    }
}

// =============================================================================
// TESTS
// =============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
