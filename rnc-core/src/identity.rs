//! Identity types for RNC entities

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wall-clock timestamp as persisted by the case table (no time zone).
pub type Timestamp = NaiveDateTime;

/// Store-assigned case identifier.
///
/// Backends hand these out from a serial column; the value is opaque to
/// callers and never reused for another case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(i64);

impl CaseId {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for CaseId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CaseId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_id_display_and_parse() {
        let id = CaseId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(" 42 ".parse::<CaseId>().unwrap(), id);
        assert!("abc".parse::<CaseId>().is_err());
    }

    #[test]
    fn test_case_id_serializes_as_plain_integer() {
        let json = serde_json::to_string(&CaseId::new(7)).unwrap();
        assert_eq!(json, "7");
    }
}
