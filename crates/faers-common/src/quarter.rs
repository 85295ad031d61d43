//! The FAERS quarterly release identifier
//!
//! Quarters are published as `YYYYQn` with `n` in 1..=4 and are totally
//! ordered by (year, quarter). Parsing is case-insensitive; the canonical
//! rendering is upper case (`2023Q1`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A FAERS release quarter, e.g. `2023Q1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Quarter {
    year: u16,
    quarter: u8,
}

impl Quarter {
    /// Construct a quarter; `quarter` must be in 1..=4
    pub fn new(year: u16, quarter: u8) -> Option<Self> {
        if (1..=4).contains(&quarter) {
            Some(Self { year, quarter })
        } else {
            None
        }
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn quarter(&self) -> u8 {
        self.quarter
    }

    /// The quarter immediately after this one
    pub fn next(&self) -> Self {
        if self.quarter == 4 {
            Self { year: self.year + 1, quarter: 1 }
        } else {
            Self { year: self.year, quarter: self.quarter + 1 }
        }
    }

    /// Iterate quarters from `self` through `end`, inclusive
    pub fn range_inclusive(self, end: Quarter) -> impl Iterator<Item = Quarter> {
        let mut current = self;
        let mut done = self > end;
        std::iter::from_fn(move || {
            if done {
                return None;
            }
            let out = current;
            if current == end {
                done = true;
            } else {
                current = current.next();
            }
            Some(out)
        })
    }

    /// Lower-case rendering used in upstream download URLs (`2023q1`)
    pub fn to_url_fragment(&self) -> String {
        format!("{}q{}", self.year, self.quarter)
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Q{}", self.year, self.quarter)
    }
}

impl FromStr for Quarter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 6 || !s.is_ascii() {
            return Err(format!("Invalid quarter '{}': expected YYYYQn", s));
        }
        let (year_part, q_part) = s.split_at(4);
        let year: u16 = year_part
            .parse()
            .map_err(|_| format!("Invalid quarter '{}': bad year", s))?;
        let mut chars = q_part.chars();
        let marker = chars.next().unwrap_or_default();
        if !marker.eq_ignore_ascii_case(&'q') {
            return Err(format!("Invalid quarter '{}': expected 'Q' separator", s));
        }
        let quarter = chars
            .next()
            .and_then(|c| c.to_digit(10))
            .ok_or_else(|| format!("Invalid quarter '{}': bad quarter digit", s))?;
        Quarter::new(year, quarter as u8)
            .ok_or_else(|| format!("Invalid quarter '{}': quarter must be 1-4", s))
    }
}

impl TryFrom<String> for Quarter {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Quarter> for String {
    fn from(q: Quarter) -> Self {
        q.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("2023q1".parse::<Quarter>().unwrap(), Quarter::new(2023, 1).unwrap());
        assert_eq!("2023Q1".parse::<Quarter>().unwrap(), Quarter::new(2023, 1).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("2023".parse::<Quarter>().is_err());
        assert!("2023Q5".parse::<Quarter>().is_err());
        assert!("2023Q0".parse::<Quarter>().is_err());
        assert!("23Q1".parse::<Quarter>().is_err());
        assert!("2023X1".parse::<Quarter>().is_err());
    }

    #[test]
    fn test_display_upper_case() {
        let q: Quarter = "2024q3".parse().unwrap();
        assert_eq!(q.to_string(), "2024Q3");
        assert_eq!(q.to_url_fragment(), "2024q3");
    }

    #[test]
    fn test_ordering() {
        let q1: Quarter = "2023Q4".parse().unwrap();
        let q2: Quarter = "2024Q1".parse().unwrap();
        assert!(q1 < q2);
        assert!("2023Q1".parse::<Quarter>().unwrap() < "2023Q2".parse::<Quarter>().unwrap());
    }

    #[test]
    fn test_next_rolls_over_year() {
        let q: Quarter = "2023Q4".parse().unwrap();
        assert_eq!(q.next().to_string(), "2024Q1");
        assert_eq!("2023Q2".parse::<Quarter>().unwrap().next().to_string(), "2023Q3");
    }

    #[test]
    fn test_range_inclusive() {
        let start: Quarter = "2023Q3".parse().unwrap();
        let end: Quarter = "2024Q2".parse().unwrap();
        let quarters: Vec<String> =
            start.range_inclusive(end).map(|q| q.to_string()).collect();
        assert_eq!(quarters, vec!["2023Q3", "2023Q4", "2024Q1", "2024Q2"]);
    }

    #[test]
    fn test_range_empty_when_start_after_end() {
        let start: Quarter = "2024Q1".parse().unwrap();
        let end: Quarter = "2023Q1".parse().unwrap();
        assert_eq!(start.range_inclusive(end).count(), 0);
    }
}
