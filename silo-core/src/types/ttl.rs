// Copyright 2026 Silo Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Time-to-live encoding.
//!
//! A TTL packs into two bytes (count + unit) so it fits both the volume
//! superblock and the per-needle frame. The text form is `"3m"`, `"2s"`,
//! `"12h"` etc.; an empty string means no expiry.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// TTL unit codes as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TtlUnit {
    /// No expiry.
    None = 0,
    /// Seconds.
    Second = 1,
    /// Minutes.
    Minute = 2,
    /// Hours.
    Hour = 3,
    /// Days.
    Day = 4,
    /// Weeks.
    Week = 5,
    /// Months (30 days).
    Month = 6,
    /// Years (365 days).
    Year = 7,
}

impl TtlUnit {
    fn from_byte(b: u8) -> Self {
        match b {
            1 => TtlUnit::Second,
            2 => TtlUnit::Minute,
            3 => TtlUnit::Hour,
            4 => TtlUnit::Day,
            5 => TtlUnit::Week,
            6 => TtlUnit::Month,
            7 => TtlUnit::Year,
            _ => TtlUnit::None,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            TtlUnit::None => "",
            TtlUnit::Second => "s",
            TtlUnit::Minute => "m",
            TtlUnit::Hour => "h",
            TtlUnit::Day => "d",
            TtlUnit::Week => "w",
            TtlUnit::Month => "M",
            TtlUnit::Year => "y",
        }
    }

    fn seconds(self) -> u64 {
        match self {
            TtlUnit::None => 0,
            TtlUnit::Second => 1,
            TtlUnit::Minute => 60,
            TtlUnit::Hour => 3600,
            TtlUnit::Day => 86400,
            TtlUnit::Week => 7 * 86400,
            TtlUnit::Month => 30 * 86400,
            TtlUnit::Year => 365 * 86400,
        }
    }
}

/// A count/unit TTL, two bytes on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ttl {
    /// Number of units; 0 means no expiry.
    pub count: u8,
    /// Unit of the count.
    pub unit: TtlUnit,
}

impl Ttl {
    /// The "no expiry" TTL.
    pub const NONE: Ttl = Ttl {
        count: 0,
        unit: TtlUnit::None,
    };

    /// True when this TTL never expires.
    pub fn is_none(&self) -> bool {
        self.count == 0 || self.unit == TtlUnit::None
    }

    /// Lifetime in seconds; 0 for no expiry.
    pub fn as_secs(&self) -> u64 {
        self.count as u64 * self.unit.seconds()
    }

    /// Whether a needle appended at `append_at` (unix seconds) has expired
    /// by `now`.
    pub fn is_expired(&self, append_at: u64, now: u64) -> bool {
        !self.is_none() && now >= append_at + self.as_secs()
    }

    /// Packs into the two on-disk bytes.
    pub fn to_bytes(self) -> [u8; 2] {
        [self.count, self.unit as u8]
    }

    /// Unpacks the two on-disk bytes.
    pub fn from_bytes(b: [u8; 2]) -> Self {
        Self {
            count: b[0],
            unit: TtlUnit::from_byte(b[1]),
        }
    }
}

impl Default for Ttl {
    fn default() -> Self {
        Ttl::NONE
    }
}

impl FromStr for Ttl {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Ttl::NONE);
        }
        let (count_part, unit_part) = s.split_at(s.len() - 1);
        let unit = match unit_part {
            "s" => TtlUnit::Second,
            "m" => TtlUnit::Minute,
            "h" => TtlUnit::Hour,
            "d" => TtlUnit::Day,
            "w" => TtlUnit::Week,
            "M" => TtlUnit::Month,
            "y" => TtlUnit::Year,
            // A bare number defaults to minutes.
            _ if unit_part.chars().all(|c| c.is_ascii_digit()) => {
                let count: u8 = s.parse().map_err(|_| StorageError::InvalidTtl(s.to_string()))?;
                return Ok(Ttl {
                    count,
                    unit: TtlUnit::Minute,
                });
            }
            _ => return Err(StorageError::InvalidTtl(s.to_string())),
        };
        let count: u8 = count_part
            .parse()
            .map_err(|_| StorageError::InvalidTtl(s.to_string()))?;
        Ok(Ttl { count, unit })
    }
}

impl TryFrom<String> for Ttl {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ttl> for String {
    fn from(ttl: Ttl) -> String {
        ttl.to_string()
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            Ok(())
        } else {
            write!(f, "{}{}", self.count, self.unit.suffix())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!("2s".parse::<Ttl>().unwrap().as_secs(), 2);
        assert_eq!("3m".parse::<Ttl>().unwrap().as_secs(), 180);
        assert_eq!("1h".parse::<Ttl>().unwrap().as_secs(), 3600);
        assert_eq!("1d".parse::<Ttl>().unwrap().as_secs(), 86400);
        assert_eq!("5".parse::<Ttl>().unwrap().as_secs(), 300);
        assert!("".parse::<Ttl>().unwrap().is_none());
        assert!("2x".parse::<Ttl>().is_err());
    }

    #[test]
    fn test_byte_round_trip() {
        let ttl: Ttl = "12h".parse().unwrap();
        assert_eq!(Ttl::from_bytes(ttl.to_bytes()), ttl);
        assert_eq!(Ttl::from_bytes([0, 0]), Ttl::NONE);
    }

    #[test]
    fn test_expiry() {
        let ttl: Ttl = "2s".parse().unwrap();
        assert!(!ttl.is_expired(1000, 1001));
        assert!(ttl.is_expired(1000, 1002));
        assert!(ttl.is_expired(1000, 5000));
        assert!(!Ttl::NONE.is_expired(1000, u64::MAX));
    }

    #[test]
    fn test_display() {
        assert_eq!("3m".parse::<Ttl>().unwrap().to_string(), "3m");
        assert_eq!(Ttl::NONE.to_string(), "");
    }
}
