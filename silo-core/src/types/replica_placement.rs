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

//! Replica placement policy.
//!
//! A placement is written as three digits `"<same_rack><other_racks><other_dcs>"`,
//! e.g. `"001"` = one extra copy in another data center, `"200"` = two extra
//! copies on other nodes in the same rack.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How many extra copies of a volume exist and where they may be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReplicaPlacement {
    /// Extra copies on other nodes in the same rack.
    pub same_rack: u8,
    /// Extra copies on other racks in the same data center.
    pub other_racks: u8,
    /// Extra copies in other data centers.
    pub other_dcs: u8,
}

impl ReplicaPlacement {
    /// Total number of copies, including the primary.
    pub fn copy_count(&self) -> usize {
        1 + self.same_rack as usize + self.other_racks as usize + self.other_dcs as usize
    }

    /// Packs the policy into the single byte stored in the volume superblock.
    pub fn to_byte(self) -> u8 {
        self.other_dcs * 100 + self.other_racks * 10 + self.same_rack
    }

    /// Unpacks a superblock byte.
    pub fn from_byte(b: u8) -> Self {
        Self {
            other_dcs: b / 100,
            other_racks: (b / 10) % 10,
            same_rack: b % 10,
        }
    }
}

impl FromStr for ReplicaPlacement {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::default());
        }
        let digits: Vec<u8> = s
            .chars()
            .map(|c| c.to_digit(10).map(|d| d as u8))
            .collect::<Option<_>>()
            .ok_or_else(|| StorageError::InvalidReplicaPlacement(s.to_string()))?;
        if digits.len() != 3 {
            return Err(StorageError::InvalidReplicaPlacement(s.to_string()));
        }
        Ok(Self {
            same_rack: digits[0],
            other_racks: digits[1],
            other_dcs: digits[2],
        })
    }
}

impl TryFrom<String> for ReplicaPlacement {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ReplicaPlacement> for String {
    fn from(rp: ReplicaPlacement) -> String {
        rp.to_string()
    }
}

impl fmt::Display for ReplicaPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.same_rack, self.other_racks, self.other_dcs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let rp: ReplicaPlacement = "012".parse().unwrap();
        assert_eq!(rp.same_rack, 0);
        assert_eq!(rp.other_racks, 1);
        assert_eq!(rp.other_dcs, 2);
        assert_eq!(rp.to_string(), "012");
        assert_eq!(rp.copy_count(), 4);
    }

    #[test]
    fn test_empty_is_no_replication() {
        let rp: ReplicaPlacement = "".parse().unwrap();
        assert_eq!(rp.copy_count(), 1);
        assert_eq!(rp.to_string(), "000");
    }

    #[test]
    fn test_byte_round_trip() {
        for s in ["000", "001", "010", "100", "200", "110"] {
            let rp: ReplicaPlacement = s.parse().unwrap();
            assert_eq!(ReplicaPlacement::from_byte(rp.to_byte()), rp);
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!("ab1".parse::<ReplicaPlacement>().is_err());
        assert!("0000".parse::<ReplicaPlacement>().is_err());
        assert!("01".parse::<ReplicaPlacement>().is_err());
    }
}
