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

//! Volume superblock: the first 8 bytes of every `.dat` file.

use crate::error::StorageError;
use crate::types::{ReplicaPlacement, Ttl};

/// Size of the superblock; needle frames start right after it, which makes
/// offset-unit 0 unaddressable and lets `.idx` use it as a deletion marker.
pub const SUPER_BLOCK_SIZE: usize = 8;

const CURRENT_VERSION: u8 = 1;

/// Volume-level metadata persisted at the head of the `.dat` file.
///
/// Layout: `version u8 | replica_placement u8 | ttl u16 | compaction_revision
/// u16 (big-endian) | reserved u16`. The compaction revision is the only
/// field ever rewritten in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    /// On-disk format version.
    pub version: u8,
    /// Replica placement the volume was created with.
    pub replica_placement: ReplicaPlacement,
    /// Volume-level default TTL.
    pub ttl: Ttl,
    /// Incremented on every successful compaction.
    pub compaction_revision: u16,
}

impl SuperBlock {
    /// Creates a fresh superblock for a new volume.
    pub fn new(replica_placement: ReplicaPlacement, ttl: Ttl) -> Self {
        Self {
            version: CURRENT_VERSION,
            replica_placement,
            ttl,
            compaction_revision: 0,
        }
    }

    /// Serializes to the on-disk bytes.
    pub fn to_bytes(self) -> [u8; SUPER_BLOCK_SIZE] {
        let ttl = self.ttl.to_bytes();
        let rev = self.compaction_revision.to_be_bytes();
        [
            self.version,
            self.replica_placement.to_byte(),
            ttl[0],
            ttl[1],
            rev[0],
            rev[1],
            0,
            0,
        ]
    }

    /// Parses the on-disk bytes.
    pub fn from_bytes(b: [u8; SUPER_BLOCK_SIZE]) -> Result<Self, StorageError> {
        if b[0] != CURRENT_VERSION {
            return Err(StorageError::NeedleMap(format!(
                "unsupported volume version {}",
                b[0]
            )));
        }
        Ok(Self {
            version: b[0],
            replica_placement: ReplicaPlacement::from_byte(b[1]),
            ttl: Ttl::from_bytes([b[2], b[3]]),
            compaction_revision: u16::from_be_bytes([b[4], b[5]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut sb = SuperBlock::new("010".parse().unwrap(), "3m".parse().unwrap());
        sb.compaction_revision = 7;
        assert_eq!(SuperBlock::from_bytes(sb.to_bytes()).unwrap(), sb);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut b = SuperBlock::new(Default::default(), Ttl::NONE).to_bytes();
        b[0] = 99;
        assert!(SuperBlock::from_bytes(b).is_err());
    }
}
