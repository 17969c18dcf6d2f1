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

//! Volume statistics snapshot, as reported in heartbeats and `/status`.

use crate::types::{ReplicaPlacement, Ttl, VolumeId};
use serde::{Deserialize, Serialize};

/// A point-in-time summary of one volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Volume id.
    pub id: VolumeId,
    /// Collection the volume belongs to ("" for the default collection).
    pub collection: String,
    /// Replica placement policy.
    pub replica_placement: ReplicaPlacement,
    /// Volume-level default TTL.
    pub ttl: Ttl,
    /// Size of the `.dat` file in bytes.
    pub size: u64,
    /// Number of live needles.
    pub file_count: u64,
    /// Number of deleted needles not yet compacted away.
    pub deleted_count: u64,
    /// Bytes occupied by deleted or overwritten needles.
    pub deleted_bytes: u64,
    /// Whether the volume rejects appends.
    pub read_only: bool,
    /// Incremented on every successful compaction.
    pub compaction_revision: u16,
    /// Unix seconds of the last append or delete.
    pub last_modified: u64,
}

impl VolumeInfo {
    /// Fraction of the data file occupied by garbage, in `[0, 1]`.
    pub fn garbage_ratio(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            self.deleted_bytes as f64 / self.size as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_ratio() {
        let mut info = VolumeInfo {
            id: 1,
            collection: String::new(),
            replica_placement: ReplicaPlacement::default(),
            ttl: Ttl::NONE,
            size: 0,
            file_count: 0,
            deleted_count: 0,
            deleted_bytes: 0,
            read_only: false,
            compaction_revision: 0,
            last_modified: 0,
        };
        assert_eq!(info.garbage_ratio(), 0.0);
        info.size = 1000;
        info.deleted_bytes = 300;
        assert!((info.garbage_ratio() - 0.3).abs() < f64::EPSILON);
    }
}
