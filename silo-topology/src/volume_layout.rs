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

//! Per-(collection, placement, ttl) volume bookkeeping.

use serde::Serialize;
use silo_core::{ReplicaPlacement, Ttl, VolumeId, VolumeInfo};
use std::collections::{HashMap, HashSet};

/// The key a volume layout is grouped under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LayoutKey {
    /// Collection name ("" for the default collection).
    pub collection: String,
    /// Replica placement policy.
    pub replica_placement: ReplicaPlacement,
    /// Volume-level TTL.
    pub ttl: Ttl,
}

/// Which volumes of one layout are writable, and where every replica lives.
///
/// The master owns the writable set: a volume leaves it when any replica
/// reports read-only, when it crosses the size limit, or while a vacuum is
/// running on it.
#[derive(Default)]
pub struct VolumeLayout {
    writable: HashSet<VolumeId>,
    readonly: HashSet<VolumeId>,
    locations: HashMap<VolumeId, Vec<String>>,
}

impl VolumeLayout {
    /// Records that `node` holds `volume`, refreshing writability.
    pub fn register(&mut self, node: &str, info: &VolumeInfo, size_limit: u64) {
        let nodes = self.locations.entry(info.id).or_default();
        if !nodes.iter().any(|n| n == node) {
            nodes.push(node.to_string());
        }
        if info.read_only || info.size >= size_limit {
            self.writable.remove(&info.id);
            self.readonly.insert(info.id);
        } else if !self.readonly.contains(&info.id) {
            self.writable.insert(info.id);
        }
    }

    /// Removes `node`'s replica of `volume`; drops the volume entirely when
    /// no replica remains. Returns true when the volume disappeared.
    pub fn unregister(&mut self, node: &str, volume: VolumeId) -> bool {
        let gone = match self.locations.get_mut(&volume) {
            Some(nodes) => {
                nodes.retain(|n| n != node);
                nodes.is_empty()
            }
            None => true,
        };
        if gone {
            self.locations.remove(&volume);
            self.writable.remove(&volume);
            self.readonly.remove(&volume);
        }
        gone
    }

    /// Nodes holding `volume`.
    pub fn locations_of(&self, volume: VolumeId) -> Option<&[String]> {
        self.locations.get(&volume).map(|v| v.as_slice())
    }

    /// The writable volume ids.
    pub fn writable(&self) -> impl Iterator<Item = VolumeId> + '_ {
        self.writable.iter().copied()
    }

    /// Number of writable volumes.
    pub fn writable_count(&self) -> usize {
        self.writable.len()
    }

    /// All volume ids known to the layout.
    pub fn volume_ids(&self) -> impl Iterator<Item = VolumeId> + '_ {
        self.locations.keys().copied()
    }

    /// Takes a volume out of the writable set (vacuum, freeze).
    pub fn suspend_writable(&mut self, volume: VolumeId) -> bool {
        self.writable.remove(&volume)
    }

    /// Puts a volume back into the writable set unless it went read-only.
    pub fn restore_writable(&mut self, volume: VolumeId) {
        if self.locations.contains_key(&volume) && !self.readonly.contains(&volume) {
            self.writable.insert(volume);
        }
    }

    /// Marks a volume permanently read-only.
    pub fn set_readonly(&mut self, volume: VolumeId) {
        if self.locations.contains_key(&volume) {
            self.writable.remove(&volume);
            self.readonly.insert(volume);
        }
    }

    /// True when the layout tracks no volumes at all.
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: VolumeId, size: u64, read_only: bool) -> VolumeInfo {
        VolumeInfo {
            id,
            collection: String::new(),
            replica_placement: ReplicaPlacement::default(),
            ttl: Ttl::NONE,
            size,
            file_count: 0,
            deleted_count: 0,
            deleted_bytes: 0,
            read_only,
            compaction_revision: 0,
            last_modified: 0,
        }
    }

    #[test]
    fn test_register_and_writability() {
        let mut layout = VolumeLayout::default();
        layout.register("n1", &info(1, 100, false), 1000);
        layout.register("n2", &info(1, 100, false), 1000);
        assert_eq!(layout.writable_count(), 1);
        assert_eq!(layout.locations_of(1).unwrap(), &["n1", "n2"]);

        // Crossing the size limit makes it read-only for assignment.
        layout.register("n1", &info(1, 2000, false), 1000);
        assert_eq!(layout.writable_count(), 0);

        // And it stays read-only even if another replica looks small.
        layout.register("n2", &info(1, 100, false), 1000);
        assert_eq!(layout.writable_count(), 0);
    }

    #[test]
    fn test_unregister_drops_empty_volume() {
        let mut layout = VolumeLayout::default();
        layout.register("n1", &info(1, 0, false), 1000);
        layout.register("n2", &info(1, 0, false), 1000);
        assert!(!layout.unregister("n1", 1));
        assert!(layout.unregister("n2", 1));
        assert!(layout.is_empty());
        assert_eq!(layout.writable_count(), 0);
    }

    #[test]
    fn test_suspend_restore() {
        let mut layout = VolumeLayout::default();
        layout.register("n1", &info(1, 0, false), 1000);
        assert!(layout.suspend_writable(1));
        assert_eq!(layout.writable_count(), 0);
        layout.restore_writable(1);
        assert_eq!(layout.writable_count(), 1);

        layout.set_readonly(1);
        layout.restore_writable(1);
        assert_eq!(layout.writable_count(), 0);
    }
}
