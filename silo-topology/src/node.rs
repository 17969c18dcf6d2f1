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

//! Data nodes as the master sees them.
//!
//! The DC → rack → node tree is kept flat: every node carries its data
//! center and rack names, and the tree views needed for placement are
//! grouped on demand. This keeps one lock and no cross-references.

use rand::Rng;
use serde::Serialize;
use silo_core::{VolumeId, VolumeInfo};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// One volume server in the cluster map.
pub struct DataNode {
    /// Node identity: its admin URL (`host:port`).
    pub url: String,
    /// URL clients should use for reads and writes.
    pub public_url: String,
    /// Data center the node reported.
    pub data_center: String,
    /// Rack the node reported.
    pub rack: String,
    /// Volume slots the node offers.
    pub max_volume_count: usize,
    /// Volumes the node holds, by id.
    pub volumes: HashMap<VolumeId, VolumeInfo>,
    /// When the last heartbeat arrived.
    pub last_heartbeat: Instant,
    /// Set once the node misses enough pulses.
    pub stale: bool,
    needle_seq: AtomicU64,
}

impl DataNode {
    /// Registers a node on its first heartbeat.
    ///
    /// The needle-id counter starts at a random 32-bit prefix shifted high,
    /// so ids handed out by different replicas of one volume cannot collide
    /// any more often than cookies do.
    pub fn new(
        url: String,
        public_url: String,
        data_center: String,
        rack: String,
        max_volume_count: usize,
    ) -> Self {
        let prefix = (rand::thread_rng().gen::<u32>() as u64) << 32;
        Self {
            url,
            public_url,
            data_center,
            rack,
            max_volume_count,
            volumes: HashMap::new(),
            last_heartbeat: Instant::now(),
            stale: false,
            needle_seq: AtomicU64::new(prefix | 1),
        }
    }

    /// Free volume slots on this node.
    pub fn free_slots(&self) -> usize {
        self.max_volume_count.saturating_sub(self.volumes.len())
    }

    /// Allocates `count` consecutive needle ids; returns the first.
    pub fn next_needle_ids(&self, count: u64) -> u64 {
        self.needle_seq.fetch_add(count, Ordering::Relaxed)
    }
}

/// Read-only node summary used for placement decisions and `/vol/list`.
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    /// Node identity (admin URL).
    pub url: String,
    /// Client-facing URL.
    pub public_url: String,
    /// Data center.
    pub data_center: String,
    /// Rack.
    pub rack: String,
    /// Volumes currently held.
    pub volume_count: usize,
    /// Volume slots offered.
    pub max_volume_count: usize,
    /// Free volume slots.
    pub free_slots: usize,
    /// Whether the node has missed enough pulses to be stale.
    pub stale: bool,
}

impl From<&DataNode> for NodeView {
    fn from(node: &DataNode) -> Self {
        Self {
            url: node.url.clone(),
            public_url: node.public_url.clone(),
            data_center: node.data_center.clone(),
            rack: node.rack.clone(),
            volume_count: node.volumes.len(),
            max_volume_count: node.max_volume_count,
            free_slots: node.free_slots(),
            stale: node.stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_slots() {
        let node = DataNode::new(
            "n1:8080".into(),
            "n1:8080".into(),
            "dc1".into(),
            "r1".into(),
            3,
        );
        assert_eq!(node.free_slots(), 3);
    }

    #[test]
    fn test_needle_ids_are_monotonic() {
        let node = DataNode::new(
            "n1:8080".into(),
            "n1:8080".into(),
            "dc1".into(),
            "r1".into(),
            3,
        );
        let a = node.next_needle_ids(5);
        let b = node.next_needle_ids(1);
        assert_eq!(b, a + 5);
        assert_ne!(a, 0);
    }
}
