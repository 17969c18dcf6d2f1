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

//! The cluster map: nodes, their volumes, and the per-layout writable sets.
//!
//! Heartbeat deltas are applied under the tree's write locks; assignment and
//! lookup work from read locks. Lock order is always nodes before layouts.

use crate::node::{DataNode, NodeView};
use crate::volume_layout::{LayoutKey, VolumeLayout};
use serde::{Deserialize, Serialize};
use silo_core::{VolumeId, VolumeInfo};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// One pulse from a volume server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Node identity (admin URL, `host:port`).
    pub url: String,
    /// Client-facing URL.
    pub public_url: String,
    /// Data center the node lives in.
    pub data_center: String,
    /// Rack within the data center.
    pub rack: String,
    /// Volume slots the node offers.
    pub max_volume_count: usize,
    /// Full volume list; authoritative when `is_full` is set.
    #[serde(default)]
    pub volumes: Vec<VolumeInfo>,
    /// Volumes added or changed since the previous pulse.
    #[serde(default)]
    pub new_volumes: Vec<VolumeInfo>,
    /// Volumes removed since the previous pulse.
    #[serde(default)]
    pub deleted_volumes: Vec<VolumeId>,
    /// True on the first pulse after (re)connecting.
    #[serde(default)]
    pub is_full: bool,
}

/// What a heartbeat changed, for gossip to watching clients.
#[derive(Debug, Default, Clone)]
pub struct HeartbeatOutcome {
    /// True when this was the node's first pulse.
    pub is_new_node: bool,
    /// Volume ids that appeared on the node.
    pub new_vids: Vec<VolumeId>,
    /// Volume ids that disappeared from the node.
    pub deleted_vids: Vec<VolumeId>,
}

/// One replica's address, as returned by lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeLocation {
    /// Admin URL.
    pub url: String,
    /// Client-facing URL.
    pub public_url: String,
}

/// A vacuum candidate: a volume whose garbage crossed the threshold.
#[derive(Debug, Clone)]
pub struct VacuumCandidate {
    /// Layout the volume belongs to.
    pub key: LayoutKey,
    /// The volume.
    pub volume_id: VolumeId,
    /// Admin URLs of every replica.
    pub nodes: Vec<String>,
    /// Worst garbage ratio reported by any replica.
    pub garbage_ratio: f64,
}

/// The in-memory cluster map maintained by the master.
pub struct Topology {
    nodes: RwLock<HashMap<String, DataNode>>,
    layouts: RwLock<HashMap<LayoutKey, VolumeLayout>>,
    max_volume_id: AtomicU32,
    volume_size_limit: u64,
}

impl Topology {
    /// Creates an empty topology. Volumes whose size reaches
    /// `volume_size_limit` are taken out of the writable sets.
    pub fn new(volume_size_limit: u64) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            layouts: RwLock::new(HashMap::new()),
            max_volume_id: AtomicU32::new(0),
            volume_size_limit,
        }
    }

    /// The size at which a volume stops receiving assignments.
    pub fn volume_size_limit(&self) -> u64 {
        self.volume_size_limit
    }

    /// The next unused volume id.
    pub fn next_volume_id(&self) -> VolumeId {
        self.max_volume_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn observe_volume_id(&self, id: VolumeId) {
        self.max_volume_id.fetch_max(id, Ordering::SeqCst);
    }

    /// Applies one heartbeat under the tree write locks.
    pub async fn apply_heartbeat(&self, beat: &Heartbeat) -> HeartbeatOutcome {
        let mut outcome = HeartbeatOutcome::default();
        let mut added: Vec<VolumeInfo> = Vec::new();
        let mut removed: Vec<VolumeInfo> = Vec::new();

        {
            let mut nodes = self.nodes.write().await;
            let node = nodes.entry(beat.url.clone()).or_insert_with(|| {
                info!(node = %beat.url, dc = %beat.data_center, rack = %beat.rack, "node joined");
                outcome.is_new_node = true;
                DataNode::new(
                    beat.url.clone(),
                    beat.public_url.clone(),
                    beat.data_center.clone(),
                    beat.rack.clone(),
                    beat.max_volume_count,
                )
            });
            node.public_url = beat.public_url.clone();
            node.data_center = beat.data_center.clone();
            node.rack = beat.rack.clone();
            node.max_volume_count = beat.max_volume_count;
            node.last_heartbeat = std::time::Instant::now();
            node.stale = false;

            if beat.is_full {
                let fresh: HashMap<VolumeId, &VolumeInfo> =
                    beat.volumes.iter().map(|v| (v.id, v)).collect();
                for (id, old) in node.volumes.clone() {
                    if !fresh.contains_key(&id) {
                        removed.push(old);
                    }
                }
                for info in &beat.volumes {
                    if !node.volumes.contains_key(&info.id) {
                        outcome.new_vids.push(info.id);
                    }
                    added.push(info.clone());
                }
                node.volumes = beat.volumes.iter().map(|v| (v.id, v.clone())).collect();
            } else {
                for info in &beat.new_volumes {
                    if !node.volumes.contains_key(&info.id) {
                        outcome.new_vids.push(info.id);
                    }
                    node.volumes.insert(info.id, info.clone());
                    added.push(info.clone());
                }
                for id in &beat.deleted_volumes {
                    if let Some(old) = node.volumes.remove(id) {
                        removed.push(old);
                    }
                }
            }
        }

        {
            let mut layouts = self.layouts.write().await;
            for info in &added {
                self.observe_volume_id(info.id);
                layouts
                    .entry(layout_key_of(info))
                    .or_default()
                    .register(&beat.url, info, self.volume_size_limit);
            }
            for info in &removed {
                outcome.deleted_vids.push(info.id);
                let key = layout_key_of(info);
                let now_empty = match layouts.get_mut(&key) {
                    Some(layout) => {
                        layout.unregister(&beat.url, info.id);
                        layout.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    layouts.remove(&key);
                }
            }
        }

        outcome
    }

    /// Every replica location of a volume.
    pub async fn lookup(&self, volume_id: VolumeId) -> Option<Vec<VolumeLocation>> {
        let nodes = self.nodes.read().await;
        let layouts = self.layouts.read().await;
        for layout in layouts.values() {
            if let Some(found) = layout.locations_of(volume_id) {
                let locations: Vec<VolumeLocation> = found
                    .iter()
                    .filter_map(|url| nodes.get(url))
                    .map(|n| VolumeLocation {
                        url: n.url.clone(),
                        public_url: n.public_url.clone(),
                    })
                    .collect();
                if !locations.is_empty() {
                    return Some(locations);
                }
            }
        }
        None
    }

    /// Writable volume ids of a layout, optionally restricted to a DC.
    pub async fn writable_volumes(
        &self,
        key: &LayoutKey,
        data_center: Option<&str>,
    ) -> Vec<VolumeId> {
        let nodes = self.nodes.read().await;
        let layouts = self.layouts.read().await;
        let Some(layout) = layouts.get(key) else {
            return Vec::new();
        };
        layout
            .writable()
            .filter(|vid| match data_center {
                None => true,
                Some(dc) => layout
                    .locations_of(*vid)
                    .map(|urls| {
                        urls.iter()
                            .filter_map(|u| nodes.get(u))
                            .any(|n| n.data_center == dc)
                    })
                    .unwrap_or(false),
            })
            .collect()
    }

    /// Number of writable volumes in a layout.
    pub async fn writable_count(&self, key: &LayoutKey) -> usize {
        let layouts = self.layouts.read().await;
        layouts.get(key).map(|l| l.writable_count()).unwrap_or(0)
    }

    /// Node views of every replica of a writable volume.
    pub async fn volume_replica_views(&self, key: &LayoutKey, volume_id: VolumeId) -> Vec<NodeView> {
        let nodes = self.nodes.read().await;
        let layouts = self.layouts.read().await;
        let Some(layout) = layouts.get(key) else {
            return Vec::new();
        };
        layout
            .locations_of(volume_id)
            .map(|urls| {
                urls.iter()
                    .filter_map(|u| nodes.get(u))
                    .map(NodeView::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Allocates `count` needle ids from a node's counter.
    pub async fn next_needle_ids(&self, node_url: &str, count: u64) -> Option<u64> {
        let nodes = self.nodes.read().await;
        nodes.get(node_url).map(|n| n.next_needle_ids(count))
    }

    /// A snapshot of every live node.
    pub async fn node_views(&self) -> Vec<NodeView> {
        let nodes = self.nodes.read().await;
        nodes.values().map(NodeView::from).collect()
    }

    /// Registers a volume created by growth on the given nodes, so it is
    /// assignable before the next heartbeat confirms it.
    pub async fn register_grown_volume(&self, key: &LayoutKey, volume_id: VolumeId, urls: &[String]) {
        self.observe_volume_id(volume_id);
        let info = VolumeInfo {
            id: volume_id,
            collection: key.collection.clone(),
            replica_placement: key.replica_placement,
            ttl: key.ttl,
            size: silo_core::volume::SUPER_BLOCK_SIZE as u64,
            file_count: 0,
            deleted_count: 0,
            deleted_bytes: 0,
            read_only: false,
            compaction_revision: 0,
            last_modified: 0,
        };
        let mut nodes = self.nodes.write().await;
        for url in urls {
            if let Some(node) = nodes.get_mut(url) {
                node.volumes.insert(volume_id, info.clone());
            }
        }
        drop(nodes);
        let mut layouts = self.layouts.write().await;
        let layout = layouts.entry(key.clone()).or_default();
        for url in urls {
            layout.register(url, &info, self.volume_size_limit);
        }
    }

    /// Takes a volume out of its writable set for the duration of a vacuum.
    pub async fn suspend_writable(&self, key: &LayoutKey, volume_id: VolumeId) {
        let mut layouts = self.layouts.write().await;
        if let Some(layout) = layouts.get_mut(key) {
            layout.suspend_writable(volume_id);
        }
    }

    /// Restores a volume to its writable set after a vacuum.
    pub async fn restore_writable(&self, key: &LayoutKey, volume_id: VolumeId) {
        let mut layouts = self.layouts.write().await;
        if let Some(layout) = layouts.get_mut(key) {
            layout.restore_writable(volume_id);
        }
    }

    /// Marks a volume read-only cluster-wide (freeze).
    pub async fn set_readonly(&self, key: &LayoutKey, volume_id: VolumeId) {
        let mut layouts = self.layouts.write().await;
        if let Some(layout) = layouts.get_mut(key) {
            layout.set_readonly(volume_id);
        }
    }

    /// Volumes whose worst-replica garbage ratio crossed `threshold`.
    pub async fn vacuum_candidates(&self, threshold: f64) -> Vec<VacuumCandidate> {
        let nodes = self.nodes.read().await;
        let layouts = self.layouts.read().await;
        let mut candidates = Vec::new();
        for (key, layout) in layouts.iter() {
            for vid in layout.volume_ids() {
                let Some(urls) = layout.locations_of(vid) else {
                    continue;
                };
                let ratio = urls
                    .iter()
                    .filter_map(|u| nodes.get(u))
                    .filter_map(|n| n.volumes.get(&vid))
                    .map(|v| v.garbage_ratio())
                    .fold(0.0f64, f64::max);
                if ratio >= threshold {
                    candidates.push(VacuumCandidate {
                        key: key.clone(),
                        volume_id: vid,
                        nodes: urls.to_vec(),
                        garbage_ratio: ratio,
                    });
                }
            }
        }
        candidates
    }

    /// Expires nodes that missed their pulses.
    ///
    /// A stale node's volumes leave every writable and readonly set; the
    /// volumes are reported so watchers learn the locations are gone.
    pub async fn sweep_stale(&self, stale_after: Duration) -> Vec<(VolumeLocation, Vec<VolumeId>)> {
        let mut swept = Vec::new();
        let mut nodes = self.nodes.write().await;
        let mut expired: Vec<(String, String, Vec<VolumeInfo>)> = Vec::new();
        for node in nodes.values_mut() {
            if !node.stale && node.last_heartbeat.elapsed() >= stale_after {
                node.stale = true;
                let infos: Vec<VolumeInfo> = node.volumes.drain().map(|(_, v)| v).collect();
                warn!(node = %node.url, volumes = infos.len(), "node expired, dropping its volumes");
                expired.push((node.url.clone(), node.public_url.clone(), infos));
            }
        }
        drop(nodes);
        if expired.is_empty() {
            return swept;
        }
        let mut layouts = self.layouts.write().await;
        for (url, public_url, infos) in expired {
            let mut lost = Vec::new();
            for info in infos {
                let key = layout_key_of(&info);
                let now_empty = match layouts.get_mut(&key) {
                    Some(layout) => {
                        layout.unregister(&url, info.id);
                        layout.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    layouts.remove(&key);
                }
                lost.push(info.id);
            }
            swept.push((
                VolumeLocation {
                    url,
                    public_url,
                },
                lost,
            ));
        }
        swept
    }

    /// Distinct collection names.
    pub async fn collections(&self) -> Vec<String> {
        let layouts = self.layouts.read().await;
        let mut names: Vec<String> = layouts.keys().map(|k| k.collection.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    /// Full dump for `/vol/list`.
    pub async fn status(&self) -> TopologyStatus {
        let nodes = self.nodes.read().await;
        let layouts = self.layouts.read().await;
        TopologyStatus {
            max_volume_id: self.max_volume_id.load(Ordering::SeqCst),
            nodes: nodes.values().map(NodeView::from).collect(),
            layouts: layouts
                .iter()
                .map(|(key, layout)| LayoutStatus {
                    key: key.clone(),
                    writable: layout.writable().collect(),
                    volumes: layout.volume_ids().collect(),
                })
                .collect(),
        }
    }
}

/// Serializable topology dump.
#[derive(Debug, Serialize)]
pub struct TopologyStatus {
    /// Highest volume id the master has seen.
    pub max_volume_id: u32,
    /// Every known node.
    pub nodes: Vec<NodeView>,
    /// Every layout with its volumes.
    pub layouts: Vec<LayoutStatus>,
}

/// One layout's volumes in the status dump.
#[derive(Debug, Serialize)]
pub struct LayoutStatus {
    /// Layout key.
    pub key: LayoutKey,
    /// Writable volume ids.
    pub writable: Vec<VolumeId>,
    /// All volume ids.
    pub volumes: Vec<VolumeId>,
}

pub(crate) fn layout_key_of(info: &VolumeInfo) -> LayoutKey {
    LayoutKey {
        collection: info.collection.clone(),
        replica_placement: info.replica_placement,
        ttl: info.ttl,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_core::{ReplicaPlacement, Ttl};

    fn volume(id: VolumeId, size: u64) -> VolumeInfo {
        VolumeInfo {
            id,
            collection: String::new(),
            replica_placement: ReplicaPlacement::default(),
            ttl: Ttl::NONE,
            size,
            file_count: 0,
            deleted_count: 0,
            deleted_bytes: 0,
            read_only: false,
            compaction_revision: 0,
            last_modified: 0,
        }
    }

    fn beat(url: &str, dc: &str, volumes: Vec<VolumeInfo>) -> Heartbeat {
        Heartbeat {
            url: url.to_string(),
            public_url: url.to_string(),
            data_center: dc.to_string(),
            rack: "r1".to_string(),
            max_volume_count: 8,
            volumes,
            new_volumes: Vec::new(),
            deleted_volumes: Vec::new(),
            is_full: true,
        }
    }

    fn default_key() -> LayoutKey {
        LayoutKey {
            collection: String::new(),
            replica_placement: ReplicaPlacement::default(),
            ttl: Ttl::NONE,
        }
    }

    #[tokio::test]
    async fn test_heartbeat_registers_node_and_volumes() {
        let topo = Topology::new(1 << 30);
        let outcome = topo
            .apply_heartbeat(&beat("n1:8080", "dc1", vec![volume(1, 100), volume(2, 100)]))
            .await;
        assert!(outcome.is_new_node);
        assert_eq!(outcome.new_vids.len(), 2);

        let locations = topo.lookup(1).await.unwrap();
        assert_eq!(locations[0].url, "n1:8080");
        assert_eq!(topo.writable_count(&default_key()).await, 2);
        assert_eq!(topo.next_volume_id(), 3);
    }

    #[tokio::test]
    async fn test_full_heartbeat_removes_missing_volumes() {
        let topo = Topology::new(1 << 30);
        topo.apply_heartbeat(&beat("n1:8080", "dc1", vec![volume(1, 0), volume(2, 0)]))
            .await;
        let outcome = topo
            .apply_heartbeat(&beat("n1:8080", "dc1", vec![volume(2, 0)]))
            .await;
        assert!(!outcome.is_new_node);
        assert_eq!(outcome.deleted_vids, vec![1]);
        assert!(topo.lookup(1).await.is_none());
        assert!(topo.lookup(2).await.is_some());
    }

    #[tokio::test]
    async fn test_delta_heartbeat() {
        let topo = Topology::new(1 << 30);
        topo.apply_heartbeat(&beat("n1:8080", "dc1", vec![volume(1, 0)]))
            .await;
        let mut delta = beat("n1:8080", "dc1", Vec::new());
        delta.is_full = false;
        delta.new_volumes = vec![volume(5, 0)];
        delta.deleted_volumes = vec![1];
        let outcome = topo.apply_heartbeat(&delta).await;
        assert_eq!(outcome.new_vids, vec![5]);
        assert_eq!(outcome.deleted_vids, vec![1]);
        assert!(topo.lookup(5).await.is_some());
        assert!(topo.lookup(1).await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_volume_is_not_writable() {
        let topo = Topology::new(1000);
        topo.apply_heartbeat(&beat("n1:8080", "dc1", vec![volume(1, 5000)]))
            .await;
        assert_eq!(topo.writable_count(&default_key()).await, 0);
        assert!(topo.lookup(1).await.is_some(), "still readable");
    }

    #[tokio::test]
    async fn test_dc_filter() {
        let topo = Topology::new(1 << 30);
        topo.apply_heartbeat(&beat("n1:8080", "dc1", vec![volume(1, 0)]))
            .await;
        topo.apply_heartbeat(&beat("n2:8080", "dc2", vec![volume(2, 0)]))
            .await;
        let key = default_key();
        let in_dc1 = topo.writable_volumes(&key, Some("dc1")).await;
        assert_eq!(in_dc1, vec![1]);
        let mut all = topo.writable_volumes(&key, None).await;
        all.sort();
        assert_eq!(all, vec![1, 2]);
        assert!(topo.writable_volumes(&key, Some("dc3")).await.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_stale_drops_volumes() {
        let topo = Topology::new(1 << 30);
        topo.apply_heartbeat(&beat("n1:8080", "dc1", vec![volume(1, 0)]))
            .await;
        // Zero tolerance: the node is instantly stale.
        let swept = topo.sweep_stale(Duration::from_secs(0)).await;
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].1, vec![1]);
        assert!(topo.lookup(1).await.is_none());

        // A fresh heartbeat brings it back.
        topo.apply_heartbeat(&beat("n1:8080", "dc1", vec![volume(1, 0)]))
            .await;
        assert!(topo.lookup(1).await.is_some());
    }

    #[tokio::test]
    async fn test_vacuum_candidates() {
        let topo = Topology::new(1 << 30);
        let mut dirty = volume(1, 1000);
        dirty.deleted_bytes = 500;
        topo.apply_heartbeat(&beat("n1:8080", "dc1", vec![dirty, volume(2, 1000)]))
            .await;
        let candidates = topo.vacuum_candidates(0.3).await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].volume_id, 1);
        assert!(candidates[0].garbage_ratio > 0.49);
    }
}
