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

//! Volume growth: create new volumes on nodes satisfying a replica policy.
//!
//! For placement `(same_rack, other_racks, other_dcs)` the grower picks one
//! main data center, one main rack inside it with `same_rack + 1` distinct
//! nodes, `other_racks` additional racks with one node each, and one node in
//! each of `other_dcs` additional data centers. Node choices are weighted by
//! free volume slots. Partial allocation failures are undone and a
//! different placement is tried; running out of placements is
//! `NoFreeSpace`.

use crate::client::VolumeServerClient;
use crate::error::TopologyError;
use crate::node::NodeView;
use crate::topology::Topology;
use crate::volume_layout::LayoutKey;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

const PLACEMENT_ATTEMPTS: usize = 4;

/// Creates new volumes for layouts that run low.
pub struct VolumeGrowth {
    topology: Arc<Topology>,
    client: Arc<dyn VolumeServerClient>,
    locks: Mutex<HashMap<LayoutKey, Arc<Mutex<()>>>>,
}

impl VolumeGrowth {
    /// Creates a grower over the topology and a volume server client.
    pub fn new(topology: Arc<Topology>, client: Arc<dyn VolumeServerClient>) -> Self {
        Self {
            topology,
            client,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// How many volumes one growth round adds, by copy count. More copies
    /// cost more slots, so fewer are grown at a time.
    pub fn target_count(copy_count: usize) -> usize {
        match copy_count {
            1 => 7,
            2 => 6,
            3 => 3,
            _ => 1,
        }
    }

    /// Grows one batch for `key`, serialized per layout so concurrent
    /// triggers cannot double-grow: callers queue on the layout's lock, and
    /// once it is theirs the batch is skipped if the writable set already
    /// recovered to `skip_if_writable_at_least`. Returns the number of
    /// volumes created.
    pub async fn grow(
        &self,
        key: &LayoutKey,
        skip_if_writable_at_least: usize,
    ) -> Result<usize, TopologyError> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(key.clone()).or_default().clone()
        };
        let _guard = lock.lock().await;
        if skip_if_writable_at_least > 0
            && self.topology.writable_count(key).await >= skip_if_writable_at_least
        {
            return Ok(0);
        }
        self.grow_by(key, Self::target_count(key.replica_placement.copy_count()))
            .await
    }

    /// Grows up to `count` volumes; stops early once placements run out but
    /// reports success if at least one volume was created.
    pub async fn grow_by(&self, key: &LayoutKey, count: usize) -> Result<usize, TopologyError> {
        let mut grown = 0;
        for _ in 0..count {
            match self.grow_one(key).await {
                Ok(volume_id) => {
                    info!(volume_id, collection = %key.collection, "grew volume");
                    grown += 1;
                }
                Err(e) if grown > 0 => {
                    warn!(error = %e, grown, "growth stopped early");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(grown)
    }

    async fn grow_one(&self, key: &LayoutKey) -> Result<u32, TopologyError> {
        let mut last_err = None;
        for _ in 0..PLACEMENT_ATTEMPTS {
            let targets = self.pick_targets(key).await?;
            let volume_id = self.topology.next_volume_id();
            match self.allocate_on_all(volume_id, key, &targets).await {
                Ok(()) => {
                    let urls: Vec<String> = targets.iter().map(|t| t.url.clone()).collect();
                    self.topology
                        .register_grown_volume(key, volume_id, &urls)
                        .await;
                    return Ok(volume_id);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            TopologyError::NoFreeSpace("no placement satisfied the replica policy".into())
        }))
    }

    /// Allocates the volume on every target; on any failure the successful
    /// allocations are deleted again.
    async fn allocate_on_all(
        &self,
        volume_id: u32,
        key: &LayoutKey,
        targets: &[NodeView],
    ) -> Result<(), TopologyError> {
        let mut done: Vec<&NodeView> = Vec::new();
        for target in targets {
            match self
                .client
                .allocate_volume(
                    &target.url,
                    volume_id,
                    &key.collection,
                    key.replica_placement,
                    key.ttl,
                )
                .await
            {
                Ok(()) => done.push(target),
                Err(e) => {
                    warn!(volume_id, node = %target.url, error = %e, "allocation failed, undoing");
                    for ok in done {
                        if let Err(undo) = self.client.delete_volume(&ok.url, volume_id).await {
                            warn!(volume_id, node = %ok.url, error = %undo, "undo failed");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Chooses the target nodes for one new volume.
    async fn pick_targets(&self, key: &LayoutKey) -> Result<Vec<NodeView>, TopologyError> {
        let rp = key.replica_placement;
        let nodes = self.topology.node_views().await;
        let free: Vec<NodeView> = nodes
            .into_iter()
            .filter(|n| !n.stale && n.free_slots > 0)
            .collect();

        // dc -> rack -> nodes
        let mut tree: HashMap<String, HashMap<String, Vec<NodeView>>> = HashMap::new();
        for node in free {
            tree.entry(node.data_center.clone())
                .or_default()
                .entry(node.rack.clone())
                .or_default()
                .push(node);
        }

        let main_rack_need = rp.same_rack as usize + 1;
        let rack_need = rp.other_racks as usize + 1;

        // Main DC: must fit the main rack and the extra racks.
        let main_dc_candidates: Vec<(String, usize)> = tree
            .iter()
            .filter(|(_, racks)| {
                racks.len() >= rack_need && racks.values().any(|ns| ns.len() >= main_rack_need)
            })
            .map(|(dc, racks)| (dc.clone(), dc_weight(racks)))
            .collect();
        let main_dc = weighted_pick(main_dc_candidates)
            .ok_or_else(|| TopologyError::NoFreeSpace("no data center fits the policy".into()))?;

        // Other DCs, one free node each.
        let mut other_dcs: Vec<(String, usize)> = tree
            .iter()
            .filter(|(dc, _)| **dc != main_dc)
            .map(|(dc, racks)| (dc.clone(), dc_weight(racks)))
            .collect();
        let mut chosen_other_dcs = Vec::new();
        for _ in 0..rp.other_dcs {
            let Some(dc) = weighted_pick_from(&mut other_dcs) else {
                return Err(TopologyError::NoFreeSpace(
                    "not enough data centers for the policy".into(),
                ));
            };
            chosen_other_dcs.push(dc);
        }

        let mut targets = Vec::with_capacity(rp.copy_count());

        // Main rack and its nodes.
        let racks = &tree[&main_dc];
        let main_rack_candidates: Vec<(String, usize)> = racks
            .iter()
            .filter(|(_, ns)| ns.len() >= main_rack_need)
            .map(|(rack, ns)| (rack.clone(), rack_weight(ns)))
            .collect();
        let main_rack = weighted_pick(main_rack_candidates)
            .ok_or_else(|| TopologyError::NoFreeSpace("no rack fits the policy".into()))?;
        let mut rack_nodes: Vec<(NodeView, usize)> = racks[&main_rack]
            .iter()
            .map(|n| (n.clone(), n.free_slots))
            .collect();
        for _ in 0..main_rack_need {
            let Some(node) = weighted_pick_from(&mut rack_nodes) else {
                return Err(TopologyError::NoFreeSpace("not enough nodes in rack".into()));
            };
            targets.push(node);
        }

        // One node in each extra rack of the main DC.
        let mut other_racks: Vec<(String, usize)> = racks
            .iter()
            .filter(|(rack, _)| **rack != main_rack)
            .map(|(rack, ns)| (rack.clone(), rack_weight(ns)))
            .collect();
        for _ in 0..rp.other_racks {
            let Some(rack) = weighted_pick_from(&mut other_racks) else {
                return Err(TopologyError::NoFreeSpace(
                    "not enough racks for the policy".into(),
                ));
            };
            let candidates: Vec<(NodeView, usize)> = racks[&rack]
                .iter()
                .map(|n| (n.clone(), n.free_slots))
                .collect();
            match weighted_pick(candidates) {
                Some(node) => targets.push(node),
                None => {
                    return Err(TopologyError::NoFreeSpace(
                        "empty rack chosen for the policy".into(),
                    ))
                }
            }
        }

        // One node per extra DC, any rack.
        for dc in chosen_other_dcs {
            let candidates: Vec<(NodeView, usize)> = tree[&dc]
                .values()
                .flatten()
                .map(|n| (n.clone(), n.free_slots))
                .collect();
            match weighted_pick(candidates) {
                Some(node) => targets.push(node),
                None => {
                    return Err(TopologyError::NoFreeSpace(
                        "empty data center chosen for the policy".into(),
                    ))
                }
            }
        }

        Ok(targets)
    }
}

fn rack_weight(nodes: &[NodeView]) -> usize {
    nodes.iter().map(|n| n.free_slots).sum()
}

fn dc_weight(racks: &HashMap<String, Vec<NodeView>>) -> usize {
    racks.values().map(|ns| rack_weight(ns)).sum()
}

fn weighted_pick<T>(mut items: Vec<(T, usize)>) -> Option<T> {
    weighted_pick_from(&mut items)
}

/// Removes and returns one item, picked with probability proportional to
/// its weight.
fn weighted_pick_from<T>(items: &mut Vec<(T, usize)>) -> Option<T> {
    let total: usize = items.iter().map(|(_, w)| w).sum();
    if items.is_empty() || total == 0 {
        return None;
    }
    let mut roll = rand::thread_rng().gen_range(0..total);
    for i in 0..items.len() {
        let weight = items[i].1;
        if roll < weight {
            return Some(items.remove(i).0);
        }
        roll -= weight;
    }
    items.pop().map(|(t, _)| t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::VacuumCheckReport;
    use crate::topology::Heartbeat;
    use async_trait::async_trait;
    use silo_core::{ReplicaPlacement, Ttl, VolumeId};
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    /// Records allocations; optionally fails for one node.
    #[derive(Default)]
    struct MockClient {
        allocated: StdMutex<Vec<(String, VolumeId)>>,
        deleted: StdMutex<Vec<(String, VolumeId)>>,
        fail_node: Option<String>,
    }

    #[async_trait]
    impl VolumeServerClient for MockClient {
        async fn allocate_volume(
            &self,
            node: &str,
            volume_id: VolumeId,
            _collection: &str,
            _replica_placement: ReplicaPlacement,
            _ttl: Ttl,
        ) -> Result<(), TopologyError> {
            if self.fail_node.as_deref() == Some(node) {
                return Err(TopologyError::Client("boom".into()));
            }
            self.allocated
                .lock()
                .unwrap()
                .push((node.to_string(), volume_id));
            Ok(())
        }

        async fn delete_volume(
            &self,
            node: &str,
            volume_id: VolumeId,
        ) -> Result<(), TopologyError> {
            self.deleted
                .lock()
                .unwrap()
                .push((node.to_string(), volume_id));
            Ok(())
        }

        async fn vacuum_check(
            &self,
            _node: &str,
            _volume_id: VolumeId,
        ) -> Result<VacuumCheckReport, TopologyError> {
            Ok(VacuumCheckReport {
                garbage_ratio: 0.0,
                can_vacuum: true,
            })
        }

        async fn vacuum_compact(
            &self,
            _node: &str,
            _volume_id: VolumeId,
        ) -> Result<(), TopologyError> {
            Ok(())
        }

        async fn vacuum_commit(
            &self,
            _node: &str,
            _volume_id: VolumeId,
        ) -> Result<(), TopologyError> {
            Ok(())
        }

        async fn replicate_volume(
            &self,
            _node: &str,
            _volume_id: VolumeId,
            _source_node: &str,
        ) -> Result<(), TopologyError> {
            Ok(())
        }
    }

    fn empty_beat(url: &str, dc: &str, rack: &str, slots: usize) -> Heartbeat {
        Heartbeat {
            url: url.to_string(),
            public_url: url.to_string(),
            data_center: dc.to_string(),
            rack: rack.to_string(),
            max_volume_count: slots,
            volumes: Vec::new(),
            new_volumes: Vec::new(),
            deleted_volumes: Vec::new(),
            is_full: true,
        }
    }

    fn key(rp: &str) -> LayoutKey {
        LayoutKey {
            collection: String::new(),
            replica_placement: rp.parse().unwrap(),
            ttl: Ttl::NONE,
        }
    }

    #[tokio::test]
    async fn test_grow_single_copy() {
        let topo = Arc::new(Topology::new(1 << 30));
        topo.apply_heartbeat(&empty_beat("n1:8", "dc1", "r1", 10)).await;
        let client = Arc::new(MockClient::default());
        let growth = VolumeGrowth::new(topo.clone(), client.clone());

        let grown = growth.grow_by(&key("000"), 3).await.unwrap();
        assert_eq!(grown, 3);
        assert_eq!(client.allocated.lock().unwrap().len(), 3);

        // The grown volumes are assignable right away.
        assert_eq!(topo.writable_count(&key("000")).await, 3);
        // No duplicate volume ids.
        let mut vids: Vec<_> = client
            .allocated
            .lock()
            .unwrap()
            .iter()
            .map(|(_, v)| *v)
            .collect();
        vids.sort();
        vids.dedup();
        assert_eq!(vids.len(), 3);
    }

    #[tokio::test]
    async fn test_grow_same_rack_replicas_use_distinct_nodes() {
        let topo = Arc::new(Topology::new(1 << 30));
        topo.apply_heartbeat(&empty_beat("n1:8", "dc1", "r1", 5)).await;
        topo.apply_heartbeat(&empty_beat("n2:8", "dc1", "r1", 5)).await;
        topo.apply_heartbeat(&empty_beat("n3:8", "dc1", "r1", 5)).await;
        let client = Arc::new(MockClient::default());
        let growth = VolumeGrowth::new(topo.clone(), client.clone());

        growth.grow_by(&key("200"), 1).await.unwrap();
        let allocated = client.allocated.lock().unwrap();
        assert_eq!(allocated.len(), 3);
        let nodes: HashSet<_> = allocated.iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(nodes.len(), 3, "three distinct nodes in the rack");
    }

    #[tokio::test]
    async fn test_grow_other_rack_and_other_dc() {
        let topo = Arc::new(Topology::new(1 << 30));
        topo.apply_heartbeat(&empty_beat("a1:8", "dc1", "r1", 5)).await;
        topo.apply_heartbeat(&empty_beat("a2:8", "dc1", "r2", 5)).await;
        topo.apply_heartbeat(&empty_beat("b1:8", "dc2", "r9", 5)).await;
        let client = Arc::new(MockClient::default());
        let growth = VolumeGrowth::new(topo.clone(), client.clone());

        growth.grow_by(&key("011"), 1).await.unwrap();
        let allocated = client.allocated.lock().unwrap();
        assert_eq!(allocated.len(), 3);
        let nodes: HashSet<_> = allocated.iter().map(|(n, _)| n.clone()).collect();
        assert!(nodes.contains("b1:8"), "other-DC copy must land in dc2");
        assert_eq!(nodes.len(), 3);
    }

    #[tokio::test]
    async fn test_grow_insufficient_cluster_is_no_free_space() {
        let topo = Arc::new(Topology::new(1 << 30));
        topo.apply_heartbeat(&empty_beat("n1:8", "dc1", "r1", 5)).await;
        let client = Arc::new(MockClient::default());
        let growth = VolumeGrowth::new(topo, client);

        match growth.grow_by(&key("001"), 1).await {
            Err(TopologyError::NoFreeSpace(_)) => {}
            other => panic!("expected NoFreeSpace, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_grow_does_not_double_grow() {
        let topo = Arc::new(Topology::new(1 << 30));
        topo.apply_heartbeat(&empty_beat("n1:8", "dc1", "r1", 100)).await;
        let client = Arc::new(MockClient::default());
        let growth = Arc::new(VolumeGrowth::new(topo.clone(), client.clone()));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let growth = growth.clone();
            handles.push(tokio::spawn(async move {
                growth.grow(&key("000"), 1).await.unwrap()
            }));
        }
        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        // Exactly one caller grew a batch; the rest saw a writable volume
        // and skipped.
        assert_eq!(total, VolumeGrowth::target_count(1));
        assert_eq!(
            client.allocated.lock().unwrap().len(),
            VolumeGrowth::target_count(1)
        );
    }

    #[tokio::test]
    async fn test_partial_allocation_is_undone() {
        let topo = Arc::new(Topology::new(1 << 30));
        topo.apply_heartbeat(&empty_beat("n1:8", "dc1", "r1", 5)).await;
        topo.apply_heartbeat(&empty_beat("n2:8", "dc1", "r1", 5)).await;
        let client = Arc::new(MockClient {
            fail_node: Some("n2:8".to_string()),
            ..Default::default()
        });
        let growth = VolumeGrowth::new(topo.clone(), client.clone());

        let result = growth.grow_by(&key("100"), 1).await;
        assert!(result.is_err());
        let allocated = client.allocated.lock().unwrap();
        let deleted = client.deleted.lock().unwrap();
        // Every allocation that succeeded before the failure was undone.
        assert_eq!(allocated.len(), deleted.len());
        assert_eq!(topo.writable_count(&key("100")).await, 0);
    }
}
