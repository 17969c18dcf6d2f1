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

//! Write assignment: pick a writable volume and mint file ids for it.

use crate::error::TopologyError;
use crate::node::NodeView;
use crate::topology::Topology;
use crate::volume_layout::LayoutKey;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use silo_core::{FileId, ReplicaPlacement, Ttl};
use std::sync::Arc;

/// A client's assignment request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignRequest {
    /// Needle ids wanted; 0 means 1.
    #[serde(default)]
    pub count: u64,
    /// Replica placement override, e.g. `"001"`.
    #[serde(default)]
    pub replication: Option<String>,
    /// Collection name.
    #[serde(default)]
    pub collection: String,
    /// Volume TTL, e.g. `"3m"`.
    #[serde(default)]
    pub ttl: Option<String>,
    /// Preferred data center; falls back to any DC when it has no
    /// writable volume.
    #[serde(default, rename = "dataCenter")]
    pub data_center: Option<String>,
}

/// A minted write assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    /// File id of the first needle, `"<vid>,<id_hex><cookie_hex>"`.
    pub fid: String,
    /// Admin URL of the primary replica.
    pub url: String,
    /// Client-facing URL of the primary replica.
    #[serde(rename = "publicUrl")]
    pub public_url: String,
    /// Needle ids granted (consecutive, starting at the fid's).
    pub count: u64,
    /// Data center actually serving the assignment.
    #[serde(rename = "dataCenter")]
    pub data_center: String,
}

/// The assignment algorithm over the cluster map.
pub struct Assigner {
    topology: Arc<Topology>,
    default_replication: ReplicaPlacement,
    growth_threshold: usize,
}

impl Assigner {
    /// Creates an assigner. `growth_threshold` is the writable-volume count
    /// below which growth should be triggered (default 7 in the server).
    pub fn new(
        topology: Arc<Topology>,
        default_replication: ReplicaPlacement,
        growth_threshold: usize,
    ) -> Self {
        Self {
            topology,
            default_replication,
            growth_threshold,
        }
    }

    /// Resolves the layout key an assign request maps to.
    pub fn layout_key(&self, request: &AssignRequest) -> Result<LayoutKey, TopologyError> {
        let replica_placement = match &request.replication {
            Some(s) if !s.is_empty() => s
                .parse()
                .map_err(|_| TopologyError::InvalidRequest(format!("replication '{}'", s)))?,
            _ => self.default_replication,
        };
        let ttl = match &request.ttl {
            Some(s) => s
                .parse::<Ttl>()
                .map_err(|_| TopologyError::InvalidRequest(format!("ttl '{}'", s)))?,
            None => Ttl::NONE,
        };
        Ok(LayoutKey {
            collection: request.collection.clone(),
            replica_placement,
            ttl,
        })
    }

    /// Whether the layout is running low on writable volumes.
    pub async fn needs_growth(&self, key: &LayoutKey) -> bool {
        self.topology.writable_count(key).await < self.growth_threshold
    }

    /// The writable-volume count below which growth is triggered.
    pub fn growth_threshold(&self) -> usize {
        self.growth_threshold
    }

    /// Picks a writable volume and mints `count` consecutive needle ids.
    ///
    /// The volume is chosen uniformly at random from the eligible set,
    /// constrained to the requested DC when possible and falling back to
    /// any DC otherwise. The primary replica is the node with the most free
    /// slots in the preferred DC, ties broken randomly.
    pub async fn assign(&self, request: &AssignRequest) -> Result<Assignment, TopologyError> {
        let count = request.count.max(1);
        let key = self.layout_key(request)?;

        let mut candidates = self
            .topology
            .writable_volumes(&key, request.data_center.as_deref())
            .await;
        let mut preferred_dc = request.data_center.clone();
        if candidates.is_empty() && request.data_center.is_some() {
            // altRequest: the preferred DC has nothing writable.
            candidates = self.topology.writable_volumes(&key, None).await;
            preferred_dc = None;
        }
        let Some(&volume_id) = candidates.choose(&mut rand::thread_rng()) else {
            return Err(TopologyError::NoWritableVolume {
                collection: key.collection,
            });
        };

        let replicas = self.topology.volume_replica_views(&key, volume_id).await;
        let primary = choose_primary(&replicas, preferred_dc.as_deref())
            .ok_or(TopologyError::UnknownVolume(volume_id))?;

        let first_id = self
            .topology
            .next_needle_ids(&primary.url, count)
            .await
            .ok_or_else(|| TopologyError::UnknownNode(primary.url.clone()))?;
        let cookie: u32 = rand::thread_rng().gen();
        let fid = FileId::new(volume_id, first_id, cookie).to_string();

        Ok(Assignment {
            fid,
            url: primary.url.clone(),
            public_url: primary.public_url.clone(),
            count,
            data_center: primary.data_center.clone(),
        })
    }
}

/// Most free slots wins; the preferred DC beats free slots; ties random.
fn choose_primary<'a>(replicas: &'a [NodeView], preferred_dc: Option<&str>) -> Option<&'a NodeView> {
    let pool: Vec<&NodeView> = match preferred_dc {
        Some(dc) if replicas.iter().any(|n| n.data_center == dc) => {
            replicas.iter().filter(|n| n.data_center == dc).collect()
        }
        _ => replicas.iter().collect(),
    };
    let best = pool.iter().map(|n| n.free_slots).max()?;
    let top: Vec<&NodeView> = pool.into_iter().filter(|n| n.free_slots == best).collect();
    top.choose(&mut rand::thread_rng()).copied()
}
