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

//! The master's view of a volume server.
//!
//! Growth and vacuum drive volume servers through this trait; the HTTP
//! implementation lives in `silo-api`, and tests plug in mocks.

use crate::error::TopologyError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use silo_core::{ReplicaPlacement, Ttl, VolumeId};

/// A volume server's reply to a vacuum pre-check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VacuumCheckReport {
    /// Fraction of the data file that is garbage.
    pub garbage_ratio: f64,
    /// Whether the server can compact the volume right now.
    pub can_vacuum: bool,
}

/// Admin operations the master issues to volume servers.
#[async_trait]
pub trait VolumeServerClient: Send + Sync {
    /// Creates an empty volume on `node`.
    async fn allocate_volume(
        &self,
        node: &str,
        volume_id: VolumeId,
        collection: &str,
        replica_placement: ReplicaPlacement,
        ttl: Ttl,
    ) -> Result<(), TopologyError>;

    /// Deletes a volume from `node` (used to undo failed growth).
    async fn delete_volume(&self, node: &str, volume_id: VolumeId) -> Result<(), TopologyError>;

    /// Vacuum phase 1: ask whether `node` can compact the volume.
    async fn vacuum_check(
        &self,
        node: &str,
        volume_id: VolumeId,
    ) -> Result<VacuumCheckReport, TopologyError>;

    /// Vacuum phase 2: build the compacted side files on `node`.
    async fn vacuum_compact(&self, node: &str, volume_id: VolumeId) -> Result<(), TopologyError>;

    /// Vacuum phase 3: swap the side files in on `node`.
    async fn vacuum_commit(&self, node: &str, volume_id: VolumeId) -> Result<(), TopologyError>;

    /// Tells `node` to re-replicate the volume from `source_node`.
    async fn replicate_volume(
        &self,
        node: &str,
        volume_id: VolumeId,
        source_node: &str,
    ) -> Result<(), TopologyError>;
}
