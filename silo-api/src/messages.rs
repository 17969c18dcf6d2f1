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

//! Concrete wire records for every endpoint. JSON is an encoding here, not
//! a type: handlers never build ad-hoc maps.

use serde::{Deserialize, Serialize};
use silo_core::{DiskStatus, VolumeId, VolumeInfo};
use silo_topology::VolumeLocation;

/// Response of a successful upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResult {
    /// Stored data size in bytes.
    pub size: u32,
    /// ETag of the stored needle (data CRC in hex).
    #[serde(rename = "eTag")]
    pub etag: String,
}

/// Response of a delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResult {
    /// Freed data size in bytes.
    pub size: u32,
}

/// Query parameters of an upload or delete.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadQuery {
    /// Client-supplied last-modified (unix seconds).
    pub ts: Option<u64>,
    /// Per-needle TTL, e.g. `"2s"`.
    pub ttl: Option<String>,
    /// Set to `"replicate"` on fan-out writes to stop further fan-out.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// `/dir/lookup` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupResponse {
    /// The volume looked up.
    #[serde(rename = "volumeId")]
    pub volume_id: VolumeId,
    /// Every replica holding it.
    pub locations: Vec<VolumeLocation>,
}

/// `/cluster/heartbeat` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Bytes at which the master stops assigning writes to a volume.
    #[serde(rename = "volumeSizeLimit")]
    pub volume_size_limit: u64,
}

/// One gossip entry on `/cluster/watch`: where volumes appeared or
/// disappeared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeLocationUpdate {
    /// Admin URL of the node.
    pub url: String,
    /// Client-facing URL of the node.
    #[serde(rename = "publicUrl")]
    pub public_url: String,
    /// Volumes that appeared on the node.
    #[serde(rename = "newVids")]
    pub new_vids: Vec<VolumeId>,
    /// Volumes that disappeared from the node.
    #[serde(rename = "deletedVids")]
    pub deleted_vids: Vec<VolumeId>,
}

/// `/cluster/watch` response: the updates observed within the poll window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchResponse {
    /// Updates observed; empty when the poll timed out quietly.
    pub updates: Vec<VolumeLocationUpdate>,
}

/// `/admin/assign_volume` and growth allocation parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignVolumeQuery {
    /// Volume id to create.
    pub volume: VolumeId,
    /// Collection name.
    #[serde(default)]
    pub collection: String,
    /// Replica placement, e.g. `"010"`.
    #[serde(default)]
    pub replication: Option<String>,
    /// Volume TTL, e.g. `"3m"`.
    #[serde(default)]
    pub ttl: Option<String>,
}

/// Query naming a single volume.
#[derive(Debug, Clone, Deserialize)]
pub struct VolumeQuery {
    /// The volume.
    pub volume: VolumeId,
}

/// `/admin/delete_collection` query.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionQuery {
    /// Collection to drop.
    pub collection: String,
}

/// `/admin/delete_collection` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteCollectionResult {
    /// Volumes removed.
    pub deleted_volumes: u64,
}

/// `/admin/vacuum_volume_check` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VacuumCheckResponse {
    /// Fraction of the data file that is garbage.
    #[serde(rename = "garbageRatio")]
    pub garbage_ratio: f64,
    /// Whether a vacuum can start now.
    #[serde(rename = "canVacuum")]
    pub can_vacuum: bool,
}

/// `/admin/volume_file_status` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeFileStatus {
    /// The volume.
    #[serde(rename = "volumeId")]
    pub volume_id: VolumeId,
    /// Size of the `.idx` file in bytes.
    #[serde(rename = "idxFileSize")]
    pub idx_size: u64,
    /// Size of the `.dat` file in bytes.
    #[serde(rename = "datFileSize")]
    pub dat_size: u64,
    /// Compaction revision of the files.
    #[serde(rename = "compactionRevision")]
    pub compaction_revision: u16,
    /// Live needle count.
    #[serde(rename = "fileCount")]
    pub file_count: u64,
    /// Unix seconds of the last append.
    #[serde(rename = "lastModified")]
    pub last_modified: u64,
    /// Collection the volume belongs to.
    pub collection: String,
}

/// `/admin/copy_file` query.
#[derive(Debug, Clone, Deserialize)]
pub struct CopyFileQuery {
    /// The volume.
    pub volume: VolumeId,
    /// `"dat"` or `"idx"`.
    pub kind: String,
    /// Compaction revision the caller expects; mismatch is refused.
    pub revision: u16,
    /// Copy bytes `[0, stop_offset)`.
    #[serde(rename = "stopOffset")]
    pub stop_offset: u64,
}

/// `/admin/volume_copy` request: pull a volume from a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeCopyRequest {
    /// The volume to copy.
    #[serde(rename = "volumeId")]
    pub volume_id: VolumeId,
    /// Admin URL of the node to copy from.
    #[serde(rename = "sourceNode")]
    pub source_node: String,
}

/// `/admin/volume_copy` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeCopyResponse {
    /// Unix seconds of the source's last append at copy time.
    #[serde(rename = "lastAppendAt")]
    pub last_append_at: u64,
}

/// Volume server `/status` response.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeServerStatus {
    /// Crate version.
    pub version: String,
    /// Admin URL.
    pub url: String,
    /// Client-facing URL.
    #[serde(rename = "publicUrl")]
    pub public_url: String,
    /// Every mounted volume.
    pub volumes: Vec<VolumeInfo>,
}

/// `/stats/disk` response.
#[derive(Debug, Clone, Serialize)]
pub struct DiskStats {
    /// Per-location accounting.
    pub disks: Vec<DiskStatus>,
}

/// `/stats/counter` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterStats {
    /// Uploads served.
    pub writes: u64,
    /// Reads served.
    pub reads: u64,
    /// Deletes served.
    pub deletes: u64,
}

/// `/stats/memory` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Resident set size in bytes; 0 where the platform hides it.
    pub resident_bytes: u64,
}

/// `/vol/grow` query.
#[derive(Debug, Clone, Deserialize)]
pub struct GrowQuery {
    /// Volumes to add; defaults to the placement's batch size.
    #[serde(default)]
    pub count: Option<usize>,
    /// Collection name.
    #[serde(default)]
    pub collection: String,
    /// Replica placement, e.g. `"001"`.
    #[serde(default)]
    pub replication: Option<String>,
    /// Volume TTL.
    #[serde(default)]
    pub ttl: Option<String>,
}

/// `/vol/grow` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowResponse {
    /// Volumes created.
    pub grown: usize,
}

/// `/col/list` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionListResponse {
    /// Known collection names.
    pub collections: Vec<String>,
}

/// Master `/status` response.
#[derive(Debug, Clone, Serialize)]
pub struct MasterStatus {
    /// Crate version.
    pub version: String,
    /// Bytes at which volumes stop taking writes.
    #[serde(rename = "volumeSizeLimit")]
    pub volume_size_limit: u64,
}
