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

//! Core value types shared across the workspace.

mod file_id;
mod replica_placement;
mod ttl;
mod volume_info;

pub use file_id::FileId;
pub use replica_placement::ReplicaPlacement;
pub use ttl::{Ttl, TtlUnit};
pub use volume_info::VolumeInfo;

/// Volume identifier, unique across the cluster.
pub type VolumeId = u32;

/// Needle identifier, unique within a volume.
pub type NeedleId = u64;

/// Anti-enumeration nonce embedded in every file id.
pub type Cookie = u32;
