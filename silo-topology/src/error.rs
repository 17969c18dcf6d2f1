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

//! Error types for the master-side topology.

use silo_core::VolumeId;
use thiserror::Error;

/// Errors from assignment, growth, and vacuum coordination.
#[derive(Error, Debug)]
pub enum TopologyError {
    /// No writable volume matches the request; growth is usually in flight.
    #[error("No writable volume for collection '{collection}'")]
    NoWritableVolume {
        /// Collection that had no writable volume.
        collection: String,
    },

    /// No placement satisfying the replica policy could be found.
    #[error("No free space: {0}")]
    NoFreeSpace(String),

    /// The volume id is not known to the topology.
    #[error("Unknown volume: {0}")]
    UnknownVolume(VolumeId),

    /// The node id is not known to the topology.
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// A volume server RPC failed.
    #[error("Volume server call failed: {0}")]
    Client(String),

    /// The request itself was malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
