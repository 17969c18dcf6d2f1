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

//! Master-side cluster state for Silo.
//!
//! The topology tree (data centers, racks, nodes, volumes), the per-layout
//! writable sets, the assignment and growth algorithms, and the vacuum
//! coordinator. The master and the volume servers share no state handle;
//! everything here is driven by heartbeats in and admin calls out.

pub mod assignment;
pub mod client;
pub mod error;
pub mod growth;
pub mod node;
pub mod topology;
pub mod vacuum;
pub mod volume_layout;

pub use assignment::{AssignRequest, Assigner, Assignment};
pub use client::{VacuumCheckReport, VolumeServerClient};
pub use error::TopologyError;
pub use growth::VolumeGrowth;
pub use node::{DataNode, NodeView};
pub use topology::{
    Heartbeat, HeartbeatOutcome, Topology, TopologyStatus, VacuumCandidate, VolumeLocation,
};
pub use vacuum::{CommitFailurePolicy, VacuumCoordinator, VacuumStats};
pub use volume_layout::{LayoutKey, VolumeLayout};
