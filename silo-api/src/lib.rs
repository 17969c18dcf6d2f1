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

//! Silo's HTTP surface.
//!
//! The volume server router (public needle operations plus the guarded
//! admin surface) and the master router (assignment, lookup, heartbeat,
//! gossip). Outbound concerns live here too: synchronous replica fan-out,
//! CopyFile streaming, and the HTTP client the master uses to drive volume
//! servers.

pub mod errors;
pub mod guard;
pub mod http_client;
pub mod master_server;
pub mod messages;
pub mod replication;
pub mod volume_server;

pub use errors::ApiError;
pub use guard::Guard;
pub use http_client::HttpVolumeServerClient;
pub use master_server::{master_router, MasterState};
pub use replication::PeerLookup;
pub use volume_server::{volume_server_router, VolumeServerState};
