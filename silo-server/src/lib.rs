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

//! Silo server binaries: the master and the volume server.

pub mod config;
pub mod heartbeat;
pub mod master_app;
pub mod shutdown;
pub mod volume_app;
pub mod workers;

pub use config::{MasterConfig, VolumeServerConfig};
pub use master_app::MasterApp;
pub use volume_app::VolumeServerApp;
