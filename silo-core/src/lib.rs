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

//! Silo volume storage engine.
//!
//! Many small immutable objects ("needles") live inside a bounded number of
//! large append-only container files ("volumes"). This crate implements the
//! needle codec, the needle maps, the volume itself with crash recovery and
//! online compaction, and the store that owns every volume on one server.

pub mod error;
pub mod needle;
pub mod store;
pub mod types;
pub mod volume;

pub use error::StorageError;
pub use needle::{Needle, NeedleMap, NeedleValue};
pub use store::{DiskStatus, Store, StoreOptions};
pub use types::{Cookie, FileId, NeedleId, ReplicaPlacement, Ttl, VolumeId, VolumeInfo};
pub use volume::{FsyncPolicy, MapKind, Volume};
