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

//! The volume: an append-only `.dat` log plus its `.idx` index.

mod compact;
mod index_file;
mod super_block;
#[allow(clippy::module_inception)]
mod volume;

pub use compact::{CompactJob, COMPACT_TAIL_BOUND_BYTES};
pub use index_file::{replay, IdxRecord, IDX_RECORD_SIZE};
pub use super_block::{SuperBlock, SUPER_BLOCK_SIZE};
pub use volume::{
    parse_volume_file_stem, read_needle_at, volume_file_stem, Volume, MAX_VOLUME_SIZE,
};

pub(crate) use volume::now_unix;

/// When appends are flushed to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsyncPolicy {
    /// fsync after every append.
    #[default]
    Always,
    /// Leave flushing to the OS.
    Never,
}

/// Which needle map implementation a volume uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapKind {
    /// In-memory map, rebuilt from `.idx` at open.
    #[default]
    Memory,
    /// redb-backed map for indexes larger than RAM.
    Redb,
}
