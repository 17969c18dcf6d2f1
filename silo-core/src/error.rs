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

//! Error types for the volume storage engine.

use thiserror::Error;

/// Errors that can occur in the volume storage engine.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Volume is not present on this store.
    #[error("Volume not found: {volume_id}")]
    VolumeNotFound {
        /// Volume ID that was not found.
        volume_id: u32,
    },

    /// Needle is not present in the volume's index.
    #[error("Needle not found: {needle_id:016x}")]
    NeedleNotFound {
        /// Needle ID that was not found.
        needle_id: u64,
    },

    /// The cookie in the request does not match the stored needle.
    ///
    /// Reported to HTTP clients as 404 so that existence is never revealed.
    #[error("Needle cookie mismatch")]
    CookieMismatch,

    /// A needle frame failed its CRC check or is internally inconsistent.
    #[error("Corrupt needle at offset {offset}")]
    CorruptNeedle {
        /// Byte offset in the `.dat` file where the frame begins.
        offset: u64,
    },

    /// The file ended in the middle of a needle frame.
    ///
    /// `offset` is the byte at which the truncated frame begins, so callers
    /// can truncate the file there and resume.
    #[error("Short read at offset {offset}: file ends mid-needle")]
    ShortRead {
        /// Byte offset in the `.dat` file where the truncated frame begins.
        offset: u64,
    },

    /// The needle's TTL has elapsed.
    #[error("Needle expired")]
    Expired,

    /// The append would grow the volume past its size limit.
    #[error("Volume is full: {volume_id}")]
    VolumeFull {
        /// Volume ID that is full.
        volume_id: u32,
    },

    /// The volume is marked read-only; the client should re-assign.
    #[error("Volume is read-only: {volume_id}")]
    ReadOnlyVolume {
        /// Volume ID that rejected the write.
        volume_id: u32,
    },

    /// A compaction is already running on this volume.
    #[error("Volume {volume_id} is already compacting")]
    CompactionInProgress {
        /// Volume ID being compacted.
        volume_id: u32,
    },

    /// No compaction has been prepared, so there is nothing to commit.
    #[error("Volume {volume_id} has no pending compaction")]
    NoPendingCompaction {
        /// Volume ID with no pending compaction.
        volume_id: u32,
    },

    /// The peer's compaction revision does not match ours.
    ///
    /// Surfaces during `CopyFile`; the caller restarts the transfer.
    #[error("Compaction revision mismatch: expected {expected}, found {actual}")]
    CompactionRevisionMismatch {
        /// Revision the caller asked for.
        expected: u16,
        /// Revision the volume currently has.
        actual: u16,
    },

    /// No disk location has a free volume slot.
    #[error("No free space for a new volume")]
    NoFreeSpace,

    /// A file-id string could not be parsed.
    #[error("Invalid file id: {0}")]
    InvalidFileId(String),

    /// A replica placement string could not be parsed.
    #[error("Invalid replica placement: {0}")]
    InvalidReplicaPlacement(String),

    /// A TTL string could not be parsed.
    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    /// IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Needle map database error.
    #[error("Needle map error: {0}")]
    NeedleMap(String),
}

impl StorageError {
    /// True when a client retry with a fresh assignment could succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            StorageError::VolumeFull { .. }
                | StorageError::ReadOnlyVolume { .. }
                | StorageError::NoFreeSpace
        )
    }
}
