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

//! `.idx` file records.
//!
//! The index file is a flat sequence of 16-byte big-endian records
//! `needle_id u64 | offset u32 (unit = 8 bytes) | size u32`. An offset of 0
//! marks a deletion (the superblock occupies unit 0, so no needle can live
//! there). Replaying the records in order reproduces the needle map.

use crate::error::StorageError;
use crate::needle::{NeedleMap, NeedleValue};
use crate::types::NeedleId;
use bytes::{Buf, BufMut};

/// Size of one index record.
pub const IDX_RECORD_SIZE: usize = 16;

/// One `.idx` record: a put when `offset > 0`, a deletion when `offset == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdxRecord {
    /// Needle id.
    pub id: NeedleId,
    /// Frame offset in 8-byte units; 0 for a deletion.
    pub offset: u32,
    /// Body size from the frame header.
    pub size: u32,
}

impl IdxRecord {
    /// Record for a live needle.
    pub fn put(id: NeedleId, value: NeedleValue) -> Self {
        Self {
            id,
            offset: value.offset,
            size: value.size,
        }
    }

    /// Deletion record.
    pub fn deletion(id: NeedleId) -> Self {
        Self {
            id,
            offset: 0,
            size: 0,
        }
    }

    /// True when this record marks a deletion.
    pub fn is_deletion(&self) -> bool {
        self.offset == 0
    }

    /// Serializes the record.
    pub fn to_bytes(self) -> [u8; IDX_RECORD_SIZE] {
        let mut buf = [0u8; IDX_RECORD_SIZE];
        {
            let mut w = &mut buf[..];
            w.put_u64(self.id);
            w.put_u32(self.offset);
            w.put_u32(self.size);
        }
        buf
    }

    /// Parses one record from the front of `buf`.
    pub fn from_bytes(mut buf: &[u8]) -> Self {
        let id = buf.get_u64();
        let offset = buf.get_u32();
        let size = buf.get_u32();
        Self { id, offset, size }
    }
}

/// Replays complete records from `buf` into `map`.
///
/// Returns the highest frame end offset (in bytes) seen among live records,
/// which is where a recovery scan of the `.dat` must resume. Trailing bytes
/// short of a full record are ignored.
pub fn replay(buf: &[u8], map: &mut dyn NeedleMap) -> Result<u64, StorageError> {
    let mut scan_end = 0u64;
    for chunk in buf.chunks_exact(IDX_RECORD_SIZE) {
        let record = IdxRecord::from_bytes(chunk);
        if record.is_deletion() {
            map.delete(record.id)?;
        } else {
            let value = NeedleValue {
                offset: record.offset,
                size: record.size,
            };
            map.put(record.id, value)?;
            scan_end = scan_end.max(value.byte_offset() + value.frame_bytes());
        }
    }
    Ok(scan_end)
}
