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

//! The needle: a single stored object plus its on-disk framing.

mod codec;
mod map;

pub use codec::{frame_size, padded, NEEDLE_ALIGNMENT, NEEDLE_HEADER_SIZE, NEEDLE_TRAILER_SIZE};
pub use map::{MemoryNeedleMap, NeedleMap, NeedleValue, RedbNeedleMap};

use crate::types::{Cookie, NeedleId, Ttl};
use bytes::Bytes;

/// Needle data is gzip-compressed.
pub const FLAG_GZIPPED: u8 = 0x01;
/// The frame carries a file name extension.
pub const FLAG_HAS_NAME: u8 = 0x02;
/// The frame carries a MIME type extension.
pub const FLAG_HAS_MIME: u8 = 0x04;
/// The frame carries a last-modified timestamp extension.
pub const FLAG_HAS_LAST_MODIFIED: u8 = 0x08;
/// The frame carries a TTL extension.
pub const FLAG_HAS_TTL: u8 = 0x10;
/// The data is a chunk manifest, not user bytes.
pub const FLAG_IS_CHUNK_MANIFEST: u8 = 0x20;

/// The atomic stored unit: opaque bytes plus framing metadata.
///
/// A needle with `tombstone == true` encodes as a size-0 frame and marks
/// the id as deleted; the most recent frame for an id wins.
#[derive(Debug, Clone, PartialEq)]
pub struct Needle {
    /// Needle id, unique within its volume.
    pub id: NeedleId,
    /// Anti-enumeration cookie.
    pub cookie: Cookie,
    /// The stored bytes.
    pub data: Bytes,
    /// Gzip / chunk-manifest bits; the extension bits are derived from the
    /// optional fields at encode time.
    pub flags: u8,
    /// Optional file name.
    pub name: Option<String>,
    /// Optional MIME type.
    pub mime: Option<String>,
    /// Optional client-supplied last-modified (unix seconds).
    pub last_modified: Option<u64>,
    /// Optional per-needle TTL override.
    pub ttl: Option<Ttl>,
    /// CRC32 of `data`.
    pub checksum: u32,
    /// Unix seconds when the needle was appended.
    pub append_at: u64,
    /// True for a deletion marker.
    pub tombstone: bool,
}

impl Needle {
    /// Creates a live needle; computes the data checksum.
    pub fn new(id: NeedleId, cookie: Cookie, data: Bytes) -> Self {
        let checksum = crc32fast::hash(&data);
        Self {
            id,
            cookie,
            data,
            flags: 0,
            name: None,
            mime: None,
            last_modified: None,
            ttl: None,
            checksum,
            append_at: 0,
            tombstone: false,
        }
    }

    /// Creates a deletion marker for `id`.
    pub fn tombstone(id: NeedleId, cookie: Cookie) -> Self {
        Self {
            id,
            cookie,
            data: Bytes::new(),
            flags: 0,
            name: None,
            mime: None,
            last_modified: None,
            ttl: None,
            checksum: 0,
            append_at: 0,
            tombstone: true,
        }
    }

    /// Attaches a file name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attaches a MIME type.
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Attaches a last-modified timestamp (unix seconds).
    pub fn with_last_modified(mut self, ts: u64) -> Self {
        self.last_modified = Some(ts);
        self
    }

    /// Attaches a TTL override.
    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        if !ttl.is_none() {
            self.ttl = Some(ttl);
        }
        self
    }

    /// The ETag clients see: the data checksum in hex.
    pub fn etag(&self) -> String {
        format!("{:08x}", self.checksum)
    }

    /// Whether this needle, appended at `append_at`, has expired by `now`
    /// under its own TTL or the volume default.
    pub fn is_expired(&self, volume_ttl: Ttl, now: u64) -> bool {
        let ttl = self.ttl.unwrap_or(volume_ttl);
        ttl.is_expired(self.append_at, now)
    }
}
