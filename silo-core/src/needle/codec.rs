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

//! Needle frame encoding and decoding.
//!
//! On-disk layout, all integers big-endian:
//!
//! ```text
//! header (16 B):  cookie u32 | needle_id u64 | size u32
//! body (size B):  flags u8
//!                 data_size u32 | data[data_size]
//!                 [HAS_NAME]          name_len u8  | name
//!                 [HAS_MIME]          mime_len u8  | mime
//!                 [HAS_LAST_MODIFIED] last_modified u64
//!                 [HAS_TTL]           ttl count u8 | ttl unit u8
//! trailer (12 B): checksum u32 | append_at u64
//! padding:        zero bytes to an 8-byte frame boundary
//! ```
//!
//! `size == 0` is a tombstone. The 8-byte alignment lets `.idx` files store
//! offsets in units of 8 bytes in a u32, addressing 32 GiB per volume.

use crate::error::StorageError;
use crate::needle::{
    Needle, FLAG_GZIPPED, FLAG_HAS_LAST_MODIFIED, FLAG_HAS_MIME, FLAG_HAS_NAME, FLAG_HAS_TTL,
    FLAG_IS_CHUNK_MANIFEST,
};
use crate::types::Ttl;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Fixed bytes before the body: cookie + id + size.
pub const NEEDLE_HEADER_SIZE: usize = 16;
/// Fixed bytes after the body: checksum + append timestamp.
pub const NEEDLE_TRAILER_SIZE: usize = 12;
/// Every frame is padded to this boundary.
pub const NEEDLE_ALIGNMENT: u64 = 8;

/// Rounds `n` up to the frame alignment.
pub fn padded(n: u64) -> u64 {
    (n + NEEDLE_ALIGNMENT - 1) & !(NEEDLE_ALIGNMENT - 1)
}

/// Total padded frame size for a body of `body_size` bytes.
pub fn frame_size(body_size: u32) -> u64 {
    padded(NEEDLE_HEADER_SIZE as u64 + body_size as u64 + NEEDLE_TRAILER_SIZE as u64)
}

impl Needle {
    fn encode_body(&self) -> BytesMut {
        let mut body = BytesMut::with_capacity(5 + self.data.len() + 32);
        if self.tombstone {
            return body;
        }
        let mut flags = self.flags & (FLAG_GZIPPED | FLAG_IS_CHUNK_MANIFEST);
        if self.name.is_some() {
            flags |= FLAG_HAS_NAME;
        }
        if self.mime.is_some() {
            flags |= FLAG_HAS_MIME;
        }
        if self.last_modified.is_some() {
            flags |= FLAG_HAS_LAST_MODIFIED;
        }
        if self.ttl.is_some() {
            flags |= FLAG_HAS_TTL;
        }
        body.put_u8(flags);
        body.put_u32(self.data.len() as u32);
        body.put_slice(&self.data);
        if let Some(name) = &self.name {
            let bytes = name.as_bytes();
            body.put_u8(bytes.len().min(255) as u8);
            body.put_slice(&bytes[..bytes.len().min(255)]);
        }
        if let Some(mime) = &self.mime {
            let bytes = mime.as_bytes();
            body.put_u8(bytes.len().min(255) as u8);
            body.put_slice(&bytes[..bytes.len().min(255)]);
        }
        if let Some(ts) = self.last_modified {
            body.put_u64(ts);
        }
        if let Some(ttl) = self.ttl {
            body.put_slice(&ttl.to_bytes());
        }
        body
    }

    /// Encodes the needle into a complete, padded frame.
    pub fn encode(&self) -> Bytes {
        let body = self.encode_body();
        let size = body.len() as u32;
        let total = frame_size(size) as usize;
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32(self.cookie);
        buf.put_u64(self.id);
        buf.put_u32(size);
        buf.put(body);
        buf.put_u32(self.checksum);
        buf.put_u64(self.append_at);
        buf.resize(total, 0);
        buf.freeze()
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns the needle and the number of bytes consumed (the padded frame
    /// size). Fails with `ShortRead` when `buf` ends mid-frame — the caller
    /// knows the frame's base offset and can truncate the file there — and
    /// with `CorruptNeedle` on CRC mismatch or inconsistent lengths.
    pub fn decode(buf: &[u8]) -> Result<(Needle, usize), StorageError> {
        if buf.len() < NEEDLE_HEADER_SIZE {
            return Err(StorageError::ShortRead { offset: 0 });
        }
        let mut header = &buf[..NEEDLE_HEADER_SIZE];
        let cookie = header.get_u32();
        let id = header.get_u64();
        let size = header.get_u32();

        let total = frame_size(size) as usize;
        if buf.len() < total {
            return Err(StorageError::ShortRead { offset: 0 });
        }

        let trailer_at = NEEDLE_HEADER_SIZE + size as usize;
        let mut trailer = &buf[trailer_at..trailer_at + NEEDLE_TRAILER_SIZE];
        let checksum = trailer.get_u32();
        let append_at = trailer.get_u64();

        if size == 0 {
            let mut needle = Needle::tombstone(id, cookie);
            needle.append_at = append_at;
            return Ok((needle, total));
        }

        let mut body = &buf[NEEDLE_HEADER_SIZE..trailer_at];
        let corrupt = || StorageError::CorruptNeedle { offset: 0 };
        if body.remaining() < 5 {
            return Err(corrupt());
        }
        let flags = body.get_u8();
        let data_size = body.get_u32() as usize;
        if body.remaining() < data_size {
            return Err(corrupt());
        }
        let data = Bytes::copy_from_slice(&body[..data_size]);
        body.advance(data_size);

        let mut needle = Needle {
            id,
            cookie,
            data,
            flags: flags & (FLAG_GZIPPED | FLAG_IS_CHUNK_MANIFEST),
            name: None,
            mime: None,
            last_modified: None,
            ttl: None,
            checksum,
            append_at,
            tombstone: false,
        };

        if flags & FLAG_HAS_NAME != 0 {
            needle.name = Some(read_short_string(&mut body).ok_or_else(corrupt)?);
        }
        if flags & FLAG_HAS_MIME != 0 {
            needle.mime = Some(read_short_string(&mut body).ok_or_else(corrupt)?);
        }
        if flags & FLAG_HAS_LAST_MODIFIED != 0 {
            if body.remaining() < 8 {
                return Err(corrupt());
            }
            needle.last_modified = Some(body.get_u64());
        }
        if flags & FLAG_HAS_TTL != 0 {
            if body.remaining() < 2 {
                return Err(corrupt());
            }
            needle.ttl = Some(Ttl::from_bytes([body.get_u8(), body.get_u8()]));
        }

        if crc32fast::hash(&needle.data) != checksum {
            return Err(corrupt());
        }

        Ok((needle, total))
    }
}

fn read_short_string(body: &mut &[u8]) -> Option<String> {
    if body.remaining() < 1 {
        return None;
    }
    let len = body.get_u8() as usize;
    if body.remaining() < len {
        return None;
    }
    let s = String::from_utf8_lossy(&body[..len]).into_owned();
    body.advance(len);
    Some(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Needle {
        let mut n = Needle::new(0x1234, 0xcafebabe, Bytes::from_static(b"hello world"))
            .with_name("greet.txt")
            .with_mime("text/plain")
            .with_last_modified(1_700_000_000)
            .with_ttl("3m".parse().unwrap());
        n.append_at = 1_700_000_001;
        n
    }

    #[test]
    fn test_round_trip() {
        let n = sample();
        let frame = n.encode();
        assert_eq!(frame.len() % 8, 0);
        let (decoded, consumed) = Needle::decode(&frame).unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(decoded, n);
    }

    #[test]
    fn test_round_trip_minimal() {
        let mut n = Needle::new(1, 2, Bytes::from_static(b"x"));
        n.append_at = 42;
        let frame = n.encode();
        let (decoded, _) = Needle::decode(&frame).unwrap();
        assert_eq!(decoded, n);
    }

    #[test]
    fn test_tombstone_round_trip() {
        let mut n = Needle::tombstone(77, 88);
        n.append_at = 9;
        let frame = n.encode();
        // header + trailer, padded: 28 -> 32.
        assert_eq!(frame.len(), 32);
        let (decoded, consumed) = Needle::decode(&frame).unwrap();
        assert_eq!(consumed, 32);
        assert!(decoded.tombstone);
        assert_eq!(decoded.id, 77);
        assert_eq!(decoded.cookie, 88);
    }

    #[test]
    fn test_truncated_frame_is_short_read() {
        let frame = sample().encode();
        for cut in [0, 5, NEEDLE_HEADER_SIZE, frame.len() - 1] {
            match Needle::decode(&frame[..cut]) {
                Err(StorageError::ShortRead { .. }) => {}
                other => panic!("expected ShortRead at cut {}, got {:?}", cut, other),
            }
        }
    }

    #[test]
    fn test_corrupt_data_fails_crc() {
        let frame = sample().encode();
        let mut bad = frame.to_vec();
        // Flip a bit inside the data region.
        bad[NEEDLE_HEADER_SIZE + 6] ^= 0x01;
        match Needle::decode(&bad) {
            Err(StorageError::CorruptNeedle { .. }) => {}
            other => panic!("expected CorruptNeedle, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_size_alignment() {
        assert_eq!(frame_size(0), 32);
        assert_eq!(frame_size(1), 32);
        assert_eq!(frame_size(4), 32);
        assert_eq!(frame_size(5), 40);
        assert_eq!(padded(8), 8);
        assert_eq!(padded(9), 16);
    }
}
