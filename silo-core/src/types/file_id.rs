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

//! File-id parsing and formatting.
//!
//! A file id is the globally unique address of a needle, printed as
//! `"<vid>,<needle_id_hex><cookie_hex>"` where `vid` is decimal, the needle
//! id is hex without leading zeros, and the cookie is exactly 8 hex chars.

use crate::error::StorageError;
use crate::types::{Cookie, NeedleId, VolumeId};
use std::fmt;
use std::str::FromStr;

/// The parsed form of a file id such as `3,01637037d6a2b3c4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    /// Volume holding the needle.
    pub volume_id: VolumeId,
    /// Needle id within the volume.
    pub needle_id: NeedleId,
    /// Anti-enumeration cookie; must match the stored needle on read.
    pub cookie: Cookie,
}

impl FileId {
    /// Creates a file id from its parts.
    pub fn new(volume_id: VolumeId, needle_id: NeedleId, cookie: Cookie) -> Self {
        Self {
            volume_id,
            needle_id,
            cookie,
        }
    }

    /// Parses the `<needle_id_hex><cookie_hex>` part after the comma.
    ///
    /// The trailing 8 hex chars are the cookie; everything before them is
    /// the needle id. An optional `.ext` suffix is ignored.
    pub fn parse_key(volume_id: VolumeId, key: &str) -> Result<Self, StorageError> {
        let key = key.split('.').next().unwrap_or(key);
        if key.len() <= 8 {
            return Err(StorageError::InvalidFileId(key.to_string()));
        }
        let (id_part, cookie_part) = key.split_at(key.len() - 8);
        let needle_id = NeedleId::from_str_radix(id_part, 16)
            .map_err(|_| StorageError::InvalidFileId(key.to_string()))?;
        let cookie = Cookie::from_str_radix(cookie_part, 16)
            .map_err(|_| StorageError::InvalidFileId(key.to_string()))?;
        Ok(Self::new(volume_id, needle_id, cookie))
    }
}

impl FromStr for FileId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vid_part, key_part) = s
            .split_once(',')
            .ok_or_else(|| StorageError::InvalidFileId(s.to_string()))?;
        let volume_id: VolumeId = vid_part
            .parse()
            .map_err(|_| StorageError::InvalidFileId(s.to_string()))?;
        Self::parse_key(volume_id, key_part)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{:x}{:08x}",
            self.volume_id, self.needle_id, self.cookie
        )
    }
}
