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

//! Volume open/append/read/delete and crash recovery.
//!
//! A volume is single-writer: the store wraps it in an `RwLock` and all
//! mutating methods take `&mut self`. Reads look up the map under the shared
//! lock and then read the data file through an independent handle, so they
//! never serialize behind each other.

use crate::error::StorageError;
use crate::needle::{
    MemoryNeedleMap, Needle, NeedleMap, NeedleValue, RedbNeedleMap, NEEDLE_HEADER_SIZE,
};
use crate::types::{NeedleId, ReplicaPlacement, Ttl, VolumeId, VolumeInfo};
use crate::volume::index_file::{self, IdxRecord, IDX_RECORD_SIZE};
use crate::volume::super_block::{SuperBlock, SUPER_BLOCK_SIZE};
use crate::volume::{FsyncPolicy, MapKind};
use bytes::Buf;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{info, warn};

/// Hard ceiling on a `.dat` file: 8-byte offset units in a u32.
pub const MAX_VOLUME_SIZE: u64 = 8 * (1u64 << 32);

/// File stem for a volume: `<vid>` or `<vid>_<collection>`.
pub fn volume_file_stem(id: VolumeId, collection: &str) -> String {
    if collection.is_empty() {
        format!("{}", id)
    } else {
        format!("{}_{}", id, collection)
    }
}

/// Inverse of [`volume_file_stem`]; `None` when the stem is not a volume's.
pub fn parse_volume_file_stem(stem: &str) -> Option<(VolumeId, String)> {
    match stem.split_once('_') {
        Some((vid, collection)) => Some((vid.parse().ok()?, collection.to_string())),
        None => Some((stem.parse().ok()?, String::new())),
    }
}

pub(crate) fn now_unix() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Reads and decodes one needle frame from `dat_path`.
///
/// Opens its own file handle so callers do not need the volume's write side;
/// the `.dat` is append-only, which makes such snapshot reads safe.
pub async fn read_needle_at(dat_path: &Path, value: NeedleValue) -> Result<Needle, StorageError> {
    let mut file = File::open(dat_path).await?;
    file.seek(SeekFrom::Start(value.byte_offset())).await?;
    let mut buf = vec![0u8; value.frame_bytes() as usize];
    file.read_exact(&mut buf)
        .await
        .map_err(|_| StorageError::ShortRead {
            offset: value.byte_offset(),
        })?;
    let (needle, _) = Needle::decode(&buf).map_err(|e| e.rebase(value.byte_offset()))?;
    Ok(needle)
}

impl StorageError {
    /// Rebases a codec-relative offset onto a file offset.
    pub(crate) fn rebase(self, base: u64) -> Self {
        match self {
            StorageError::ShortRead { offset } => StorageError::ShortRead {
                offset: base + offset,
            },
            StorageError::CorruptNeedle { offset } => StorageError::CorruptNeedle {
                offset: base + offset,
            },
            other => other,
        }
    }
}

/// An open volume: append log, index file, and needle map.
pub struct Volume {
    id: VolumeId,
    collection: String,
    dat_path: PathBuf,
    idx_path: PathBuf,
    super_block: SuperBlock,
    dat: File,
    dat_size: u64,
    idx: File,
    idx_size: u64,
    map: Box<dyn NeedleMap>,
    map_kind: MapKind,
    fsync: FsyncPolicy,
    read_only: bool,
    compacting: bool,
    last_modified: u64,
}

impl Volume {
    /// Creates a brand-new volume in `dir` and writes its superblock.
    pub async fn create(
        dir: &Path,
        id: VolumeId,
        collection: &str,
        replica_placement: ReplicaPlacement,
        ttl: Ttl,
        map_kind: MapKind,
        fsync: FsyncPolicy,
    ) -> Result<Self, StorageError> {
        let stem = dir.join(volume_file_stem(id, collection));
        let dat_path = stem.with_extension("dat");
        let idx_path = stem.with_extension("idx");
        if tokio::fs::try_exists(&dat_path).await? {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("volume {} already exists", id),
            )));
        }

        let super_block = SuperBlock::new(replica_placement, ttl);
        let mut dat = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&dat_path)
            .await?;
        dat.write_all(&super_block.to_bytes()).await?;
        dat.sync_all().await?;
        let idx = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&idx_path)
            .await?;

        info!(volume_id = id, collection, "created volume");
        Ok(Self {
            id,
            collection: collection.to_string(),
            map: new_map_fresh(map_kind, &stem).await?,
            map_kind,
            dat_path,
            idx_path,
            super_block,
            dat,
            dat_size: SUPER_BLOCK_SIZE as u64,
            idx,
            idx_size: 0,
            fsync,
            read_only: false,
            compacting: false,
            last_modified: now_unix(),
        })
    }

    /// Opens an existing volume, rebuilding the map and repairing any
    /// crash-truncated tail.
    ///
    /// Recovery: replay the `.idx` into the map, then forward-scan the
    /// `.dat` from the last indexed frame onward. Good frames found there
    /// are re-indexed; a partial or corrupt trailing frame truncates the
    /// `.dat` at its start.
    pub async fn open(
        dir: &Path,
        id: VolumeId,
        collection: &str,
        map_kind: MapKind,
        fsync: FsyncPolicy,
    ) -> Result<Self, StorageError> {
        let stem = dir.join(volume_file_stem(id, collection));
        let dat_path = stem.with_extension("dat");
        let idx_path = stem.with_extension("idx");

        let mut dat = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&dat_path)
            .await
            .map_err(|_| StorageError::VolumeNotFound { volume_id: id })?;
        let mut sb_bytes = [0u8; SUPER_BLOCK_SIZE];
        dat.read_exact(&mut sb_bytes).await?;
        let super_block = SuperBlock::from_bytes(sb_bytes)?;
        let dat_len = dat.metadata().await?.len();

        // Replay the index; ignore a torn trailing record.
        let idx_bytes = tokio::fs::read(&idx_path).await.unwrap_or_default();
        let whole = idx_bytes.len() - idx_bytes.len() % IDX_RECORD_SIZE;
        let mut map = new_map_fresh(map_kind, &stem).await?;
        let mut scan_start = index_file::replay(&idx_bytes[..whole], map.as_mut())?
            .max(SUPER_BLOCK_SIZE as u64);

        if scan_start > dat_len {
            // The index claims more than the data file holds. The append
            // path writes `.dat` before `.idx`, so this only happens when
            // the data file itself was damaged; rebuild from scratch.
            warn!(volume_id = id, "index ahead of data file, rescanning volume");
            map = new_map_fresh(map_kind, &stem).await?;
            scan_start = SUPER_BLOCK_SIZE as u64;
        }

        let mut idx = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&idx_path)
            .await?;
        if whole < idx_bytes.len() {
            // Drop the torn record so new records stay aligned.
            idx.set_len(whole as u64).await?;
        }
        let mut idx_size = whole as u64;

        // Forward-scan the unindexed tail of the data file.
        let mut dat_size = dat_len;
        if scan_start < dat_len {
            dat.seek(SeekFrom::Start(scan_start)).await?;
            let mut tail = vec![0u8; (dat_len - scan_start) as usize];
            dat.read_exact(&mut tail).await?;
            let mut pos = 0usize;
            loop {
                if pos == tail.len() {
                    break;
                }
                match Needle::decode(&tail[pos..]) {
                    Ok((needle, consumed)) => {
                        let offset = scan_start + pos as u64;
                        let record = if needle.tombstone {
                            map.delete(needle.id)?;
                            IdxRecord::deletion(needle.id)
                        } else {
                            let value = NeedleValue {
                                offset: (offset / 8) as u32,
                                size: body_size_of(&tail[pos..]),
                            };
                            map.put(needle.id, value)?;
                            IdxRecord::put(needle.id, value)
                        };
                        idx.write_all(&record.to_bytes()).await?;
                        idx_size += IDX_RECORD_SIZE as u64;
                        pos += consumed;
                    }
                    Err(e) => {
                        let cut = scan_start + pos as u64;
                        warn!(
                            volume_id = id,
                            offset = cut,
                            error = %e,
                            "truncating damaged volume tail"
                        );
                        dat.set_len(cut).await?;
                        dat_size = cut;
                        break;
                    }
                }
            }
            idx.sync_all().await?;
        }

        dat.seek(SeekFrom::Start(dat_size)).await?;

        info!(
            volume_id = id,
            collection,
            size = dat_size,
            files = map.live_count(),
            "opened volume"
        );
        Ok(Self {
            id,
            collection: collection.to_string(),
            dat_path,
            idx_path,
            super_block,
            dat,
            dat_size,
            idx,
            idx_size,
            map,
            map_kind,
            fsync,
            read_only: false,
            compacting: false,
            last_modified: now_unix(),
        })
    }

    /// Appends a needle (or tombstone) to the log.
    ///
    /// Stamps `append_at`, writes the frame, updates the map and the `.idx`.
    /// Returns the needle's new location.
    pub async fn append(&mut self, needle: &mut Needle) -> Result<NeedleValue, StorageError> {
        if self.read_only {
            return Err(StorageError::ReadOnlyVolume { volume_id: self.id });
        }
        needle.append_at = now_unix();
        let frame = needle.encode();
        if self.dat_size + frame.len() as u64 > MAX_VOLUME_SIZE {
            return Err(StorageError::VolumeFull { volume_id: self.id });
        }

        let offset = self.dat_size;
        if let Err(e) = self.dat.write_all(&frame).await {
            // Keep the log frame-aligned after a failed write.
            let _ = self.dat.set_len(offset).await;
            let _ = self.dat.seek(SeekFrom::Start(offset)).await;
            return Err(e.into());
        }
        if self.fsync == FsyncPolicy::Always {
            self.dat.sync_data().await?;
        }
        self.dat_size += frame.len() as u64;

        let value = NeedleValue {
            offset: (offset / 8) as u32,
            size: body_size_of(&frame),
        };
        let record = if needle.tombstone {
            self.map.delete(needle.id)?;
            IdxRecord::deletion(needle.id)
        } else {
            self.map.put(needle.id, value)?;
            IdxRecord::put(needle.id, value)
        };
        self.idx.write_all(&record.to_bytes()).await?;
        if self.fsync == FsyncPolicy::Always {
            self.idx.sync_data().await?;
        }
        self.idx_size += IDX_RECORD_SIZE as u64;
        self.last_modified = needle.append_at;
        Ok(value)
    }

    /// Looks up a needle's location without touching the data file.
    pub fn lookup(&self, id: NeedleId) -> Result<NeedleValue, StorageError> {
        self.map
            .get(id)?
            .ok_or(StorageError::NeedleNotFound { needle_id: id })
    }

    /// Reads a needle and verifies cookie, TTL, and checksum.
    pub async fn read(&self, id: NeedleId, cookie: u32) -> Result<Needle, StorageError> {
        let value = self.lookup(id)?;
        let needle = read_needle_at(&self.dat_path, value).await?;
        if needle.id != id {
            return Err(StorageError::CorruptNeedle {
                offset: value.byte_offset(),
            });
        }
        if needle.cookie != cookie {
            return Err(StorageError::CookieMismatch);
        }
        if needle.is_expired(self.super_block.ttl, now_unix()) {
            return Err(StorageError::Expired);
        }
        Ok(needle)
    }

    /// Soft-deletes a needle: appends a tombstone and drops the map entry.
    ///
    /// Returns the freed body size. Deleting an already-deleted or absent
    /// needle fails with `NeedleNotFound`, which keeps the operation
    /// idempotent in its observable effect on the accounting.
    pub async fn delete(&mut self, id: NeedleId, cookie: u32) -> Result<u32, StorageError> {
        if self.read_only {
            return Err(StorageError::ReadOnlyVolume { volume_id: self.id });
        }
        let value = self.lookup(id)?;
        // Verify the cookie against the stored frame header before marking.
        let stored_cookie = self.read_cookie_at(value.byte_offset()).await?;
        if stored_cookie != cookie {
            return Err(StorageError::CookieMismatch);
        }
        let mut tombstone = Needle::tombstone(id, cookie);
        self.append(&mut tombstone).await?;
        Ok(value.size)
    }

    async fn read_cookie_at(&self, offset: u64) -> Result<u32, StorageError> {
        let mut file = File::open(&self.dat_path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = [0u8; 4];
        file.read_exact(&mut buf).await?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Flushes both files to stable storage.
    pub async fn sync(&mut self) -> Result<(), StorageError> {
        self.dat.sync_all().await?;
        self.idx.sync_all().await?;
        Ok(())
    }

    /// Volume statistics for heartbeats and `/status`.
    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            id: self.id,
            collection: self.collection.clone(),
            replica_placement: self.super_block.replica_placement,
            ttl: self.super_block.ttl,
            size: self.dat_size,
            file_count: self.map.live_count(),
            deleted_count: self.map.deleted_count(),
            deleted_bytes: self.map.deleted_bytes(),
            read_only: self.read_only,
            compaction_revision: self.super_block.compaction_revision,
            last_modified: self.last_modified,
        }
    }

    /// Fraction of the data file occupied by deleted or overwritten frames.
    pub fn garbage_ratio(&self) -> f64 {
        if self.dat_size == 0 {
            0.0
        } else {
            self.map.deleted_bytes() as f64 / self.dat_size as f64
        }
    }

    /// Volume id.
    pub fn id(&self) -> VolumeId {
        self.id
    }

    /// Collection name ("" for the default collection).
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Current compaction revision.
    pub fn compaction_revision(&self) -> u16 {
        self.super_block.compaction_revision
    }

    /// Volume-level default TTL.
    pub fn ttl(&self) -> Ttl {
        self.super_block.ttl
    }

    /// Replica placement the volume was created with.
    pub fn replica_placement(&self) -> ReplicaPlacement {
        self.super_block.replica_placement
    }

    /// Size of the `.dat` file in bytes.
    pub fn dat_size(&self) -> u64 {
        self.dat_size
    }

    /// Size of the `.idx` file in bytes.
    pub fn idx_size(&self) -> u64 {
        self.idx_size
    }

    /// Unix seconds of the last append.
    pub fn last_modified(&self) -> u64 {
        self.last_modified
    }

    /// Whether appends are rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Marks the volume read-only (or writable again).
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Whether a compaction is in flight.
    pub fn is_compacting(&self) -> bool {
        self.compacting
    }

    /// Path of the `.dat` file.
    pub fn dat_path(&self) -> &Path {
        &self.dat_path
    }

    /// Path of the `.idx` file.
    pub fn idx_path(&self) -> &Path {
        &self.idx_path
    }

    pub(crate) fn set_compacting(&mut self, on: bool) {
        self.compacting = on;
    }

    pub(crate) fn super_block(&self) -> SuperBlock {
        self.super_block
    }

    pub(crate) fn map_kind(&self) -> MapKind {
        self.map_kind
    }

    pub(crate) fn file_stem(&self) -> PathBuf {
        self.dat_path.with_extension("")
    }

    /// Re-reads files and rebuilds the map after a compaction swap.
    pub(crate) async fn reload(&mut self, super_block: SuperBlock) -> Result<(), StorageError> {
        let stem = self.file_stem();
        self.super_block = super_block;
        self.dat = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.dat_path)
            .await?;
        self.dat_size = self.dat.metadata().await?.len();
        self.dat.seek(SeekFrom::Start(self.dat_size)).await?;
        self.idx = OpenOptions::new().append(true).open(&self.idx_path).await?;
        let idx_bytes = tokio::fs::read(&self.idx_path).await?;
        self.idx_size = idx_bytes.len() as u64;
        let mut map = new_map_fresh(self.map_kind, &stem).await?;
        index_file::replay(&idx_bytes, map.as_mut())?;
        self.map = map;
        Ok(())
    }

    /// Deletes the volume's files. The handle must be dropped afterwards.
    pub async fn destroy_files(&mut self) -> Result<(), StorageError> {
        self.read_only = true;
        tokio::fs::remove_file(&self.dat_path).await?;
        let _ = tokio::fs::remove_file(&self.idx_path).await;
        let _ = tokio::fs::remove_file(self.dat_path.with_extension("map")).await;
        Ok(())
    }
}

/// Extracts the body size from an encoded frame's header.
fn body_size_of(frame: &[u8]) -> u32 {
    debug_assert!(frame.len() >= NEEDLE_HEADER_SIZE);
    (&frame[NEEDLE_HEADER_SIZE - 4..]).get_u32()
}

fn new_map(kind: MapKind, stem: &Path) -> Result<Box<dyn NeedleMap>, StorageError> {
    match kind {
        MapKind::Memory => Ok(Box::new(MemoryNeedleMap::new())),
        MapKind::Redb => Ok(Box::new(RedbNeedleMap::open(&stem.with_extension("map"))?)),
    }
}

async fn new_map_fresh(kind: MapKind, stem: &Path) -> Result<Box<dyn NeedleMap>, StorageError> {
    if kind == MapKind::Redb {
        // Drop the stale database so the rebuild starts clean.
        let _ = tokio::fs::remove_file(stem.with_extension("map")).await;
    }
    new_map(kind, stem)
}
