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

//! Online volume compaction.
//!
//! Compaction rewrites a volume without its deleted and overwritten frames
//! into `.cpd`/`.cpx` side files, then atomically swaps them in. The heavy
//! copy runs without the volume lock: `begin_compact` snapshots the current
//! `.idx` length under the lock, [`CompactJob::run`] copies every needle
//! live at that point, and the `.idx` records appended since then are the
//! authoritative diff stream. `run` replays that diff in unlocked rounds
//! until the remainder is below [`COMPACT_TAIL_BOUND_BYTES`] (at most four
//! rounds), and a committer that waited after `run` repeats that with
//! [`CompactJob::catch_up_bounded`] before taking the lock, so the locked
//! `commit_compact` only replays a bounded tail.
//!
//! On any error the side files are deleted and the volume returns to its
//! prior state; readers see either the old files or the new ones, never a
//! mix.

use crate::error::StorageError;
use crate::needle::{MemoryNeedleMap, NeedleMap, NeedleValue};
use crate::types::VolumeId;
use crate::volume::index_file::{self, IdxRecord, IDX_RECORD_SIZE};
use crate::volume::super_block::{SuperBlock, SUPER_BLOCK_SIZE};
use crate::volume::volume::read_needle_at;
use crate::volume::Volume;
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{info, warn};

/// Once the un-replayed `.idx` diff is smaller than this, the job stops
/// catching up without the lock and leaves the rest to the locked commit.
pub const COMPACT_TAIL_BOUND_BYTES: u64 = 4096;

const MAX_CATCH_UP_ROUNDS: usize = 4;

/// An in-flight compaction of one volume.
///
/// Created by [`Volume::begin_compact`]; consumed by
/// [`Volume::commit_compact`] or [`Volume::abort_compact`].
#[derive(Debug)]
pub struct CompactJob {
    volume_id: VolumeId,
    dat_path: PathBuf,
    idx_path: PathBuf,
    cpd_path: PathBuf,
    cpx_path: PathBuf,
    new_super_block: SuperBlock,
    /// `.idx` bytes already reflected in the side files.
    idx_replayed: u64,
    cpd: Option<File>,
    cpx: Option<File>,
    cpd_size: u64,
}

impl Volume {
    /// Starts a compaction and returns the job to drive it.
    ///
    /// Call under the volume's write lock; the returned job then runs
    /// without it. For the offline method, mark the volume read-only first.
    pub fn begin_compact(&mut self) -> Result<CompactJob, StorageError> {
        if self.is_compacting() {
            return Err(StorageError::CompactionInProgress {
                volume_id: self.id(),
            });
        }
        self.set_compacting(true);
        let stem = self.file_stem();
        let mut new_super_block = self.super_block();
        new_super_block.compaction_revision = new_super_block.compaction_revision.wrapping_add(1);
        Ok(CompactJob {
            volume_id: self.id(),
            dat_path: self.dat_path().to_path_buf(),
            idx_path: self.idx_path().to_path_buf(),
            cpd_path: stem.with_extension("cpd"),
            cpx_path: stem.with_extension("cpx"),
            new_super_block,
            idx_replayed: self.idx_size(),
            cpd: None,
            cpx: None,
            cpd_size: 0,
        })
    }

    /// Commits a finished job: replays the last diff, swaps the files in,
    /// bumps the compaction revision, and rebuilds the map.
    ///
    /// Must run under the volume's write lock, so the diff replayed here is
    /// the writer stall. Callers that let time pass between the job's
    /// [`run`](CompactJob::run) and this commit must call
    /// [`CompactJob::catch_up_bounded`] without the lock first, or the
    /// stall grows with whatever was appended in between. On error the
    /// side files are removed and the volume keeps serving its old files.
    pub async fn commit_compact(&mut self, mut job: CompactJob) -> Result<(), StorageError> {
        if !self.is_compacting() {
            return Err(StorageError::NoPendingCompaction {
                volume_id: self.id(),
            });
        }
        let old_size = self.dat_size();
        let result = async {
            job.catch_up().await?;
            job.finish().await?;
            // Swap. The index goes first: if the data rename is then lost to
            // a crash, recovery sees an index ahead of the data file and
            // rebuilds from the old log instead of mixing generations.
            tokio::fs::rename(&job.cpx_path, &job.idx_path).await?;
            tokio::fs::rename(&job.cpd_path, &job.dat_path).await?;
            self.reload(job.new_super_block).await
        }
        .await;
        self.set_compacting(false);
        match result {
            Ok(()) => {
                info!(
                    volume_id = self.id(),
                    old_size,
                    new_size = self.dat_size(),
                    revision = self.compaction_revision(),
                    "compaction committed"
                );
                Ok(())
            }
            Err(e) => {
                warn!(volume_id = self.id(), error = %e, "compaction commit failed");
                job.remove_side_files().await;
                Err(e)
            }
        }
    }

    /// Abandons a compaction, deleting its side files.
    pub async fn abort_compact(&mut self, job: CompactJob) {
        job.remove_side_files().await;
        self.set_compacting(false);
    }
}

impl CompactJob {
    /// The volume being compacted.
    pub fn volume_id(&self) -> VolumeId {
        self.volume_id
    }

    /// Copies every live needle into the side files and catches up with
    /// concurrent appends until the remaining diff is small.
    ///
    /// Runs without the volume lock. On error the caller must abort the job.
    pub async fn run(&mut self) -> Result<(), StorageError> {
        let mut cpd = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.cpd_path)
            .await?;
        cpd.write_all(&self.new_super_block.to_bytes()).await?;
        let cpx = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.cpx_path)
            .await?;
        self.cpd = Some(cpd);
        self.cpx = Some(cpx);
        self.cpd_size = SUPER_BLOCK_SIZE as u64;

        // Snapshot of the map as of `begin_compact`, rebuilt from the index
        // prefix recorded then.
        let mut snapshot = MemoryNeedleMap::new();
        let prefix = self.read_idx_range(0, self.idx_replayed).await?;
        index_file::replay(&prefix, &mut snapshot)?;

        let mut live = Vec::with_capacity(snapshot.live_count() as usize);
        snapshot.visit(&mut |id, value| {
            live.push((id, value));
            Ok(())
        })?;
        for (id, value) in live {
            self.copy_frame(id, value).await?;
        }

        // Catch up with appends that landed during the copy, still without
        // the lock, until the tail is bounded.
        self.catch_up_bounded().await
    }

    /// Replays the `.idx` diff in unlocked rounds until the remainder is
    /// below [`COMPACT_TAIL_BOUND_BYTES`].
    ///
    /// [`run`](Self::run) ends with this, but the job may then sit waiting
    /// for its commit turn — the vacuum coordinator compacts every replica
    /// before committing any — with appends continuing the whole time. The
    /// committer must therefore call this again, without the volume lock,
    /// immediately before taking it; `Store::vacuum_commit` does.
    pub async fn catch_up_bounded(&mut self) -> Result<(), StorageError> {
        for _ in 0..MAX_CATCH_UP_ROUNDS {
            if self.pending_diff_bytes().await? <= COMPACT_TAIL_BOUND_BYTES {
                break;
            }
            self.catch_up().await?;
        }
        Ok(())
    }

    /// Bytes of `.idx` diff not yet reflected in the side files.
    pub async fn pending_diff_bytes(&self) -> Result<u64, StorageError> {
        let len = tokio::fs::metadata(&self.idx_path).await?.len();
        let whole = len - len % IDX_RECORD_SIZE as u64;
        Ok(whole.saturating_sub(self.idx_replayed))
    }

    /// Replays `.idx` records appended since the last replay onto the side
    /// files: puts copy their frame, deletions append a deletion record.
    async fn catch_up(&mut self) -> Result<(), StorageError> {
        let len = tokio::fs::metadata(&self.idx_path).await?.len();
        let whole = len - len % IDX_RECORD_SIZE as u64;
        if whole <= self.idx_replayed {
            return Ok(());
        }
        let diff = self.read_idx_range(self.idx_replayed, whole).await?;
        for chunk in diff.chunks_exact(IDX_RECORD_SIZE) {
            let record = IdxRecord::from_bytes(chunk);
            if record.is_deletion() {
                self.write_cpx(IdxRecord::deletion(record.id)).await?;
            } else {
                self.copy_frame(
                    record.id,
                    NeedleValue {
                        offset: record.offset,
                        size: record.size,
                    },
                )
                .await?;
            }
        }
        self.idx_replayed = whole;
        Ok(())
    }

    /// Validates one frame from the old log and appends it to the new one.
    async fn copy_frame(&mut self, id: u64, value: NeedleValue) -> Result<(), StorageError> {
        // Decode to validate the CRC; corruption aborts the compaction and
        // leaves the source volume intact.
        let needle = read_needle_at(&self.dat_path, value).await?;
        if needle.id != id {
            return Err(StorageError::CorruptNeedle {
                offset: value.byte_offset(),
            });
        }
        let frame = needle.encode();
        let new_value = NeedleValue {
            offset: (self.cpd_size / 8) as u32,
            size: value.size,
        };
        let cpd = self.cpd.as_mut().ok_or(StorageError::NoPendingCompaction {
            volume_id: self.volume_id,
        })?;
        cpd.write_all(&frame).await?;
        self.cpd_size += frame.len() as u64;
        self.write_cpx(IdxRecord::put(id, new_value)).await
    }

    async fn write_cpx(&mut self, record: IdxRecord) -> Result<(), StorageError> {
        let cpx = self.cpx.as_mut().ok_or(StorageError::NoPendingCompaction {
            volume_id: self.volume_id,
        })?;
        cpx.write_all(&record.to_bytes()).await?;
        Ok(())
    }

    async fn read_idx_range(&self, from: u64, to: u64) -> Result<Vec<u8>, StorageError> {
        let mut file = File::open(&self.idx_path).await?;
        file.seek(SeekFrom::Start(from)).await?;
        let mut buf = vec![0u8; (to - from) as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn finish(&mut self) -> Result<(), StorageError> {
        if let Some(cpd) = self.cpd.as_mut() {
            cpd.sync_all().await?;
        }
        if let Some(cpx) = self.cpx.as_mut() {
            cpx.sync_all().await?;
        }
        self.cpd = None;
        self.cpx = None;
        Ok(())
    }

    async fn remove_side_files(&self) {
        let _ = tokio::fs::remove_file(&self.cpd_path).await;
        let _ = tokio::fs::remove_file(&self.cpx_path).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::needle::Needle;
    use crate::types::{ReplicaPlacement, Ttl};
    use crate::volume::{FsyncPolicy, MapKind};
    use bytes::Bytes;
    use tempfile::TempDir;

    async fn new_volume(dir: &std::path::Path) -> Volume {
        Volume::create(
            dir,
            11,
            "",
            ReplicaPlacement::default(),
            Ttl::NONE,
            MapKind::Memory,
            FsyncPolicy::Never,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_compaction_reclaims_overwritten_space() {
        let dir = TempDir::new().unwrap();
        let mut v = new_volume(dir.path()).await;

        let mut big = Needle::new(42, 1, Bytes::from(vec![b'a'; 1000]));
        v.append(&mut big).await.unwrap();
        let mut small = Needle::new(42, 1, Bytes::from(vec![b'b'; 500]));
        v.append(&mut small).await.unwrap();

        let before = v.dat_size();
        let mut job = v.begin_compact().unwrap();
        job.run().await.unwrap();
        v.commit_compact(job).await.unwrap();

        assert!(before - v.dat_size() >= 1000);
        assert_eq!(v.info().deleted_bytes, 0);
        assert_eq!(v.compaction_revision(), 1);
        let got = v.read(42, 1).await.unwrap();
        assert_eq!(got.data.len(), 500);
        assert!(got.data.iter().all(|b| *b == b'b'));
    }

    #[tokio::test]
    async fn test_compaction_drops_tombstones() {
        let dir = TempDir::new().unwrap();
        let mut v = new_volume(dir.path()).await;

        for i in 0..20u64 {
            let mut n = Needle::new(i, 3, Bytes::from(format!("needle-{}", i)));
            v.append(&mut n).await.unwrap();
        }
        for i in 0..10u64 {
            v.delete(i, 3).await.unwrap();
        }

        let mut job = v.begin_compact().unwrap();
        job.run().await.unwrap();
        v.commit_compact(job).await.unwrap();

        assert_eq!(v.info().file_count, 10);
        assert_eq!(v.info().deleted_bytes, 0);
        for i in 0..10u64 {
            assert!(v.read(i, 3).await.is_err());
        }
        for i in 10..20u64 {
            assert_eq!(
                v.read(i, 3).await.unwrap().data.as_ref(),
                format!("needle-{}", i).as_bytes()
            );
        }
    }

    #[tokio::test]
    async fn test_online_compaction_keeps_concurrent_appends() {
        let dir = TempDir::new().unwrap();
        let mut v = new_volume(dir.path()).await;

        for i in 0..5u64 {
            let mut n = Needle::new(i, 9, Bytes::from(format!("old-{}", i)));
            v.append(&mut n).await.unwrap();
        }
        v.delete(0, 9).await.unwrap();

        let mut job = v.begin_compact().unwrap();
        job.run().await.unwrap();

        // Writes that land between run() and commit() — the post-start tail.
        for i in 100..103u64 {
            let mut n = Needle::new(i, 9, Bytes::from(format!("new-{}", i)));
            v.append(&mut n).await.unwrap();
        }
        v.delete(1, 9).await.unwrap();

        v.commit_compact(job).await.unwrap();

        assert!(v.read(0, 9).await.is_err());
        assert!(v.read(1, 9).await.is_err());
        for i in 2..5u64 {
            assert_eq!(
                v.read(i, 9).await.unwrap().data.as_ref(),
                format!("old-{}", i).as_bytes()
            );
        }
        for i in 100..103u64 {
            assert_eq!(
                v.read(i, 9).await.unwrap().data.as_ref(),
                format!("new-{}", i).as_bytes()
            );
        }
    }

    #[tokio::test]
    async fn test_large_tail_is_rebounded_before_commit() {
        let dir = TempDir::new().unwrap();
        let mut v = new_volume(dir.path()).await;

        for i in 0..5u64 {
            let mut n = Needle::new(i, 9, Bytes::from(format!("old-{}", i)));
            v.append(&mut n).await.unwrap();
        }

        let mut job = v.begin_compact().unwrap();
        job.run().await.unwrap();

        // The job now waits for its commit turn while appends keep landing
        // — far more than one bounded tail's worth of index records.
        let burst = 4 * (COMPACT_TAIL_BOUND_BYTES / IDX_RECORD_SIZE as u64) + 50;
        for i in 0..burst {
            let mut n = Needle::new(1000 + i, 9, Bytes::from(format!("late-{}", i)));
            v.append(&mut n).await.unwrap();
        }
        assert!(job.pending_diff_bytes().await.unwrap() > COMPACT_TAIL_BOUND_BYTES);

        // The unlocked re-bound leaves only a bounded remainder for the
        // locked commit to replay.
        job.catch_up_bounded().await.unwrap();
        assert!(job.pending_diff_bytes().await.unwrap() <= COMPACT_TAIL_BOUND_BYTES);

        v.commit_compact(job).await.unwrap();
        for i in 0..5u64 {
            assert_eq!(
                v.read(i, 9).await.unwrap().data.as_ref(),
                format!("old-{}", i).as_bytes()
            );
        }
        for i in 0..burst {
            assert_eq!(
                v.read(1000 + i, 9).await.unwrap().data.as_ref(),
                format!("late-{}", i).as_bytes()
            );
        }
    }

    #[tokio::test]
    async fn test_double_begin_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut v = new_volume(dir.path()).await;
        let job = v.begin_compact().unwrap();
        match v.begin_compact() {
            Err(StorageError::CompactionInProgress { volume_id: 11 }) => {}
            other => panic!("expected CompactionInProgress, got {:?}", other),
        }
        v.abort_compact(job).await;
        assert!(!v.is_compacting());
        // After an abort a new compaction may start.
        let job = v.begin_compact().unwrap();
        v.abort_compact(job).await;
    }

    #[tokio::test]
    async fn test_abort_removes_side_files() {
        let dir = TempDir::new().unwrap();
        let mut v = new_volume(dir.path()).await;
        let mut n = Needle::new(1, 1, Bytes::from_static(b"data"));
        v.append(&mut n).await.unwrap();

        let mut job = v.begin_compact().unwrap();
        job.run().await.unwrap();
        v.abort_compact(job).await;

        assert!(!dir.path().join("11.cpd").exists());
        assert!(!dir.path().join("11.cpx").exists());
        // Volume still serves.
        assert_eq!(v.read(1, 1).await.unwrap().data.as_ref(), b"data");
        assert_eq!(v.compaction_revision(), 0);
    }

    #[tokio::test]
    async fn test_commit_without_run_fails_and_volume_survives() {
        let dir = TempDir::new().unwrap();
        let mut v = new_volume(dir.path()).await;
        let mut n = Needle::new(1, 1, Bytes::from_static(b"data"));
        v.append(&mut n).await.unwrap();

        // Committing a job whose side files were never built must fail and
        // leave the volume on its old files.
        let job = v.begin_compact().unwrap();
        assert!(v.commit_compact(job).await.is_err());
        assert!(!v.is_compacting());
        assert_eq!(v.read(1, 1).await.unwrap().data.as_ref(), b"data");
        assert_eq!(v.compaction_revision(), 0);
    }
}
