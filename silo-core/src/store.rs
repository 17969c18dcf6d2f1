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

//! The store: every volume on one server, across one or more disk locations.
//!
//! Each volume sits behind its own `RwLock`, which is what gives the
//! single-writer guarantee. The store also tracks volume additions and
//! removals between heartbeats, and owns in-flight compaction jobs.

use crate::error::StorageError;
use crate::needle::Needle;
use crate::types::{Cookie, NeedleId, ReplicaPlacement, Ttl, VolumeId, VolumeInfo};
use crate::volume::{
    now_unix, parse_volume_file_stem, read_needle_at, CompactJob, FsyncPolicy, MapKind, Volume,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Store-wide volume construction options.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    /// Needle map implementation for every volume.
    pub map_kind: MapKind,
    /// Append durability policy.
    pub fsync: FsyncPolicy,
}

/// Free/used accounting for one disk location, as shown by `/stats/disk`.
#[derive(Debug, Clone, Serialize)]
pub struct DiskStatus {
    /// Directory backing the location.
    pub directory: String,
    /// Volumes currently mounted there.
    pub volume_count: usize,
    /// Maximum volumes the location may hold.
    pub max_volume_count: usize,
}

struct Location {
    directory: PathBuf,
    max_volume_count: usize,
    volumes: HashMap<VolumeId, Arc<RwLock<Volume>>>,
}

impl Location {
    fn free_slots(&self) -> usize {
        self.max_volume_count.saturating_sub(self.volumes.len())
    }

    fn free_ratio(&self) -> f64 {
        if self.max_volume_count == 0 {
            0.0
        } else {
            self.free_slots() as f64 / self.max_volume_count as f64
        }
    }
}

#[derive(Default)]
struct StoreDeltas {
    new_volumes: Vec<VolumeId>,
    deleted_volumes: Vec<VolumeId>,
}

/// All volumes on one volume server.
pub struct Store {
    locations: RwLock<Vec<Location>>,
    options: StoreOptions,
    deltas: Mutex<StoreDeltas>,
    compactions: Mutex<HashMap<VolumeId, CompactJob>>,
}

impl Store {
    /// Opens a store over `dirs`, loading every volume file found.
    ///
    /// Leftover `.cpd`/`.cpx` side files from an interrupted compaction are
    /// removed: an uncommitted compaction never survives a restart.
    pub async fn open(
        dirs: Vec<(PathBuf, usize)>,
        options: StoreOptions,
    ) -> Result<Self, StorageError> {
        let mut locations = Vec::with_capacity(dirs.len());
        for (directory, max_volume_count) in dirs {
            tokio::fs::create_dir_all(&directory).await?;
            let mut volumes = HashMap::new();
            let mut entries = tokio::fs::read_dir(&directory).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                match path.extension().and_then(|e| e.to_str()) {
                    Some("cpd") | Some("cpx") => {
                        warn!(path = %path.display(), "removing stale compaction side file");
                        let _ = tokio::fs::remove_file(&path).await;
                        continue;
                    }
                    Some("dat") => {}
                    _ => continue,
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let Some((id, collection)) = parse_volume_file_stem(stem) else {
                    continue;
                };
                match Volume::open(&directory, id, &collection, options.map_kind, options.fsync)
                    .await
                {
                    Ok(volume) => {
                        volumes.insert(id, Arc::new(RwLock::new(volume)));
                    }
                    Err(e) => {
                        warn!(volume_id = id, error = %e, "failed to load volume, skipping");
                    }
                }
            }
            info!(
                directory = %directory.display(),
                volumes = volumes.len(),
                max = max_volume_count,
                "opened disk location"
            );
            locations.push(Location {
                directory,
                max_volume_count,
                volumes,
            });
        }
        Ok(Self {
            locations: RwLock::new(locations),
            options,
            deltas: Mutex::new(StoreDeltas::default()),
            compactions: Mutex::new(HashMap::new()),
        })
    }

    /// Index of the location with the highest free ratio, if any has room.
    async fn find_free_location(&self) -> Option<usize> {
        let locations = self.locations.read().await;
        locations
            .iter()
            .enumerate()
            .filter(|(_, l)| l.free_slots() > 0)
            .max_by(|(_, a), (_, b)| {
                a.free_ratio()
                    .partial_cmp(&b.free_ratio())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
    }

    /// Creates a new volume in the freest location.
    pub async fn new_volume(
        &self,
        id: VolumeId,
        collection: &str,
        replica_placement: ReplicaPlacement,
        ttl: Ttl,
    ) -> Result<(), StorageError> {
        if self.get_volume(id).await.is_some() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("volume {} already mounted", id),
            )));
        }
        let index = self
            .find_free_location()
            .await
            .ok_or(StorageError::NoFreeSpace)?;
        let mut locations = self.locations.write().await;
        let location = &mut locations[index];
        let volume = Volume::create(
            &location.directory,
            id,
            collection,
            replica_placement,
            ttl,
            self.options.map_kind,
            self.options.fsync,
        )
        .await?;
        location.volumes.insert(id, Arc::new(RwLock::new(volume)));
        drop(locations);
        self.deltas.lock().await.new_volumes.push(id);
        Ok(())
    }

    /// Handle to a mounted volume.
    pub async fn get_volume(&self, id: VolumeId) -> Option<Arc<RwLock<Volume>>> {
        let locations = self.locations.read().await;
        locations
            .iter()
            .find_map(|l| l.volumes.get(&id))
            .cloned()
    }

    /// Re-opens an unmounted volume's files and makes it available again.
    pub async fn mount_volume(&self, id: VolumeId) -> Result<(), StorageError> {
        if self.get_volume(id).await.is_some() {
            return Ok(());
        }
        let mut locations = self.locations.write().await;
        for location in locations.iter_mut() {
            let mut entries = tokio::fs::read_dir(&location.directory).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("dat") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match parse_volume_file_stem(stem) {
                    Some((vid, collection)) if vid == id => {
                        let volume = Volume::open(
                            &location.directory,
                            id,
                            &collection,
                            self.options.map_kind,
                            self.options.fsync,
                        )
                        .await?;
                        location.volumes.insert(id, Arc::new(RwLock::new(volume)));
                        drop(locations);
                        self.deltas.lock().await.new_volumes.push(id);
                        return Ok(());
                    }
                    _ => continue,
                }
            }
        }
        Err(StorageError::VolumeNotFound { volume_id: id })
    }

    /// Makes a volume unavailable without touching its files.
    pub async fn unmount_volume(&self, id: VolumeId) -> Result<(), StorageError> {
        let mut locations = self.locations.write().await;
        for location in locations.iter_mut() {
            if location.volumes.remove(&id).is_some() {
                drop(locations);
                self.deltas.lock().await.deleted_volumes.push(id);
                return Ok(());
            }
        }
        Err(StorageError::VolumeNotFound { volume_id: id })
    }

    /// Removes a volume and deletes its files.
    pub async fn delete_volume(&self, id: VolumeId) -> Result<(), StorageError> {
        let mut locations = self.locations.write().await;
        for location in locations.iter_mut() {
            if let Some(volume) = location.volumes.remove(&id) {
                drop(locations);
                volume.write().await.destroy_files().await?;
                self.deltas.lock().await.deleted_volumes.push(id);
                return Ok(());
            }
        }
        Err(StorageError::VolumeNotFound { volume_id: id })
    }

    /// Deletes every volume of a collection; returns how many were removed.
    pub async fn delete_collection(&self, collection: &str) -> Result<u64, StorageError> {
        let victims: Vec<VolumeId> = {
            let locations = self.locations.read().await;
            let mut victims = Vec::new();
            for location in locations.iter() {
                for (id, volume) in &location.volumes {
                    if volume.read().await.collection() == collection {
                        victims.push(*id);
                    }
                }
            }
            victims
        };
        for id in &victims {
            self.delete_volume(*id).await?;
        }
        Ok(victims.len() as u64)
    }

    /// Appends a needle to a volume. The per-volume write lock is held for
    /// the frame write plus the index update, nothing more.
    pub async fn write_needle(
        &self,
        id: VolumeId,
        needle: &mut Needle,
    ) -> Result<u32, StorageError> {
        let volume = self
            .get_volume(id)
            .await
            .ok_or(StorageError::VolumeNotFound { volume_id: id })?;
        let value = volume.write().await.append(needle).await?;
        Ok(value.size)
    }

    /// Reads a needle. The volume lock is held only to look up the map and
    /// the file path; the data file read happens outside it.
    pub async fn read_needle(
        &self,
        id: VolumeId,
        needle_id: NeedleId,
        cookie: Cookie,
    ) -> Result<Needle, StorageError> {
        let volume = self
            .get_volume(id)
            .await
            .ok_or(StorageError::VolumeNotFound { volume_id: id })?;
        let (value, dat_path, volume_ttl) = {
            let guard = volume.read().await;
            (
                guard.lookup(needle_id)?,
                guard.dat_path().to_path_buf(),
                guard.ttl(),
            )
        };
        let needle = read_needle_at(&dat_path, value).await?;
        if needle.id != needle_id {
            return Err(StorageError::CorruptNeedle {
                offset: value.byte_offset(),
            });
        }
        if needle.cookie != cookie {
            return Err(StorageError::CookieMismatch);
        }
        if needle.is_expired(volume_ttl, now_unix()) {
            return Err(StorageError::Expired);
        }
        Ok(needle)
    }

    /// Soft-deletes a needle; returns the freed body size.
    pub async fn delete_needle(
        &self,
        id: VolumeId,
        needle_id: NeedleId,
        cookie: Cookie,
    ) -> Result<u32, StorageError> {
        let volume = self
            .get_volume(id)
            .await
            .ok_or(StorageError::VolumeNotFound { volume_id: id })?;
        let freed = volume.write().await.delete(needle_id, cookie).await?;
        Ok(freed)
    }

    /// Snapshot of every mounted volume.
    pub async fn volume_infos(&self) -> Vec<VolumeInfo> {
        let locations = self.locations.read().await;
        let mut infos = Vec::new();
        for location in locations.iter() {
            for volume in location.volumes.values() {
                infos.push(volume.read().await.info());
            }
        }
        infos
    }

    /// Volumes added and removed since the previous drain, for heartbeats.
    pub async fn drain_deltas(&self) -> (Vec<VolumeInfo>, Vec<VolumeId>) {
        let (new_ids, deleted) = {
            let mut deltas = self.deltas.lock().await;
            (
                std::mem::take(&mut deltas.new_volumes),
                std::mem::take(&mut deltas.deleted_volumes),
            )
        };
        let mut new_infos = Vec::with_capacity(new_ids.len());
        for id in new_ids {
            if let Some(volume) = self.get_volume(id).await {
                new_infos.push(volume.read().await.info());
            }
        }
        (new_infos, deleted)
    }

    /// Per-location disk accounting.
    pub async fn disk_status(&self) -> Vec<DiskStatus> {
        let locations = self.locations.read().await;
        locations
            .iter()
            .map(|l| DiskStatus {
                directory: l.directory.display().to_string(),
                volume_count: l.volumes.len(),
                max_volume_count: l.max_volume_count,
            })
            .collect()
    }

    /// Whether any location still has a free volume slot.
    pub async fn has_free_slot(&self) -> bool {
        self.find_free_location().await.is_some()
    }

    /// Directory of the freest location, for receiving volume files from a
    /// peer before mounting them.
    pub async fn free_location_dir(&self) -> Option<PathBuf> {
        let index = self.find_free_location().await?;
        let locations = self.locations.read().await;
        locations.get(index).map(|l| l.directory.clone())
    }

    /// Total and maximum volume counts across all locations.
    pub async fn volume_counts(&self) -> (usize, usize) {
        let locations = self.locations.read().await;
        let current = locations.iter().map(|l| l.volumes.len()).sum();
        let max = locations.iter().map(|l| l.max_volume_count).sum();
        (current, max)
    }

    /// Vacuum phase 1: can this volume be compacted right now?
    pub async fn vacuum_check(&self, id: VolumeId) -> Result<(f64, bool), StorageError> {
        let volume = self
            .get_volume(id)
            .await
            .ok_or(StorageError::VolumeNotFound { volume_id: id })?;
        let guard = volume.read().await;
        let busy = guard.is_compacting() || self.compactions.lock().await.contains_key(&id);
        Ok((guard.garbage_ratio(), !busy))
    }

    /// Vacuum phase 2: build the compacted side files.
    ///
    /// The write lock is held only to start the job; the copy runs without
    /// it, so appends continue. The finished job waits for `vacuum_commit`.
    pub async fn vacuum_compact(&self, id: VolumeId) -> Result<(), StorageError> {
        let volume = self
            .get_volume(id)
            .await
            .ok_or(StorageError::VolumeNotFound { volume_id: id })?;
        let mut job = volume.write().await.begin_compact()?;
        if let Err(e) = job.run().await {
            volume.write().await.abort_compact(job).await;
            return Err(e);
        }
        self.compactions.lock().await.insert(id, job);
        Ok(())
    }

    /// Vacuum phase 3: swap the side files in.
    ///
    /// The job may have waited for its commit turn since the compact phase
    /// — the coordinator compacts every replica before committing any —
    /// with appends continuing the whole time. The accumulated diff is
    /// replayed here without the lock first, so the locked commit only
    /// stalls writers for the bounded remainder.
    pub async fn vacuum_commit(&self, id: VolumeId) -> Result<(), StorageError> {
        let mut job = self
            .compactions
            .lock()
            .await
            .remove(&id)
            .ok_or(StorageError::NoPendingCompaction { volume_id: id })?;
        let volume = self
            .get_volume(id)
            .await
            .ok_or(StorageError::VolumeNotFound { volume_id: id })?;
        if let Err(e) = job.catch_up_bounded().await {
            volume.write().await.abort_compact(job).await;
            return Err(e);
        }
        let result = volume.write().await.commit_compact(job).await;
        result
    }
}
