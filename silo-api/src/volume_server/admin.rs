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

//! Admin handlers: volume lifecycle, vacuum phases, CopyFile streaming,
//! volume copy (replica repair), status and stats.

use crate::errors::ApiError;
use crate::messages::{
    AssignVolumeQuery, CollectionQuery, CopyFileQuery, DeleteCollectionResult, VacuumCheckResponse,
    VolumeCopyRequest, VolumeCopyResponse, VolumeFileStatus, VolumeQuery, VolumeServerStatus,
};
use crate::volume_server::VolumeServerState;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::TryStreamExt;
use silo_core::volume::volume_file_stem;
use silo_core::{ReplicaPlacement, StorageError, Ttl};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{info, warn};

const COPY_CHUNK_BYTES: usize = 2 * 1024 * 1024;

/// `GET /status`
pub async fn status(State(state): State<VolumeServerState>) -> Json<VolumeServerStatus> {
    Json(VolumeServerStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        url: state.url.clone(),
        public_url: state.public_url.clone(),
        volumes: state.store.volume_infos().await,
    })
}

/// `POST /admin/assign_volume`
pub async fn assign_volume(
    State(state): State<VolumeServerState>,
    Query(query): Query<AssignVolumeQuery>,
) -> Result<StatusCode, ApiError> {
    let replica_placement: ReplicaPlacement = match &query.replication {
        Some(s) => s.parse().map_err(ApiError::Storage)?,
        None => ReplicaPlacement::default(),
    };
    let ttl: Ttl = match &query.ttl {
        Some(s) => s.parse().map_err(ApiError::Storage)?,
        None => Ttl::NONE,
    };
    state
        .store
        .new_volume(query.volume, &query.collection, replica_placement, ttl)
        .await?;
    info!(volume_id = query.volume, collection = %query.collection, "assigned volume");
    Ok(StatusCode::CREATED)
}

/// `POST /admin/delete_volume`
pub async fn delete_volume(
    State(state): State<VolumeServerState>,
    Query(query): Query<VolumeQuery>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_volume(query.volume).await?;
    Ok(StatusCode::OK)
}

/// `GET /admin/vacuum_volume_check`
pub async fn vacuum_check(
    State(state): State<VolumeServerState>,
    Query(query): Query<VolumeQuery>,
) -> Result<Json<VacuumCheckResponse>, ApiError> {
    let (garbage_ratio, can_vacuum) = state.store.vacuum_check(query.volume).await?;
    Ok(Json(VacuumCheckResponse {
        garbage_ratio,
        can_vacuum,
    }))
}

/// `POST /admin/vacuum_volume_compact`
pub async fn vacuum_compact(
    State(state): State<VolumeServerState>,
    Query(query): Query<VolumeQuery>,
) -> Result<StatusCode, ApiError> {
    state.store.vacuum_compact(query.volume).await?;
    metrics::counter!("silo_vacuum_compactions_total").increment(1);
    Ok(StatusCode::OK)
}

/// `POST /admin/vacuum_volume_commit`
pub async fn vacuum_commit(
    State(state): State<VolumeServerState>,
    Query(query): Query<VolumeQuery>,
) -> Result<StatusCode, ApiError> {
    state.store.vacuum_commit(query.volume).await?;
    Ok(StatusCode::OK)
}

/// `POST /admin/freeze_volume`
pub async fn freeze_volume(
    State(state): State<VolumeServerState>,
    Query(query): Query<VolumeQuery>,
) -> Result<StatusCode, ApiError> {
    let volume = state
        .store
        .get_volume(query.volume)
        .await
        .ok_or(StorageError::VolumeNotFound {
            volume_id: query.volume,
        })?;
    volume.write().await.set_read_only(true);
    info!(volume_id = query.volume, "froze volume");
    Ok(StatusCode::OK)
}

/// `POST /admin/delete_collection`
pub async fn delete_collection(
    State(state): State<VolumeServerState>,
    Query(query): Query<CollectionQuery>,
) -> Result<Json<DeleteCollectionResult>, ApiError> {
    let deleted_volumes = state.store.delete_collection(&query.collection).await?;
    info!(collection = %query.collection, deleted_volumes, "deleted collection");
    Ok(Json(DeleteCollectionResult { deleted_volumes }))
}

/// `GET /admin/volume_file_status`
pub async fn volume_file_status(
    State(state): State<VolumeServerState>,
    Query(query): Query<VolumeQuery>,
) -> Result<Json<VolumeFileStatus>, ApiError> {
    let volume = state
        .store
        .get_volume(query.volume)
        .await
        .ok_or(StorageError::VolumeNotFound {
            volume_id: query.volume,
        })?;
    let guard = volume.read().await;
    Ok(Json(VolumeFileStatus {
        volume_id: query.volume,
        idx_size: guard.idx_size(),
        dat_size: guard.dat_size(),
        compaction_revision: guard.compaction_revision(),
        file_count: guard.info().file_count,
        last_modified: guard.last_modified(),
        collection: guard.collection().to_string(),
    }))
}

/// `GET /admin/copy_file`
///
/// Streams the first `stop_offset` bytes of a volume's `.dat` or `.idx`.
/// Refused with 409 when the volume's compaction revision moved past the
/// one the caller asked for; the caller restarts the transfer.
pub async fn copy_file(
    State(state): State<VolumeServerState>,
    Query(query): Query<CopyFileQuery>,
) -> Result<Response, ApiError> {
    let volume = state
        .store
        .get_volume(query.volume)
        .await
        .ok_or(StorageError::VolumeNotFound {
            volume_id: query.volume,
        })?;
    let path = {
        let guard = volume.read().await;
        if guard.compaction_revision() != query.revision {
            return Err(ApiError::Storage(
                StorageError::CompactionRevisionMismatch {
                    expected: query.revision,
                    actual: guard.compaction_revision(),
                },
            ));
        }
        match query.kind.as_str() {
            "dat" => guard.dat_path().to_path_buf(),
            "idx" => guard.idx_path().to_path_buf(),
            other => return Err(ApiError::BadRequest(format!("kind '{}'", other))),
        }
    };

    let mut file = File::open(&path).await.map_err(StorageError::Io)?;
    file.seek(SeekFrom::Start(0)).await.map_err(StorageError::Io)?;

    let stream = futures::stream::try_unfold(
        (file, query.stop_offset),
        move |(mut file, mut left)| async move {
            if left == 0 {
                return Ok::<_, std::io::Error>(None);
            }
            let want = left.min(COPY_CHUNK_BYTES as u64) as usize;
            let mut buf = vec![0u8; want];
            let n = file.read(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            buf.truncate(n);
            left -= n as u64;
            Ok(Some((bytes::Bytes::from(buf), (file, left))))
        },
    );

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::BadRequest(e.to_string()))?)
}

/// `POST /admin/volume_copy`
///
/// Pulls a volume's `.idx` and `.dat` from `source_node` and mounts it,
/// repairing or seeding a replica. Partial files are deleted on error.
pub async fn volume_copy(
    State(state): State<VolumeServerState>,
    Json(request): Json<VolumeCopyRequest>,
) -> Result<Json<VolumeCopyResponse>, ApiError> {
    let vid = request.volume_id;

    // The local copy, if any, is replaced wholesale.
    if state.store.get_volume(vid).await.is_some() {
        state.store.unmount_volume(vid).await?;
    }

    let source_status: VolumeFileStatus = get_json(
        &state,
        &format!(
            "http://{}/admin/volume_file_status?volume={}",
            request.source_node, vid
        ),
    )
    .await?;

    let dir = state
        .store
        .free_location_dir()
        .await
        .ok_or(StorageError::NoFreeSpace)?;
    let stem = dir.join(volume_file_stem(vid, &source_status.collection));
    let idx_path = stem.with_extension("idx");
    let dat_path = stem.with_extension("dat");

    let result = pull_files(&state, &request.source_node, &source_status, &idx_path, &dat_path).await;
    if let Err(e) = result {
        warn!(volume_id = vid, error = %e, "volume copy failed, removing partial files");
        let _ = tokio::fs::remove_file(&idx_path).await;
        let _ = tokio::fs::remove_file(&dat_path).await;
        return Err(e);
    }

    state.store.mount_volume(vid).await?;
    info!(volume_id = vid, source = %request.source_node, "volume copied");
    Ok(Json(VolumeCopyResponse {
        last_append_at: source_status.last_modified,
    }))
}

async fn pull_files(
    state: &VolumeServerState,
    source: &str,
    status: &VolumeFileStatus,
    idx_path: &Path,
    dat_path: &Path,
) -> Result<(), ApiError> {
    pull_one(state, source, status, "idx", status.idx_size, idx_path).await?;
    pull_one(state, source, status, "dat", status.dat_size, dat_path).await?;

    // The transfer is only good if the sizes match the source's report.
    for (path, want) in [(idx_path, status.idx_size), (dat_path, status.dat_size)] {
        let got = tokio::fs::metadata(path).await.map_err(StorageError::Io)?.len();
        if got != want {
            return Err(ApiError::ReplicaFailure(format!(
                "size mismatch for {}: got {}, want {}",
                path.display(),
                got,
                want
            )));
        }
    }
    Ok(())
}

async fn pull_one(
    state: &VolumeServerState,
    source: &str,
    status: &VolumeFileStatus,
    kind: &str,
    stop_offset: u64,
    to: &Path,
) -> Result<(), ApiError> {
    let url = format!(
        "http://{}/admin/copy_file?volume={}&kind={}&revision={}&stopOffset={}",
        source, status.volume_id, kind, status.compaction_revision, stop_offset
    );
    let response = state
        .http
        .get(&url)
        .send()
        .await
        .map_err(|e| ApiError::ReplicaFailure(e.to_string()))?;
    if !response.status().is_success() {
        return Err(ApiError::ReplicaFailure(format!(
            "copy_file {} returned {}",
            kind,
            response.status()
        )));
    }
    let mut file = File::create(to).await.map_err(StorageError::Io)?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream
        .try_next()
        .await
        .map_err(|e| ApiError::ReplicaFailure(e.to_string()))?
    {
        file.write_all(&chunk).await.map_err(StorageError::Io)?;
    }
    file.sync_all().await.map_err(StorageError::Io)?;
    Ok(())
}

async fn get_json<T: serde::de::DeserializeOwned>(
    state: &VolumeServerState,
    url: &str,
) -> Result<T, ApiError> {
    let response = state
        .http
        .get(url)
        .send()
        .await
        .map_err(|e| ApiError::ReplicaFailure(e.to_string()))?;
    if !response.status().is_success() {
        return Err(ApiError::ReplicaFailure(format!(
            "{} returned {}",
            url,
            response.status()
        )));
    }
    response
        .json()
        .await
        .map_err(|e| ApiError::ReplicaFailure(e.to_string()))
}

/// `GET /stats/disk`
pub async fn stats_disk(State(state): State<VolumeServerState>) -> Json<crate::messages::DiskStats> {
    Json(crate::messages::DiskStats {
        disks: state.store.disk_status().await,
    })
}

/// `GET /stats/counter`
pub async fn stats_counter(
    State(state): State<VolumeServerState>,
) -> Json<crate::messages::CounterStats> {
    use std::sync::atomic::Ordering;
    Json(crate::messages::CounterStats {
        writes: state.counters.writes.load(Ordering::Relaxed),
        reads: state.counters.reads.load(Ordering::Relaxed),
        deletes: state.counters.deletes.load(Ordering::Relaxed),
    })
}

/// `GET /stats/memory`
pub async fn stats_memory() -> Json<crate::messages::MemoryStats> {
    Json(crate::messages::MemoryStats {
        resident_bytes: resident_bytes().unwrap_or(0),
    })
}

/// Resident set size from procfs; 0 where unavailable.
fn resident_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * 4096)
}

/// `GET /metrics`
pub async fn metrics_render(State(state): State<VolumeServerState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
