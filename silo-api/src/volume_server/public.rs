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

//! Public needle handlers: upload, read, delete.

use crate::errors::ApiError;
use crate::messages::{DeleteResult, UploadQuery, UploadResult};
use crate::replication::{replicate_to_peers, ReplicatedWrite};
use crate::volume_server::VolumeServerState;
use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use silo_core::needle::FLAG_GZIPPED;
use silo_core::{FileId, Needle, StorageError, VolumeId};

/// Hard cap on one uploaded needle.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

fn parse_vid(vid: &str) -> Result<VolumeId, ApiError> {
    vid.parse()
        .map_err(|_| ApiError::BadRequest(format!("volume id '{}'", vid)))
}

/// `PUT/POST /:vid/:fid`
pub async fn upload(
    State(state): State<VolumeServerState>,
    Path((vid, fid)): Path<(String, String)>,
    Query(query): Query<UploadQuery>,
    request: Request,
) -> Result<Response, ApiError> {
    handle_upload(state, &vid, &fid, None, query, request).await
}

/// `PUT/POST /:vid/:fid/:filename`
pub async fn upload_named(
    State(state): State<VolumeServerState>,
    Path((vid, fid, filename)): Path<(String, String, String)>,
    Query(query): Query<UploadQuery>,
    request: Request,
) -> Result<Response, ApiError> {
    handle_upload(state, &vid, &fid, Some(filename), query, request).await
}

async fn handle_upload(
    state: VolumeServerState,
    vid: &str,
    fid: &str,
    filename: Option<String>,
    query: UploadQuery,
    request: Request,
) -> Result<Response, ApiError> {
    let volume_id = parse_vid(vid)?;
    let file_id = FileId::parse_key(volume_id, fid).map_err(ApiError::Storage)?;

    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let gzipped = request
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);

    let (data, form_name, form_mime) = read_body(request, content_type.as_deref()).await?;

    let name = filename.or(form_name);
    let mime = form_mime.or_else(|| match content_type {
        Some(ct) if !ct.starts_with("multipart/") && ct != "application/octet-stream" => Some(ct),
        _ => None,
    });

    let mut needle = Needle::new(file_id.needle_id, file_id.cookie, data.clone());
    if gzipped {
        needle.flags |= FLAG_GZIPPED;
    }
    if let Some(name) = &name {
        needle = needle.with_name(name.clone());
    }
    if let Some(mime) = &mime {
        needle = needle.with_mime(mime.clone());
    }
    if let Some(ts) = query.ts {
        needle = needle.with_last_modified(ts);
    }
    if let Some(ttl) = &query.ttl {
        let ttl = ttl
            .parse::<silo_core::Ttl>()
            .map_err(|_| ApiError::BadRequest(format!("ttl '{}'", ttl)))?;
        needle = needle.with_ttl(ttl);
    }

    let etag = needle.etag();
    let size = needle.data.len() as u32;
    state.store.write_needle(volume_id, &mut needle).await?;

    state
        .counters
        .writes
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    metrics::counter!("silo_needle_requests_total", "op" => "write").increment(1);

    if query.kind.as_deref() != Some("replicate") {
        let copy_count = volume_copy_count(&state, volume_id).await?;
        if copy_count > 1 {
            replicate_to_peers(
                &state.peers,
                &state.http,
                &[state.url.as_str(), state.public_url.as_str()],
                ReplicatedWrite {
                    volume_id,
                    fid,
                    filename: name.as_deref(),
                    body: data,
                    content_type: mime.as_deref(),
                    ts: query.ts,
                    ttl: query.ttl.as_deref(),
                    delete: false,
                },
            )
            .await?;
        }
    }

    Ok((StatusCode::CREATED, Json(UploadResult { size, etag })).into_response())
}

async fn read_body(
    request: Request,
    content_type: Option<&str>,
) -> Result<(Bytes, Option<String>, Option<String>), ApiError> {
    if content_type
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false)
    {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?
        {
            let name = field.file_name().map(str::to_string);
            let mime = field.content_type().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            return Ok((bytes, name, mime));
        }
        Err(ApiError::BadRequest("empty multipart upload".to_string()))
    } else {
        let bytes = axum::body::to_bytes(request.into_body(), MAX_UPLOAD_BYTES)
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        Ok((bytes, None, None))
    }
}

async fn volume_copy_count(
    state: &VolumeServerState,
    volume_id: VolumeId,
) -> Result<usize, ApiError> {
    let volume = state
        .store
        .get_volume(volume_id)
        .await
        .ok_or(StorageError::VolumeNotFound { volume_id })?;
    let count = volume.read().await.replica_placement().copy_count();
    Ok(count)
}

/// `GET /:vid/:fid[.ext]`
pub async fn read(
    State(state): State<VolumeServerState>,
    Path((vid, fid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    handle_read(state, &vid, &fid, headers).await
}

/// `GET /:vid/:fid/:filename`
pub async fn read_named(
    State(state): State<VolumeServerState>,
    Path((vid, fid, _filename)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    handle_read(state, &vid, &fid, headers).await
}

async fn handle_read(
    state: VolumeServerState,
    vid: &str,
    fid: &str,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let volume_id = parse_vid(vid)?;
    let file_id = FileId::parse_key(volume_id, fid).map_err(ApiError::Storage)?;
    let needle = state
        .store
        .read_needle(volume_id, file_id.needle_id, file_id.cookie)
        .await?;

    state
        .counters
        .reads
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    metrics::counter!("silo_needle_requests_total", "op" => "read").increment(1);

    let etag = needle.etag();
    if let Some(if_none_match) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        if if_none_match.trim_matches('"') == etag {
            return Ok(StatusCode::NOT_MODIFIED.into_response());
        }
    }

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, format!("\"{}\"", etag))
        .header(
            header::CONTENT_TYPE,
            needle
                .mime
                .as_deref()
                .unwrap_or("application/octet-stream"),
        );
    if needle.flags & FLAG_GZIPPED != 0 {
        response = response.header(header::CONTENT_ENCODING, "gzip");
    }
    response
        .body(Body::from(needle.data))
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// `DELETE /:vid/:fid`
pub async fn delete(
    State(state): State<VolumeServerState>,
    Path((vid, fid)): Path<(String, String)>,
    Query(query): Query<UploadQuery>,
) -> Result<Response, ApiError> {
    let volume_id = parse_vid(&vid)?;
    let file_id = FileId::parse_key(volume_id, &fid).map_err(ApiError::Storage)?;
    let freed = state
        .store
        .delete_needle(volume_id, file_id.needle_id, file_id.cookie)
        .await?;

    state
        .counters
        .deletes
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    metrics::counter!("silo_needle_requests_total", "op" => "delete").increment(1);

    if query.kind.as_deref() != Some("replicate") {
        let copy_count = volume_copy_count(&state, volume_id).await?;
        if copy_count > 1 {
            replicate_to_peers(
                &state.peers,
                &state.http,
                &[state.url.as_str(), state.public_url.as_str()],
                ReplicatedWrite {
                    volume_id,
                    fid: &fid,
                    filename: None,
                    body: Bytes::new(),
                    content_type: None,
                    ts: None,
                    ttl: None,
                    delete: true,
                },
            )
            .await?;
        }
    }

    Ok((StatusCode::ACCEPTED, Json(DeleteResult { size: freed })).into_response())
}
