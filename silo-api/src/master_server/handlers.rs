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

//! Master handlers: assign, lookup, heartbeat, watch, listings, growth.

use crate::errors::ApiError;
use crate::master_server::MasterState;
use crate::messages::{
    CollectionListResponse, GrowQuery, GrowResponse, HeartbeatResponse, LookupResponse,
    MasterStatus, VolumeLocationUpdate, WatchResponse,
};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use silo_topology::{AssignRequest, Assignment, Heartbeat, TopologyError, TopologyStatus};
use std::time::Duration;
use tracing::{info, warn};

/// `GET|POST /dir/assign`
///
/// Low writable counts trigger growth: in the background while volumes
/// remain, synchronously when the layout is empty so that first writes
/// against a fresh cluster succeed.
pub async fn assign(
    State(state): State<MasterState>,
    Query(request): Query<AssignRequest>,
) -> Result<Json<Assignment>, ApiError> {
    let key = state.assigner.layout_key(&request)?;
    if state.assigner.needs_growth(&key).await {
        if state.topology.writable_count(&key).await == 0 {
            state.growth.grow(&key, 1).await?;
        } else {
            let growth = state.growth.clone();
            let threshold = state.assigner.growth_threshold();
            let key = key.clone();
            tokio::spawn(async move {
                if let Err(e) = growth.grow(&key, threshold).await {
                    warn!(error = %e, "background growth failed");
                }
            });
        }
    }
    let assignment = state.assigner.assign(&request).await?;
    metrics::counter!("silo_assign_requests_total").increment(1);
    Ok(Json(assignment))
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    #[serde(rename = "volumeId")]
    volume_id: u32,
}

/// `GET /dir/lookup?volumeId=N`
pub async fn lookup(
    State(state): State<MasterState>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<LookupResponse>, ApiError> {
    let locations = state
        .topology
        .lookup(query.volume_id)
        .await
        .ok_or(TopologyError::UnknownVolume(query.volume_id))?;
    Ok(Json(LookupResponse {
        volume_id: query.volume_id,
        locations,
    }))
}

/// `POST /cluster/heartbeat`
pub async fn heartbeat(
    State(state): State<MasterState>,
    Json(beat): Json<Heartbeat>,
) -> Json<HeartbeatResponse> {
    let outcome = state.topology.apply_heartbeat(&beat).await;
    if outcome.is_new_node {
        info!(node = %beat.url, "volume server connected");
    }
    if !outcome.new_vids.is_empty() || !outcome.deleted_vids.is_empty() {
        // Nobody listening is fine; gossip is best-effort.
        let _ = state.updates.send(VolumeLocationUpdate {
            url: beat.url.clone(),
            public_url: beat.public_url.clone(),
            new_vids: outcome.new_vids,
            deleted_vids: outcome.deleted_vids,
        });
    }
    Json(HeartbeatResponse {
        volume_size_limit: state.topology.volume_size_limit(),
    })
}

#[derive(Debug, Deserialize)]
pub struct WatchQuery {
    /// How long to hold the poll open (seconds).
    #[serde(default, rename = "timeoutSecs")]
    timeout_secs: Option<u64>,
}

/// `GET /cluster/watch`
///
/// Long-poll rendition of the location stream: blocks until a volume
/// location changes or the window closes, then returns every update that
/// is ready. Clients loop on this call.
pub async fn watch(
    State(state): State<MasterState>,
    Query(query): Query<WatchQuery>,
) -> Json<WatchResponse> {
    let window = Duration::from_secs(query.timeout_secs.unwrap_or(30).min(300));
    let mut receiver = state.updates.subscribe();
    let mut updates = Vec::new();
    if let Ok(Ok(first)) = tokio::time::timeout(window, receiver.recv()).await {
        updates.push(first);
        while let Ok(more) = receiver.try_recv() {
            updates.push(more);
        }
    }
    Json(WatchResponse { updates })
}

/// `GET /vol/list`
pub async fn volume_list(State(state): State<MasterState>) -> Json<TopologyStatus> {
    Json(state.topology.status().await)
}

/// `GET /col/list`
pub async fn collection_list(State(state): State<MasterState>) -> Json<CollectionListResponse> {
    Json(CollectionListResponse {
        collections: state.topology.collections().await,
    })
}

/// `POST /vol/grow`
pub async fn grow(
    State(state): State<MasterState>,
    Query(query): Query<GrowQuery>,
) -> Result<Json<GrowResponse>, ApiError> {
    let request = AssignRequest {
        collection: query.collection.clone(),
        replication: query.replication.clone(),
        ttl: query.ttl.clone(),
        ..Default::default()
    };
    let key = state.assigner.layout_key(&request)?;
    let grown = match query.count {
        Some(count) => state.growth.grow_by(&key, count).await?,
        None => state.growth.grow(&key, 0).await?,
    };
    Ok(Json(GrowResponse { grown }))
}

/// `GET /status`
pub async fn status(State(state): State<MasterState>) -> Json<MasterStatus> {
    Json(MasterStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        volume_size_limit: state.topology.volume_size_limit(),
    })
}

/// `GET /metrics`
pub async fn metrics_render(State(state): State<MasterState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
