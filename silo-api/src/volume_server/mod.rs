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

//! The volume server's HTTP face.

mod admin;
mod public;

use crate::guard::{guard_middleware, Guard};
use crate::replication::PeerLookup;
use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use silo_core::Store;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Request counters surfaced by `/stats/counter`.
#[derive(Default)]
pub struct Counters {
    /// Uploads served.
    pub writes: AtomicU64,
    /// Reads served.
    pub reads: AtomicU64,
    /// Deletes served.
    pub deletes: AtomicU64,
}

/// Shared state of every volume server handler.
#[derive(Clone)]
pub struct VolumeServerState {
    /// The storage engine.
    pub store: Arc<Store>,
    /// This server's admin URL (its identity in the topology).
    pub url: String,
    /// This server's client-facing URL.
    pub public_url: String,
    /// Replica location lookup against the masters.
    pub peers: Arc<PeerLookup>,
    /// Outbound HTTP client for replication and volume copy.
    pub http: reqwest::Client,
    /// Request counters.
    pub counters: Arc<Counters>,
    /// Admin guard.
    pub guard: Arc<Guard>,
    /// Prometheus render handle, when metrics are enabled.
    pub prometheus: Option<PrometheusHandle>,
}

impl VolumeServerState {
    /// Creates the handler state.
    pub fn new(
        store: Arc<Store>,
        url: String,
        public_url: String,
        masters: Vec<String>,
        guard: Guard,
    ) -> Self {
        let http = reqwest::Client::new();
        Self {
            peers: Arc::new(PeerLookup::new(http.clone(), masters)),
            store,
            url,
            public_url,
            http,
            counters: Arc::new(Counters::default()),
            guard: Arc::new(guard),
            prometheus: None,
        }
    }

    /// Attaches a Prometheus render handle.
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}

/// Builds the volume server router: the public needle surface plus the
/// guarded admin and stats surface.
pub fn volume_server_router(state: VolumeServerState) -> Router {
    let admin = Router::new()
        .route("/status", get(admin::status))
        .route("/admin/assign_volume", post(admin::assign_volume))
        .route("/admin/delete_volume", post(admin::delete_volume))
        .route("/admin/vacuum_volume_check", get(admin::vacuum_check))
        .route("/admin/vacuum_volume_compact", post(admin::vacuum_compact))
        .route("/admin/vacuum_volume_commit", post(admin::vacuum_commit))
        .route("/admin/freeze_volume", post(admin::freeze_volume))
        .route("/admin/delete_collection", post(admin::delete_collection))
        .route("/admin/volume_file_status", get(admin::volume_file_status))
        .route("/admin/copy_file", get(admin::copy_file))
        .route("/admin/volume_copy", post(admin::volume_copy))
        .route("/stats/disk", get(admin::stats_disk))
        .route("/stats/counter", get(admin::stats_counter))
        .route("/stats/memory", get(admin::stats_memory))
        .route("/metrics", get(admin::metrics_render))
        .route_layer(middleware::from_fn_with_state(
            state.guard.clone(),
            guard_middleware,
        ));

    Router::new()
        .route(
            "/:vid/:fid",
            put(public::upload)
                .post(public::upload)
                .get(public::read)
                .delete(public::delete),
        )
        .route(
            "/:vid/:fid/:filename",
            put(public::upload_named)
                .post(public::upload_named)
                .get(public::read_named),
        )
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
