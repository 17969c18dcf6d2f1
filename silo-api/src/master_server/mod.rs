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

//! The master's HTTP face.

mod handlers;

use crate::guard::{guard_middleware, Guard};
use crate::messages::VolumeLocationUpdate;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use silo_topology::{Assigner, Topology, VolumeGrowth};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

/// Shared state of every master handler.
#[derive(Clone)]
pub struct MasterState {
    /// The cluster map.
    pub topology: Arc<Topology>,
    /// The assignment algorithm.
    pub assigner: Arc<Assigner>,
    /// The volume grower.
    pub growth: Arc<VolumeGrowth>,
    /// Gossip channel feeding `/cluster/watch`.
    pub updates: broadcast::Sender<VolumeLocationUpdate>,
    /// Admin guard.
    pub guard: Arc<Guard>,
    /// Prometheus render handle, when metrics are enabled.
    pub prometheus: Option<PrometheusHandle>,
}

impl MasterState {
    /// Creates the handler state.
    pub fn new(
        topology: Arc<Topology>,
        assigner: Arc<Assigner>,
        growth: Arc<VolumeGrowth>,
        guard: Guard,
    ) -> Self {
        let (updates, _) = broadcast::channel(1024);
        Self {
            topology,
            assigner,
            growth,
            updates,
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

/// Builds the master router.
pub fn master_router(state: MasterState) -> Router {
    let admin = Router::new()
        .route("/vol/list", get(handlers::volume_list))
        .route("/vol/grow", post(handlers::grow))
        .route("/col/list", get(handlers::collection_list))
        .route("/metrics", get(handlers::metrics_render))
        .route_layer(middleware::from_fn_with_state(
            state.guard.clone(),
            guard_middleware,
        ));

    Router::new()
        .route("/dir/assign", get(handlers::assign).post(handlers::assign))
        .route("/dir/lookup", get(handlers::lookup))
        .route("/cluster/heartbeat", post(handlers::heartbeat))
        .route("/cluster/watch", get(handlers::watch))
        .route("/status", get(handlers::status))
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
