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

//! Volume server composition root.

use crate::config::VolumeServerConfig;
use crate::heartbeat::HeartbeatWorker;
use crate::shutdown::shutdown_signal;
use anyhow::{Context, Result};
use silo_api::{volume_server_router, Guard, VolumeServerState};
use silo_core::{Store, StoreOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// The volume server application.
pub struct VolumeServerApp {
    config: VolumeServerConfig,
}

impl VolumeServerApp {
    /// Validates the configuration and builds the app.
    pub fn new(config: VolumeServerConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("volume server configuration error: {}", e))?;
        Ok(Self { config })
    }

    /// Runs the volume server until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let config = &self.config;
        info!(bind = %config.bind, dirs = ?config.dirs, "Silo volume server starting");

        let store = Arc::new(
            Store::open(
                config.dirs.clone(),
                StoreOptions {
                    map_kind: config.map_kind,
                    fsync: config.fsync_policy(),
                },
            )
            .await?,
        );
        info!(
            volumes = store.volume_infos().await.len(),
            "store opened"
        );

        let guard = Guard::new(config.ip_whitelist.clone(), config.jwt_secret.clone());
        let mut state = VolumeServerState::new(
            store.clone(),
            config.bind.clone(),
            config.public_url(),
            config.masters.clone(),
            guard,
        );
        if config.metrics_enabled {
            match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
                Ok(handle) => {
                    info!("Prometheus metrics enabled at /metrics");
                    state = state.with_prometheus(handle);
                }
                Err(e) => tracing::warn!(error = %e, "failed to install Prometheus recorder"),
            }
        }

        let heartbeat_handle = HeartbeatWorker::new(store, config).spawn();

        let router = volume_server_router(state);
        let addr: SocketAddr = config
            .bind
            .parse()
            .context("parsing volume server bind address")?;
        let listener = TcpListener::bind(addr).await?;
        info!("volume server listening on http://{}", addr);
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        heartbeat_handle.abort();
        info!("volume server shutdown complete");
        Ok(())
    }
}
