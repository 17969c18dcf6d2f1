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

//! Master composition root.

use crate::config::MasterConfig;
use crate::shutdown::shutdown_signal;
use crate::workers::{NodeExpiryWorker, VacuumScheduler};
use anyhow::{Context, Result};
use silo_api::{master_router, Guard, HttpVolumeServerClient, MasterState};
use silo_topology::{Assigner, Topology, VacuumCoordinator, VolumeGrowth, VolumeServerClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// The master application.
pub struct MasterApp {
    config: MasterConfig,
}

impl MasterApp {
    /// Validates the configuration and builds the app.
    pub fn new(config: MasterConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("master configuration error: {}", e))?;
        Ok(Self { config })
    }

    /// Runs the master until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let config = &self.config;
        info!(bind = %config.bind, "Silo master starting");

        let topology = Arc::new(Topology::new(config.volume_size_limit()));
        let default_replication = config
            .default_replication
            .parse()
            .map_err(|_| anyhow::anyhow!("bad default replication"))?;
        let assigner = Arc::new(Assigner::new(
            topology.clone(),
            default_replication,
            config.growth_threshold,
        ));
        let client: Arc<dyn VolumeServerClient> = Arc::new(HttpVolumeServerClient::new());
        let growth = Arc::new(VolumeGrowth::new(topology.clone(), client.clone()));
        let coordinator = Arc::new(VacuumCoordinator::new(
            topology.clone(),
            client,
            config.garbage_threshold,
            config.commit_failure_policy,
        ));

        let guard = Guard::new(config.ip_whitelist.clone(), config.jwt_secret.clone());
        let mut state = MasterState::new(topology.clone(), assigner, growth, guard);
        if config.metrics_enabled {
            match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
                Ok(handle) => {
                    info!("Prometheus metrics enabled at /metrics");
                    state = state.with_prometheus(handle);
                }
                Err(e) => tracing::warn!(error = %e, "failed to install Prometheus recorder"),
            }
        }

        let pulse = Duration::from_secs(config.pulse_secs);
        let vacuum_handle = VacuumScheduler::new(
            coordinator,
            Duration::from_secs(config.vacuum_interval_secs),
        )
        .spawn();
        let expiry_handle = NodeExpiryWorker::new(
            topology,
            state.updates.clone(),
            pulse,
            pulse * config.stale_after_pulses,
        )
        .spawn();

        let router = master_router(state);
        let addr: SocketAddr = config.bind.parse().context("parsing master bind address")?;
        let listener = TcpListener::bind(addr).await?;
        info!("master listening on http://{}", addr);
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        vacuum_handle.abort();
        expiry_handle.abort();
        info!("master shutdown complete");
        Ok(())
    }
}
