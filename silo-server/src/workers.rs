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

//! The master's background workers: the vacuum scheduler and the node
//! expiry sweep. Each is a spawned task stopped by aborting its handle.

use silo_api::messages::VolumeLocationUpdate;
use silo_topology::{Topology, VacuumCoordinator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{info, warn};

/// Periodically scans for garbage-heavy volumes and compacts them.
pub struct VacuumScheduler {
    coordinator: Arc<VacuumCoordinator>,
    every: Duration,
}

impl VacuumScheduler {
    /// Creates a scheduler running a pass every `every`.
    pub fn new(coordinator: Arc<VacuumCoordinator>, every: Duration) -> Self {
        Self { coordinator, every }
    }

    /// Spawns the loop; abort the handle to stop it.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = interval(self.every);
            // The first tick fires immediately; a fresh master has nothing
            // worth vacuuming yet.
            timer.tick().await;
            loop {
                timer.tick().await;
                let started = std::time::Instant::now();
                let stats = self.coordinator.run_once().await;
                if stats.candidates > 0 {
                    info!(
                        candidates = stats.candidates,
                        committed = stats.committed,
                        declined = stats.declined,
                        failed = stats.failed,
                        repaired = stats.repaired,
                        elapsed = ?started.elapsed(),
                        "vacuum pass finished"
                    );
                }
                metrics::counter!("silo_vacuum_passes_total").increment(1);
            }
        })
    }
}

/// Expires nodes that stopped pulsing and gossips their lost volumes.
pub struct NodeExpiryWorker {
    topology: Arc<Topology>,
    updates: broadcast::Sender<VolumeLocationUpdate>,
    pulse: Duration,
    stale_after: Duration,
}

impl NodeExpiryWorker {
    /// Creates a worker checking once per pulse.
    pub fn new(
        topology: Arc<Topology>,
        updates: broadcast::Sender<VolumeLocationUpdate>,
        pulse: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            topology,
            updates,
            pulse,
            stale_after,
        }
    }

    /// Spawns the loop; abort the handle to stop it.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = interval(self.pulse);
            loop {
                timer.tick().await;
                let swept = self.topology.sweep_stale(self.stale_after).await;
                for (location, lost) in swept {
                    warn!(node = %location.url, volumes = lost.len(), "expired volume server");
                    let _ = self.updates.send(VolumeLocationUpdate {
                        url: location.url,
                        public_url: location.public_url,
                        new_vids: Vec::new(),
                        deleted_vids: lost,
                    });
                }
            }
        })
    }
}
