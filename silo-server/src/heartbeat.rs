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

//! The volume server's heartbeat loop.
//!
//! Every pulse (with jitter) the worker posts the node's identity and its
//! volume deltas to the current master. The first pulse after a connect or
//! reconnect carries the full volume list. On error the worker rotates
//! through the configured masters with exponential backoff, capped at ten
//! pulses.

use crate::config::VolumeServerConfig;
use rand::Rng;
use silo_api::messages::HeartbeatResponse;
use silo_core::Store;
use silo_topology::Heartbeat;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Background task pulsing the masters.
pub struct HeartbeatWorker {
    store: Arc<Store>,
    url: String,
    public_url: String,
    data_center: String,
    rack: String,
    masters: Vec<String>,
    pulse: Duration,
    http: reqwest::Client,
}

impl HeartbeatWorker {
    /// Creates a worker from the server's configuration.
    pub fn new(store: Arc<Store>, config: &VolumeServerConfig) -> Self {
        Self {
            store,
            url: config.bind.clone(),
            public_url: config.public_url(),
            data_center: config.data_center.clone(),
            rack: config.rack.clone(),
            masters: config.masters.clone(),
            pulse: Duration::from_secs(config.pulse_secs),
            http: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Spawns the loop; abort the handle to stop it.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        info!(masters = ?self.masters, pulse_secs = self.pulse.as_secs(), "heartbeat worker started");
        let mut connected = false;
        let mut master_index = 0usize;
        let mut backoff = self.pulse / 4;

        loop {
            let beat = self.build_beat(!connected).await;
            let master = &self.masters[master_index % self.masters.len()];
            match self.send_beat(master, &beat).await {
                Ok(response) => {
                    if !connected {
                        info!(master = %master, "connected to master");
                        connected = true;
                    }
                    debug!(
                        master = %master,
                        volume_size_limit = response.volume_size_limit,
                        "heartbeat acknowledged"
                    );
                    backoff = self.pulse / 4;
                    // Spread the flock: pulse plus up to 10% jitter.
                    let jitter = rand::thread_rng().gen_range(0.0..0.1);
                    tokio::time::sleep(self.pulse.mul_f64(1.0 + jitter)).await;
                }
                Err(e) => {
                    if connected {
                        warn!(master = %master, error = %e, "lost master connection");
                    } else {
                        debug!(master = %master, error = %e, "master unreachable");
                    }
                    connected = false;
                    master_index = master_index.wrapping_add(1);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.pulse * 10);
                }
            }
        }
    }

    async fn build_beat(&self, full: bool) -> Heartbeat {
        let (current, max) = self.store.volume_counts().await;
        debug!(current, max, full, "building heartbeat");
        let mut beat = Heartbeat {
            url: self.url.clone(),
            public_url: self.public_url.clone(),
            data_center: self.data_center.clone(),
            rack: self.rack.clone(),
            max_volume_count: max,
            volumes: Vec::new(),
            new_volumes: Vec::new(),
            deleted_volumes: Vec::new(),
            is_full: full,
        };
        if full {
            // A reconnect resends everything; pending deltas are folded in.
            let _ = self.store.drain_deltas().await;
            beat.volumes = self.store.volume_infos().await;
        } else {
            let (new_volumes, deleted_volumes) = self.store.drain_deltas().await;
            beat.new_volumes = new_volumes;
            beat.deleted_volumes = deleted_volumes;
        }
        beat
    }

    async fn send_beat(
        &self,
        master: &str,
        beat: &Heartbeat,
    ) -> Result<HeartbeatResponse, String> {
        let url = format!("http://{}/cluster/heartbeat", master);
        let response = self
            .http
            .post(&url)
            .json(beat)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("heartbeat returned {}", response.status()));
        }
        response.json().await.map_err(|e| e.to_string())
    }
}
