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

//! HTTP implementation of the master's volume server client.

use crate::messages::{VacuumCheckResponse, VolumeCopyRequest};
use async_trait::async_trait;
use silo_core::{ReplicaPlacement, Ttl, VolumeId};
use silo_topology::{TopologyError, VacuumCheckReport, VolumeServerClient};
use std::time::Duration;

/// Drives volume servers over their admin HTTP surface.
pub struct HttpVolumeServerClient {
    http: reqwest::Client,
}

impl HttpVolumeServerClient {
    /// Creates a client with a bounded connect timeout, so a dead node
    /// cannot stall growth or vacuum for long.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpVolumeServerClient {
    fn default() -> Self {
        Self::new()
    }
}

fn client_err(context: &str, e: impl std::fmt::Display) -> TopologyError {
    TopologyError::Client(format!("{}: {}", context, e))
}

async fn expect_success(
    response: reqwest::Response,
    context: &str,
) -> Result<reqwest::Response, TopologyError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(TopologyError::Client(format!(
            "{} returned {}",
            context,
            response.status()
        )))
    }
}

#[async_trait]
impl VolumeServerClient for HttpVolumeServerClient {
    async fn allocate_volume(
        &self,
        node: &str,
        volume_id: VolumeId,
        collection: &str,
        replica_placement: ReplicaPlacement,
        ttl: Ttl,
    ) -> Result<(), TopologyError> {
        let url = format!(
            "http://{}/admin/assign_volume?volume={}&collection={}&replication={}&ttl={}",
            node, volume_id, collection, replica_placement, ttl
        );
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| client_err("assign_volume", e))?;
        expect_success(response, "assign_volume").await?;
        Ok(())
    }

    async fn delete_volume(&self, node: &str, volume_id: VolumeId) -> Result<(), TopologyError> {
        let url = format!("http://{}/admin/delete_volume?volume={}", node, volume_id);
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| client_err("delete_volume", e))?;
        expect_success(response, "delete_volume").await?;
        Ok(())
    }

    async fn vacuum_check(
        &self,
        node: &str,
        volume_id: VolumeId,
    ) -> Result<VacuumCheckReport, TopologyError> {
        let url = format!(
            "http://{}/admin/vacuum_volume_check?volume={}",
            node, volume_id
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| client_err("vacuum_check", e))?;
        let report: VacuumCheckResponse = expect_success(response, "vacuum_check")
            .await?
            .json()
            .await
            .map_err(|e| client_err("vacuum_check body", e))?;
        Ok(VacuumCheckReport {
            garbage_ratio: report.garbage_ratio,
            can_vacuum: report.can_vacuum,
        })
    }

    async fn vacuum_compact(&self, node: &str, volume_id: VolumeId) -> Result<(), TopologyError> {
        let url = format!(
            "http://{}/admin/vacuum_volume_compact?volume={}",
            node, volume_id
        );
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| client_err("vacuum_compact", e))?;
        expect_success(response, "vacuum_compact").await?;
        Ok(())
    }

    async fn vacuum_commit(&self, node: &str, volume_id: VolumeId) -> Result<(), TopologyError> {
        let url = format!(
            "http://{}/admin/vacuum_volume_commit?volume={}",
            node, volume_id
        );
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| client_err("vacuum_commit", e))?;
        expect_success(response, "vacuum_commit").await?;
        Ok(())
    }

    async fn replicate_volume(
        &self,
        node: &str,
        volume_id: VolumeId,
        source_node: &str,
    ) -> Result<(), TopologyError> {
        let url = format!("http://{}/admin/volume_copy", node);
        let response = self
            .http
            .post(&url)
            .json(&VolumeCopyRequest {
                volume_id,
                source_node: source_node.to_string(),
            })
            .send()
            .await
            .map_err(|e| client_err("volume_copy", e))?;
        expect_success(response, "volume_copy").await?;
        Ok(())
    }
}
