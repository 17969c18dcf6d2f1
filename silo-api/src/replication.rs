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

//! Replica location lookup and synchronous write fan-out.
//!
//! A receiving volume server learns its peer replicas from the master's
//! `/dir/lookup` (briefly cached) and re-plays the write to each of them
//! with `?type=replicate`, which stops further fan-out. Any replica failure
//! fails the whole write; there is no quorum.

use crate::errors::ApiError;
use crate::messages::LookupResponse;
use bytes::Bytes;
use silo_core::VolumeId;
use silo_topology::VolumeLocation;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

const LOCATION_CACHE_TTL: Duration = Duration::from_secs(10);

/// Looks up and caches volume replica locations from the masters.
pub struct PeerLookup {
    http: reqwest::Client,
    masters: Vec<String>,
    cache: RwLock<HashMap<VolumeId, (Instant, Vec<VolumeLocation>)>>,
}

impl PeerLookup {
    /// Creates a lookup over the configured master addresses.
    pub fn new(http: reqwest::Client, masters: Vec<String>) -> Self {
        Self {
            http,
            masters,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Every replica location of `volume_id`, from cache or a master.
    pub async fn locations(&self, volume_id: VolumeId) -> Result<Vec<VolumeLocation>, ApiError> {
        {
            let cache = self.cache.read().await;
            if let Some((at, locations)) = cache.get(&volume_id) {
                if at.elapsed() < LOCATION_CACHE_TTL {
                    return Ok(locations.clone());
                }
            }
        }
        let mut last_err = String::from("no masters configured");
        for master in &self.masters {
            let url = format!("http://{}/dir/lookup?volumeId={}", master, volume_id);
            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    match response.json::<LookupResponse>().await {
                        Ok(found) => {
                            self.cache
                                .write()
                                .await
                                .insert(volume_id, (Instant::now(), found.locations.clone()));
                            return Ok(found.locations);
                        }
                        Err(e) => last_err = e.to_string(),
                    }
                }
                Ok(response) => last_err = format!("lookup returned {}", response.status()),
                Err(e) => last_err = e.to_string(),
            }
        }
        Err(ApiError::ReplicaFailure(format!(
            "cannot resolve replicas of volume {}: {}",
            volume_id, last_err
        )))
    }

    /// Drops a cached entry (after a failed replica write).
    pub async fn invalidate(&self, volume_id: VolumeId) {
        self.cache.write().await.remove(&volume_id);
    }
}

/// A write to fan out to peer replicas.
pub struct ReplicatedWrite<'a> {
    /// The volume written.
    pub volume_id: VolumeId,
    /// The fid path segment, `<needle_id_hex><cookie_hex>`.
    pub fid: &'a str,
    /// Optional file name path segment.
    pub filename: Option<&'a str>,
    /// Raw body to replay (empty for deletes).
    pub body: Bytes,
    /// Content type to forward.
    pub content_type: Option<&'a str>,
    /// `ts` query parameter to forward.
    pub ts: Option<u64>,
    /// `ttl` query parameter to forward.
    pub ttl: Option<&'a str>,
    /// True for a delete, false for an upload.
    pub delete: bool,
}

/// Synchronously replays a write on every peer replica.
///
/// `self_urls` filters this server out of the peer list. The first failed
/// peer fails the call.
pub async fn replicate_to_peers(
    peers: &PeerLookup,
    http: &reqwest::Client,
    self_urls: &[&str],
    write: ReplicatedWrite<'_>,
) -> Result<(), ApiError> {
    let locations = peers.locations(write.volume_id).await?;
    let targets: Vec<&VolumeLocation> = locations
        .iter()
        .filter(|l| !self_urls.contains(&l.url.as_str()) && !self_urls.contains(&l.public_url.as_str()))
        .collect();

    for target in targets {
        let mut url = format!("http://{}/{}/{}", target.url, write.volume_id, write.fid);
        if let Some(name) = write.filename {
            url.push('/');
            url.push_str(name);
        }
        let mut query: Vec<(String, String)> = vec![("type".into(), "replicate".into())];
        if let Some(ts) = write.ts {
            query.push(("ts".into(), ts.to_string()));
        }
        if let Some(ttl) = write.ttl {
            query.push(("ttl".into(), ttl.to_string()));
        }

        let request = if write.delete {
            http.delete(&url)
        } else {
            let mut r = http.put(&url).body(write.body.clone());
            if let Some(ct) = write.content_type {
                r = r.header(reqwest::header::CONTENT_TYPE, ct);
            }
            r
        };

        let response = request.query(&query).send().await.map_err(|e| {
            warn!(volume_id = write.volume_id, peer = %target.url, error = %e, "replica write failed");
            ApiError::ReplicaFailure(format!("peer {}: {}", target.url, e))
        })?;
        if !response.status().is_success() {
            warn!(
                volume_id = write.volume_id,
                peer = %target.url,
                status = %response.status(),
                "replica write rejected"
            );
            peers.invalidate(write.volume_id).await;
            return Err(ApiError::ReplicaFailure(format!(
                "peer {} returned {}",
                target.url,
                response.status()
            )));
        }
    }
    Ok(())
}
