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

//! Master HTTP integration tests, with a mock volume server client behind
//! the growth path.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use silo_api::{master_router, Guard, MasterState};
use silo_core::{FileId, ReplicaPlacement, Ttl, VolumeId};
use silo_topology::{
    Assigner, Topology, TopologyError, VacuumCheckReport, VolumeGrowth, VolumeServerClient,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Pretends every admin call against a volume server succeeds.
#[derive(Default)]
struct OkClient {
    allocated: Mutex<Vec<(String, VolumeId)>>,
}

#[async_trait]
impl VolumeServerClient for OkClient {
    async fn allocate_volume(
        &self,
        node: &str,
        volume_id: VolumeId,
        _collection: &str,
        _replica_placement: ReplicaPlacement,
        _ttl: Ttl,
    ) -> Result<(), TopologyError> {
        self.allocated
            .lock()
            .unwrap()
            .push((node.to_string(), volume_id));
        Ok(())
    }

    async fn delete_volume(&self, _node: &str, _volume_id: VolumeId) -> Result<(), TopologyError> {
        Ok(())
    }

    async fn vacuum_check(
        &self,
        _node: &str,
        _volume_id: VolumeId,
    ) -> Result<VacuumCheckReport, TopologyError> {
        Ok(VacuumCheckReport {
            garbage_ratio: 0.0,
            can_vacuum: true,
        })
    }

    async fn vacuum_compact(&self, _node: &str, _volume_id: VolumeId) -> Result<(), TopologyError> {
        Ok(())
    }

    async fn vacuum_commit(&self, _node: &str, _volume_id: VolumeId) -> Result<(), TopologyError> {
        Ok(())
    }

    async fn replicate_volume(
        &self,
        _node: &str,
        _volume_id: VolumeId,
        _source_node: &str,
    ) -> Result<(), TopologyError> {
        Ok(())
    }
}

fn master(topology: Arc<Topology>, client: Arc<OkClient>) -> Router {
    let assigner = Arc::new(Assigner::new(
        topology.clone(),
        ReplicaPlacement::default(),
        7,
    ));
    let growth = Arc::new(VolumeGrowth::new(topology.clone(), client));
    master_router(MasterState::new(topology, assigner, growth, Guard::default()))
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.expect("request");
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn heartbeat_body(url: &str, dc: &str, max: usize, volumes: Value) -> Body {
    Body::from(
        json!({
            "url": url,
            "public_url": url,
            "data_center": dc,
            "rack": "r1",
            "max_volume_count": max,
            "volumes": volumes,
            "is_full": true,
        })
        .to_string(),
    )
}

async fn pulse(router: &Router, url: &str, dc: &str, max: usize, volumes: Value) {
    let (status, _) = send(
        router,
        Request::post("/cluster/heartbeat")
            .header("content-type", "application/json")
            .body(heartbeat_body(url, dc, max, volumes))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

fn volume_json(id: u32) -> Value {
    json!({
        "id": id,
        "collection": "",
        "replica_placement": "000",
        "ttl": "",
        "size": 8,
        "file_count": 0,
        "deleted_count": 0,
        "deleted_bytes": 0,
        "read_only": false,
        "compaction_revision": 0,
        "last_modified": 0,
    })
}

#[tokio::test]
async fn test_heartbeat_then_lookup() {
    let topology = Arc::new(Topology::new(1 << 30));
    let router = master(topology, Arc::new(OkClient::default()));

    pulse(&router, "vs1:8080", "dc1", 8, json!([volume_json(3)])).await;

    let (status, body) = send(
        &router,
        Request::get("/dir/lookup?volumeId=3").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["volumeId"], 3);
    assert_eq!(body["locations"][0]["url"], "vs1:8080");

    let (status, _) = send(
        &router,
        Request::get("/dir/lookup?volumeId=99").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_assign_from_existing_volume() {
    let topology = Arc::new(Topology::new(1 << 30));
    let router = master(topology, Arc::new(OkClient::default()));
    pulse(&router, "vs1:8080", "dc1", 8, json!([volume_json(3)])).await;

    let (status, body) = send(
        &router,
        Request::get("/dir/assign").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let fid: FileId = body["fid"].as_str().unwrap().parse().expect("fid parses");
    assert_eq!(fid.volume_id, 3);
    assert_eq!(body["publicUrl"], "vs1:8080");
}

#[tokio::test]
async fn test_assign_on_empty_cluster_grows_first() {
    let topology = Arc::new(Topology::new(1 << 30));
    let client = Arc::new(OkClient::default());
    let router = master(topology.clone(), client.clone());

    // A node with free slots but zero volumes.
    pulse(&router, "vs1:8080", "dc1", 20, json!([])).await;

    let (status, body) = send(
        &router,
        Request::get("/dir/assign").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "assign must grow then succeed: {body}");
    assert!(!client.allocated.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_assigns_no_duplicate_volume_ids() {
    let topology = Arc::new(Topology::new(1 << 30));
    let client = Arc::new(OkClient::default());
    let router = master(topology.clone(), client.clone());
    pulse(&router, "vs1:8080", "dc1", 100, json!([])).await;

    let mut handles = Vec::new();
    for _ in 0..100 {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            let (status, body) = send(
                &router,
                Request::get("/dir/assign").body(Body::empty()).unwrap(),
            )
            .await;
            assert_eq!(status, StatusCode::OK, "{body}");
            body["fid"].as_str().unwrap().to_string()
        }));
    }
    let mut fids = HashSet::new();
    for handle in handles {
        assert!(fids.insert(handle.await.unwrap()), "duplicate fid");
    }

    // One growth batch of single-copy volumes, no duplicate volume ids.
    let allocated = client.allocated.lock().unwrap();
    let vids: HashSet<_> = allocated.iter().map(|(_, v)| *v).collect();
    assert_eq!(vids.len(), allocated.len(), "duplicate volume id allocated");
    assert_eq!(allocated.len(), VolumeGrowth::target_count(1));
}

#[tokio::test]
async fn test_assign_dc_fallback_reports_actual_dc() {
    let topology = Arc::new(Topology::new(1 << 30));
    let router = master(topology, Arc::new(OkClient::default()));
    // dc1 is full (no free slots, no volumes); dc2 has a writable volume.
    pulse(&router, "vs1:8080", "dc1", 0, json!([])).await;
    pulse(&router, "vs2:8080", "dc2", 8, json!([volume_json(5)])).await;

    let (status, body) = send(
        &router,
        Request::get("/dir/assign?dataCenter=dc1").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["dataCenter"], "dc2");
    let fid: FileId = body["fid"].as_str().unwrap().parse().unwrap();
    assert!(fid.volume_id >= 1);
}

#[tokio::test]
async fn test_watch_sees_heartbeat_updates() {
    let topology = Arc::new(Topology::new(1 << 30));
    let router = master(topology, Arc::new(OkClient::default()));

    let watcher = {
        let router = router.clone();
        tokio::spawn(async move {
            send(
                &router,
                Request::get("/cluster/watch?timeoutSecs=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
        })
    };
    // Give the watcher time to subscribe before the update fires.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    pulse(&router, "vs1:8080", "dc1", 8, json!([volume_json(4)])).await;

    let (status, body) = watcher.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updates"][0]["url"], "vs1:8080");
    assert_eq!(body["updates"][0]["newVids"][0], 4);
}

#[tokio::test]
async fn test_listings_and_status() {
    let topology = Arc::new(Topology::new(1 << 30));
    let router = master(topology, Arc::new(OkClient::default()));
    pulse(&router, "vs1:8080", "dc1", 8, json!([volume_json(1)])).await;

    let (status, body) = send(&router, Request::get("/vol/list").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nodes"][0]["url"], "vs1:8080");
    assert_eq!(body["max_volume_id"], 1);

    let (status, body) = send(&router, Request::get("/col/list").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["collections"][0], "");

    let (status, body) = send(&router, Request::get("/status").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["volumeSizeLimit"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_grow_endpoint() {
    let topology = Arc::new(Topology::new(1 << 30));
    let client = Arc::new(OkClient::default());
    let router = master(topology, client.clone());
    pulse(&router, "vs1:8080", "dc1", 10, json!([])).await;

    let (status, body) = send(
        &router,
        Request::post("/vol/grow?count=2").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["grown"], 2);
    assert_eq!(client.allocated.lock().unwrap().len(), 2);
}
