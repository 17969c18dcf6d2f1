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

//! Replica repair over real sockets: a node pulls a volume's files from a
//! peer via `volume_copy` and serves identical content afterwards.

use serde_json::json;
use silo_api::{volume_server_router, Guard, VolumeServerState};
use silo_core::{Store, StoreOptions};
use std::sync::Arc;
use tempfile::TempDir;

async fn spawn_server(dir: &TempDir) -> (String, Arc<Store>) {
    let store = Arc::new(
        Store::open(vec![(dir.path().to_path_buf(), 8)], StoreOptions::default())
            .await
            .expect("open store"),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr").to_string();
    let state = VolumeServerState::new(
        store.clone(),
        addr.clone(),
        addr.clone(),
        Vec::new(),
        Guard::default(),
    );
    let router = volume_server_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    (addr, store)
}

#[tokio::test]
async fn test_volume_copy_repairs_replica() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let (addr_a, store_a) = spawn_server(&dir_a).await;
    let (addr_b, store_b) = spawn_server(&dir_b).await;
    let http = reqwest::Client::new();

    // Build a volume on A with ten needles and one deletion.
    let response = http
        .post(format!("http://{}/admin/assign_volume?volume=7", addr_a))
        .send()
        .await
        .expect("assign volume");
    assert!(response.status().is_success());
    for i in 0..10 {
        let response = http
            .put(format!("http://{}/7/{:x}0000000{:x}", addr_a, i + 16, i))
            .body(format!("needle-number-{}", i))
            .send()
            .await
            .expect("upload");
        assert!(response.status().is_success(), "upload {}", i);
    }
    let response = http
        .delete(format!("http://{}/7/{:x}00000000", addr_a, 16))
        .send()
        .await
        .expect("delete");
    assert!(response.status().is_success());

    // B pulls the volume from A.
    let response = http
        .post(format!("http://{}/admin/volume_copy", addr_b))
        .json(&json!({ "volumeId": 7, "sourceNode": addr_a }))
        .send()
        .await
        .expect("volume_copy");
    assert!(
        response.status().is_success(),
        "volume_copy: {:?}",
        response.text().await
    );

    // Same sizes on both sides.
    let a = store_a.get_volume(7).await.expect("volume on A");
    let b = store_b.get_volume(7).await.expect("volume on B");
    let (a, b) = (a.read().await, b.read().await);
    assert_eq!(a.dat_size(), b.dat_size());
    assert_eq!(a.idx_size(), b.idx_size());
    assert_eq!(a.info().file_count, b.info().file_count);
    drop((a, b));

    // And identical reads, including the tombstone.
    let response = http
        .get(format!("http://{}/7/{:x}00000003", addr_b, 19))
        .send()
        .await
        .expect("read from B");
    assert!(response.status().is_success());
    assert_eq!(
        response.bytes().await.expect("body").as_ref(),
        b"needle-number-3"
    );
    let response = http
        .get(format!("http://{}/7/{:x}00000000", addr_b, 16))
        .send()
        .await
        .expect("read deleted from B");
    assert_eq!(response.status().as_u16(), 404);
}
