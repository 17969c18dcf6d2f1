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

//! Volume server HTTP integration tests.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use silo_api::{volume_server_router, Guard, VolumeServerState};
use silo_core::{Store, StoreOptions};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

async fn test_router(dir: &TempDir) -> Router {
    let store = Arc::new(
        Store::open(vec![(dir.path().to_path_buf(), 8)], StoreOptions::default())
            .await
            .expect("open store"),
    );
    let state = VolumeServerState::new(
        store,
        "127.0.0.1:8080".to_string(),
        "127.0.0.1:8080".to_string(),
        Vec::new(),
        Guard::default(),
    );
    volume_server_router(state)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.expect("request");
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn create_volume(router: &Router, vid: u32) {
    let (status, _) = send(
        router,
        Request::post(format!("/admin/assign_volume?volume={}", vid))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

const FID: &str = "2a12345678";

#[tokio::test]
async fn test_write_then_read_single_node() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir).await;
    create_volume(&router, 7).await;

    let (status, body) = send(
        &router,
        Request::post(format!("/7/{}/greet.txt", FID))
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("hello"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["size"], 5);
    assert!(body["eTag"].as_str().is_some());

    let response = router
        .clone()
        .oneshot(Request::get(format!("/7/{}", FID)).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/plain")
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.as_ref(), b"hello");
    assert_eq!(bytes.len(), 5);
}

#[tokio::test]
async fn test_wrong_cookie_and_missing_are_both_404() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir).await;
    create_volume(&router, 1).await;

    let (status, _) = send(
        &router,
        Request::post(format!("/1/{}", FID))
            .body(Body::from("payload"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Same needle id, different cookie.
    let (status, body) = send(
        &router,
        Request::get("/1/2a99999999").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not found");

    // Unknown needle id.
    let (status, _) = send(
        &router,
        Request::get("/1/ff12345678").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_then_read_is_404() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir).await;
    create_volume(&router, 2).await;

    send(
        &router,
        Request::post(format!("/2/{}", FID))
            .body(Body::from("doomed"))
            .unwrap(),
    )
    .await;

    let (status, body) = send(
        &router,
        Request::delete(format!("/2/{}", FID))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["size"], 11); // flags + data_size + "doomed"

    let (status, _) = send(
        &router,
        Request::get(format!("/2/{}", FID)).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ttl_expiry_returns_410_and_keeps_accounting() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir).await;
    create_volume(&router, 3).await;

    let (status, _) = send(
        &router,
        Request::post(format!("/3/{}?ttl=1s", FID))
            .body(Body::from("fleeting"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    tokio::time::sleep(std::time::Duration::from_millis(2100)).await;

    let (status, _) = send(
        &router,
        Request::get(format!("/3/{}", FID)).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);

    // Size accounting is untouched until a compaction runs.
    let (status, body) = send(
        &router,
        Request::get("/admin/volume_file_status?volume=3")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fileCount"], 1);
}

#[tokio::test]
async fn test_if_none_match_returns_304() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir).await;
    create_volume(&router, 4).await;

    let (_, body) = send(
        &router,
        Request::post(format!("/4/{}", FID))
            .body(Body::from("cached"))
            .unwrap(),
    )
    .await;
    let etag = body["eTag"].as_str().unwrap().to_string();

    let (status, _) = send(
        &router,
        Request::get(format!("/4/{}", FID))
            .header(header::IF_NONE_MATCH, format!("\"{}\"", etag))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_multipart_upload() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir).await;
    create_volume(&router, 5).await;

    let boundary = "silo-test-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"pic.bin\"\r\nContent-Type: image/png\r\n\r\nPNGDATA\r\n--{b}--\r\n",
        b = boundary
    );
    let (status, reply) = send(
        &router,
        Request::post(format!("/5/{}", FID))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply["size"], 7);

    let response = router
        .clone()
        .oneshot(Request::get(format!("/5/{}.png", FID)).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("image/png")
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.as_ref(), b"PNGDATA");
}

#[tokio::test]
async fn test_overwrite_compact_shrinks_volume() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir).await;
    create_volume(&router, 6).await;

    let big = vec![b'a'; 1000];
    let small = vec![b'b'; 500];
    send(
        &router,
        Request::post(format!("/6/{}", FID)).body(Body::from(big)).unwrap(),
    )
    .await;
    send(
        &router,
        Request::post(format!("/6/{}", FID)).body(Body::from(small)).unwrap(),
    )
    .await;

    let (_, before) = send(
        &router,
        Request::get("/admin/volume_file_status?volume=6")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let size_before = before["datFileSize"].as_u64().unwrap();

    let (status, check) = send(
        &router,
        Request::get("/admin/vacuum_volume_check?volume=6")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["canVacuum"], true);
    assert!(check["garbageRatio"].as_f64().unwrap() > 0.3);

    let (status, _) = send(
        &router,
        Request::post("/admin/vacuum_volume_compact?volume=6")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(
        &router,
        Request::post("/admin/vacuum_volume_commit?volume=6")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, after) = send(
        &router,
        Request::get("/admin/volume_file_status?volume=6")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let size_after = after["datFileSize"].as_u64().unwrap();
    assert!(size_before - size_after >= 1000);
    assert_eq!(after["compactionRevision"], 1);

    // The surviving overwrite still reads back.
    let response = router
        .clone()
        .oneshot(Request::get(format!("/6/{}", FID)).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.len(), 500);
}

#[tokio::test]
async fn test_copy_file_revision_mismatch_is_409() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir).await;
    create_volume(&router, 8).await;

    let (status, _) = send(
        &router,
        Request::get("/admin/copy_file?volume=8&kind=dat&revision=3&stopOffset=8")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Matching revision streams the superblock.
    let response = router
        .clone()
        .oneshot(
            Request::get("/admin/copy_file?volume=8&kind=dat&revision=0&stopOffset=8")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.len(), 8);
}

#[tokio::test]
async fn test_freeze_volume_rejects_writes() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir).await;
    create_volume(&router, 9).await;

    let (status, _) = send(
        &router,
        Request::post("/admin/freeze_volume?volume=9")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &router,
        Request::post(format!("/9/{}", FID))
            .body(Body::from("rejected"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_delete_collection_and_stats() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir).await;

    let (status, _) = send(
        &router,
        Request::post("/admin/assign_volume?volume=11&collection=photos")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &router,
        Request::post("/admin/delete_collection?collection=photos")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted_volumes"], 1);

    let (status, body) = send(&router, Request::get("/stats/disk").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disks"][0]["volume_count"], 0);

    let (status, body) = send(
        &router,
        Request::get("/stats/counter").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["writes"], 0);
}
