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

//! HTTP error mapping.
//!
//! Storage and topology errors map onto fixed status codes; the body is
//! always `{"error": "..."}`. A cookie mismatch is deliberately a plain
//! 404 so that probing never reveals a needle's existence.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use silo_core::StorageError;
use silo_topology::TopologyError;
use thiserror::Error;

/// Any error an API handler can return.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Storage engine error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Master topology error.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// A replica write failed; the whole append fails and the client
    /// should retry with a fresh assignment.
    #[error("Replication failed: {0}")]
    ReplicaFailure(String),

    /// The request itself is malformed.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Storage(e) => match e {
                StorageError::VolumeNotFound { .. }
                | StorageError::NeedleNotFound { .. }
                | StorageError::CookieMismatch
                | StorageError::InvalidFileId(_) => StatusCode::NOT_FOUND,
                StorageError::Expired => StatusCode::GONE,
                StorageError::ReadOnlyVolume { .. }
                | StorageError::VolumeFull { .. }
                | StorageError::CompactionInProgress { .. }
                | StorageError::NoPendingCompaction { .. }
                | StorageError::CompactionRevisionMismatch { .. } => StatusCode::CONFLICT,
                StorageError::NoFreeSpace => StatusCode::INSUFFICIENT_STORAGE,
                StorageError::InvalidReplicaPlacement(_) | StorageError::InvalidTtl(_) => {
                    StatusCode::BAD_REQUEST
                }
                StorageError::CorruptNeedle { .. }
                | StorageError::ShortRead { .. }
                | StorageError::Io(_)
                | StorageError::NeedleMap(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Topology(e) => match e {
                TopologyError::NoWritableVolume { .. } | TopologyError::NoFreeSpace(_) => {
                    StatusCode::NOT_ACCEPTABLE
                }
                TopologyError::UnknownVolume(_) | TopologyError::UnknownNode(_) => {
                    StatusCode::NOT_FOUND
                }
                TopologyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                TopologyError::Client(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::ReplicaFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // 404s carry no detail at all; everything else explains itself.
        let message = if status == StatusCode::NOT_FOUND {
            "not found".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_mismatch_is_plain_404() {
        let err = ApiError::Storage(StorageError::CookieMismatch);
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let missing = ApiError::Storage(StorageError::NeedleNotFound { needle_id: 5 });
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_expired_is_410() {
        assert_eq!(
            ApiError::Storage(StorageError::Expired).status(),
            StatusCode::GONE
        );
    }

    #[test]
    fn test_retriable_write_errors_are_409() {
        assert_eq!(
            ApiError::Storage(StorageError::ReadOnlyVolume { volume_id: 1 }).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Storage(StorageError::VolumeFull { volume_id: 1 }).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_assign_exhaustion_is_406() {
        assert_eq!(
            ApiError::Topology(TopologyError::NoWritableVolume {
                collection: String::new()
            })
            .status(),
            StatusCode::NOT_ACCEPTABLE
        );
    }
}
