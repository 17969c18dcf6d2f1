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

//! Admin request guard: source-IP whitelist and/or JWT.
//!
//! With neither configured the guard is open (single-machine and test
//! setups). With both configured, passing either one admits the request.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Who may call the admin endpoints.
#[derive(Default)]
pub struct Guard {
    whitelist: Vec<IpAddr>,
    jwt_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[allow(dead_code)]
    exp: usize,
}

impl Guard {
    /// Creates a guard. An empty whitelist and no secret means open access.
    pub fn new(whitelist: Vec<IpAddr>, jwt_secret: Option<String>) -> Self {
        Self {
            whitelist,
            jwt_secret,
        }
    }

    /// Whether the guard performs any checks at all.
    pub fn is_open(&self) -> bool {
        self.whitelist.is_empty() && self.jwt_secret.is_none()
    }

    /// Decides a request from `peer` carrying `authorization`.
    pub fn allows(&self, peer: Option<IpAddr>, authorization: Option<&str>) -> bool {
        if self.is_open() {
            return true;
        }
        if let Some(ip) = peer {
            if self.whitelist.contains(&ip) || ip.is_loopback() && !self.whitelist.is_empty() {
                return true;
            }
        }
        if let (Some(secret), Some(header)) = (&self.jwt_secret, authorization) {
            if let Some(token) = header.strip_prefix("Bearer ") {
                let validation = Validation::new(Algorithm::HS256);
                return decode::<Claims>(
                    token,
                    &DecodingKey::from_secret(secret.as_bytes()),
                    &validation,
                )
                .is_ok();
            }
        }
        false
    }
}

/// Axum middleware enforcing the guard on admin routes.
pub async fn guard_middleware(
    State(guard): State<Arc<Guard>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    if guard.allows(peer, authorization.as_deref()) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "unauthorized" })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    #[test]
    fn test_open_guard_allows_everything() {
        let guard = Guard::default();
        assert!(guard.allows(None, None));
        assert!(guard.allows(Some("10.0.0.1".parse().unwrap()), None));
    }

    #[test]
    fn test_whitelist() {
        let guard = Guard::new(vec!["10.0.0.1".parse().unwrap()], None);
        assert!(guard.allows(Some("10.0.0.1".parse().unwrap()), None));
        assert!(!guard.allows(Some("10.0.0.2".parse().unwrap()), None));
        assert!(!guard.allows(None, None));
        // Loopback is always trusted once a whitelist exists.
        assert!(guard.allows(Some("127.0.0.1".parse().unwrap()), None));
    }

    #[test]
    fn test_jwt() {
        let guard = Guard::new(Vec::new(), Some("secret".to_string()));
        let exp = (chrono_like_now() + 3600) as usize;
        let token = encode(
            &Header::default(),
            &json!({ "exp": exp }),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(guard.allows(None, Some(&format!("Bearer {}", token))));
        assert!(!guard.allows(None, Some("Bearer not-a-token")));
        assert!(!guard.allows(None, None));

        let wrong = encode(
            &Header::default(),
            &json!({ "exp": exp }),
            &EncodingKey::from_secret(b"other"),
        )
        .unwrap();
        assert!(!guard.allows(None, Some(&format!("Bearer {}", wrong))));
    }

    fn chrono_like_now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }
}
