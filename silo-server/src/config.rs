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

//! Configuration for the master and volume server roles.
//!
//! Everything is environment-driven with sensible defaults. `SILO_DIR`
//! takes `path:max_volumes` pairs separated by commas, e.g.
//! `/data/a:8,/data/b:8`.

use silo_core::volume::{FsyncPolicy, MapKind};
use silo_topology::CommitFailurePolicy;
use std::net::IpAddr;
use std::path::PathBuf;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

/// Parses `path:max,path:max` into disk locations.
pub fn parse_dirs(spec: &str) -> Result<Vec<(PathBuf, usize)>, String> {
    let mut dirs = Vec::new();
    for part in spec.split(',').filter(|p| !p.is_empty()) {
        match part.rsplit_once(':') {
            Some((path, max)) => {
                let max: usize = max
                    .parse()
                    .map_err(|_| format!("bad max volume count in '{}'", part))?;
                dirs.push((PathBuf::from(path), max));
            }
            None => dirs.push((PathBuf::from(part), 7)),
        }
    }
    if dirs.is_empty() {
        return Err("no data directories configured".to_string());
    }
    Ok(dirs)
}

fn parse_whitelist(spec: &str) -> Vec<IpAddr> {
    spec.split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

/// Master role configuration.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Bind address.
    pub bind: String,
    /// Bytes at which a volume stops taking assignments.
    pub volume_size_limit_mb: u64,
    /// Default replica placement for assignments without one.
    pub default_replication: String,
    /// Writable volumes per layout below which growth triggers.
    pub growth_threshold: usize,
    /// Garbage ratio at which a volume is vacuumed.
    pub garbage_threshold: f64,
    /// Seconds between vacuum scans.
    pub vacuum_interval_secs: u64,
    /// Expected heartbeat interval of volume servers.
    pub pulse_secs: u64,
    /// Pulses a node may miss before its volumes are dropped.
    pub stale_after_pulses: u32,
    /// Repair direction after a partial vacuum commit.
    pub commit_failure_policy: CommitFailurePolicy,
    /// Admin source-IP whitelist.
    pub ip_whitelist: Vec<IpAddr>,
    /// Admin JWT secret.
    pub jwt_secret: Option<String>,
    /// Whether to install the Prometheus recorder.
    pub metrics_enabled: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        let policy = match env_or("SILO_COMMIT_FAILURE_POLICY", "roll_forward").as_str() {
            "roll_back" => CommitFailurePolicy::RollBack,
            _ => CommitFailurePolicy::RollForward,
        };
        Self {
            bind: env_or("SILO_MASTER_BIND", "127.0.0.1:9333"),
            volume_size_limit_mb: env_parse("SILO_VOLUME_SIZE_LIMIT_MB", 30 * 1024),
            default_replication: env_or("SILO_DEFAULT_REPLICATION", "000"),
            growth_threshold: env_parse("SILO_GROWTH_THRESHOLD", 7),
            garbage_threshold: env_parse("SILO_GARBAGE_THRESHOLD", 0.3),
            vacuum_interval_secs: env_parse("SILO_VACUUM_INTERVAL_SECONDS", 900),
            pulse_secs: env_parse("SILO_PULSE_SECONDS", 5),
            stale_after_pulses: env_parse("SILO_STALE_AFTER_PULSES", 5),
            commit_failure_policy: policy,
            ip_whitelist: parse_whitelist(&env_or("SILO_IP_WHITELIST", "")),
            jwt_secret: std::env::var("SILO_JWT_SECRET").ok(),
            metrics_enabled: env_bool("SILO_METRICS_ENABLED", true),
        }
    }
}

impl MasterConfig {
    /// Validates cross-field constraints.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.garbage_threshold) {
            return Err(format!(
                "SILO_GARBAGE_THRESHOLD must be in [0,1], got {}",
                self.garbage_threshold
            ));
        }
        self.default_replication
            .parse::<silo_core::ReplicaPlacement>()
            .map_err(|_| format!("bad SILO_DEFAULT_REPLICATION '{}'", self.default_replication))?;
        if self.pulse_secs == 0 {
            return Err("SILO_PULSE_SECONDS must be positive".to_string());
        }
        Ok(())
    }

    /// The volume size limit in bytes.
    pub fn volume_size_limit(&self) -> u64 {
        self.volume_size_limit_mb * 1024 * 1024
    }
}

/// Volume server role configuration.
#[derive(Debug, Clone)]
pub struct VolumeServerConfig {
    /// Bind address; doubles as the node identity unless overridden.
    pub bind: String,
    /// Client-facing URL (defaults to `bind`).
    pub public_url: Option<String>,
    /// Master addresses to heartbeat against.
    pub masters: Vec<String>,
    /// Disk locations with their volume slot counts.
    pub dirs: Vec<(PathBuf, usize)>,
    /// Data center this node lives in.
    pub data_center: String,
    /// Rack within the data center.
    pub rack: String,
    /// Heartbeat interval in seconds.
    pub pulse_secs: u64,
    /// fsync every append.
    pub fsync: bool,
    /// Needle map implementation.
    pub map_kind: MapKind,
    /// Admin source-IP whitelist.
    pub ip_whitelist: Vec<IpAddr>,
    /// Admin JWT secret.
    pub jwt_secret: Option<String>,
    /// Whether to install the Prometheus recorder.
    pub metrics_enabled: bool,
}

impl Default for VolumeServerConfig {
    fn default() -> Self {
        let map_kind = match env_or("SILO_NEEDLE_MAP", "memory").as_str() {
            "redb" => MapKind::Redb,
            _ => MapKind::Memory,
        };
        let dirs = parse_dirs(&env_or("SILO_DIR", "./silo-data:7")).unwrap_or_default();
        Self {
            bind: env_or("SILO_VOLUME_BIND", "127.0.0.1:8080"),
            public_url: std::env::var("SILO_PUBLIC_URL").ok(),
            masters: env_or("SILO_MASTERS", "127.0.0.1:9333")
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            dirs,
            data_center: env_or("SILO_DATA_CENTER", "DefaultDataCenter"),
            rack: env_or("SILO_RACK", "DefaultRack"),
            pulse_secs: env_parse("SILO_PULSE_SECONDS", 5),
            fsync: env_bool("SILO_FSYNC", true),
            map_kind,
            ip_whitelist: parse_whitelist(&env_or("SILO_IP_WHITELIST", "")),
            jwt_secret: std::env::var("SILO_JWT_SECRET").ok(),
            metrics_enabled: env_bool("SILO_METRICS_ENABLED", true),
        }
    }
}

impl VolumeServerConfig {
    /// Validates cross-field constraints.
    pub fn validate(&self) -> Result<(), String> {
        if self.dirs.is_empty() {
            return Err("SILO_DIR must name at least one data directory".to_string());
        }
        if self.masters.is_empty() {
            return Err("SILO_MASTERS must name at least one master".to_string());
        }
        if self.pulse_secs == 0 {
            return Err("SILO_PULSE_SECONDS must be positive".to_string());
        }
        Ok(())
    }

    /// The client-facing URL.
    pub fn public_url(&self) -> String {
        self.public_url.clone().unwrap_or_else(|| self.bind.clone())
    }

    /// The append durability policy.
    pub fn fsync_policy(&self) -> FsyncPolicy {
        if self.fsync {
            FsyncPolicy::Always
        } else {
            FsyncPolicy::Never
        }
    }
}
