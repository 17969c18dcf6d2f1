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

//! The vacuum coordinator: drive online compaction across replicas.
//!
//! Three phases per volume: every replica is asked whether it can compact
//! (`check`), all replicas build their side files in parallel (`compact`),
//! then the swaps are committed one by one (`commit`).
//!
//! Commit is the partial-failure window: once the first commit lands, a
//! later failure leaves replicas on different generations. The remaining
//! commits are aborted and [`CommitFailurePolicy`] decides the repair
//! direction — roll the stragglers forward from a committed replica, or
//! roll the committed ones back from a surviving uncommitted replica.
//! Either way the repair is a whole-volume copy.

use crate::client::VolumeServerClient;
use crate::error::TopologyError;
use crate::topology::{Topology, VacuumCandidate};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

/// What to do when a vacuum commit fails on some replicas after succeeding
/// on others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitFailurePolicy {
    /// Re-copy the compacted volume onto the replicas that failed to
    /// commit. The compaction wins.
    #[default]
    RollForward,
    /// Re-copy an uncommitted replica onto the ones that committed. The
    /// compaction is discarded.
    RollBack,
}

/// Counters from one coordinator pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VacuumStats {
    /// Volumes whose garbage ratio crossed the threshold.
    pub candidates: usize,
    /// Volumes compacted and committed on every replica.
    pub committed: usize,
    /// Volumes skipped because a replica declined the check.
    pub declined: usize,
    /// Volumes that hit an error in compact or commit.
    pub failed: usize,
    /// Replicas repaired after a partial commit.
    pub repaired: usize,
}

/// Drives compaction across the cluster.
pub struct VacuumCoordinator {
    topology: Arc<Topology>,
    client: Arc<dyn VolumeServerClient>,
    garbage_threshold: f64,
    policy: CommitFailurePolicy,
}

impl VacuumCoordinator {
    /// Creates a coordinator. `garbage_threshold` is the deleted-bytes
    /// fraction (default 0.3 in the server) above which a volume is
    /// vacuumed.
    pub fn new(
        topology: Arc<Topology>,
        client: Arc<dyn VolumeServerClient>,
        garbage_threshold: f64,
        policy: CommitFailurePolicy,
    ) -> Self {
        Self {
            topology,
            client,
            garbage_threshold,
            policy,
        }
    }

    /// One full scan-and-vacuum pass over the cluster.
    pub async fn run_once(&self) -> VacuumStats {
        let mut stats = VacuumStats::default();
        let candidates = self.topology.vacuum_candidates(self.garbage_threshold).await;
        stats.candidates = candidates.len();
        for candidate in candidates {
            self.vacuum_volume(&candidate, &mut stats).await;
        }
        stats
    }

    async fn vacuum_volume(&self, candidate: &VacuumCandidate, stats: &mut VacuumStats) {
        let vid = candidate.volume_id;
        info!(
            volume_id = vid,
            garbage_ratio = candidate.garbage_ratio,
            replicas = candidate.nodes.len(),
            "vacuuming volume"
        );

        // The volume takes no new writes while its replicas compact.
        self.topology.suspend_writable(&candidate.key, vid).await;
        let restore = || async {
            self.topology.restore_writable(&candidate.key, vid).await;
        };

        // Phase 1: every replica must agree.
        for node in &candidate.nodes {
            match self.client.vacuum_check(node, vid).await {
                Ok(report) if report.can_vacuum => {}
                Ok(_) => {
                    info!(volume_id = vid, node = %node, "replica declined vacuum");
                    stats.declined += 1;
                    restore().await;
                    return;
                }
                Err(e) => {
                    warn!(volume_id = vid, node = %node, error = %e, "vacuum check failed");
                    stats.failed += 1;
                    restore().await;
                    return;
                }
            }
        }

        // Phase 2: compact all replicas in parallel.
        let compacts = join_all(
            candidate
                .nodes
                .iter()
                .map(|node| self.client.vacuum_compact(node, vid)),
        )
        .await;
        if let Some(err) = compacts.into_iter().find_map(Result::err) {
            warn!(volume_id = vid, error = %err, "vacuum compact failed, aborting");
            stats.failed += 1;
            restore().await;
            return;
        }

        // Phase 3: commit one by one; stop at the first failure.
        let mut committed: Vec<&String> = Vec::new();
        let mut uncommitted: Vec<&String> = Vec::new();
        let mut commit_err = None;
        for node in &candidate.nodes {
            if commit_err.is_some() {
                uncommitted.push(node);
                continue;
            }
            match self.client.vacuum_commit(node, vid).await {
                Ok(()) => committed.push(node),
                Err(e) => {
                    warn!(volume_id = vid, node = %node, error = %e, "vacuum commit failed");
                    commit_err = Some(e);
                    uncommitted.push(node);
                }
            }
        }

        match commit_err {
            None => {
                stats.committed += 1;
            }
            Some(_) if committed.is_empty() => {
                // Nothing committed: the volume is simply unchanged.
                stats.failed += 1;
            }
            Some(_) => {
                stats.failed += 1;
                stats.repaired += self.repair(vid, &committed, &uncommitted).await;
            }
        }
        restore().await;
    }

    /// Re-replicates whole volumes to converge a partial commit, per the
    /// configured policy.
    async fn repair(&self, vid: u32, committed: &[&String], uncommitted: &[&String]) -> usize {
        let (targets, source) = match self.policy {
            CommitFailurePolicy::RollForward => (uncommitted, committed.first()),
            CommitFailurePolicy::RollBack => (committed, uncommitted.first()),
        };
        let Some(source) = source else {
            return 0;
        };
        let mut repaired = 0;
        for target in targets {
            match self
                .client
                .replicate_volume(target, vid, source.as_str())
                .await
            {
                Ok(()) => {
                    info!(volume_id = vid, node = %target, source = %source, "replica repaired");
                    repaired += 1;
                }
                Err(e) => {
                    warn!(volume_id = vid, node = %target, error = %e, "replica repair failed");
                }
            }
        }
        repaired
    }
}
