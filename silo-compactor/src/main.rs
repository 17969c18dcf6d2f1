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

//! Force a compaction of one volume, without a running server.
//!
//! Method 0 freezes the volume for the copy; method 1 uses the online path
//! (equivalent here, since nothing else is writing). Either way the side
//! files are committed and the volume is left rewritten.

use anyhow::{Context, Result};
use clap::Parser;
use silo_core::volume::{FsyncPolicy, MapKind, Volume};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "silo-compact",
    about = "Remove deleted needles from a volume by rewriting it",
    version
)]
struct Args {
    /// Data directory holding the volume files.
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// The volume to compact; its files must exist in --dir.
    #[arg(long = "volume-id")]
    volume_id: u32,

    /// Collection the volume belongs to.
    #[arg(long, default_value = "")]
    collection: String,

    /// 0 = freeze then copy, 1 = online copy.
    #[arg(long, default_value_t = 0)]
    method: u8,

    /// Disk space to preallocate for the rewritten volume, in MiB.
    #[arg(long = "preallocate-mb", default_value_t = 0)]
    preallocate_mb: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if args.preallocate_mb > 0 {
        // Preallocation is a server-side fallocate hint; the rewrite itself
        // does not need it and plain file IO ignores it here.
        info!(mb = args.preallocate_mb, "preallocation requested, ignored by this tool");
    }

    let mut volume = Volume::open(
        &args.dir,
        args.volume_id,
        &args.collection,
        MapKind::Memory,
        FsyncPolicy::Never,
    )
    .await
    .with_context(|| format!("loading volume {} from {}", args.volume_id, args.dir.display()))?;

    let before = volume.dat_size();
    info!(
        volume_id = args.volume_id,
        size = before,
        garbage_ratio = volume.garbage_ratio(),
        method = args.method,
        "compacting volume"
    );

    if args.method == 0 {
        volume.set_read_only(true);
    }
    let mut job = volume
        .begin_compact()
        .with_context(|| format!("starting compaction of volume {}", args.volume_id))?;
    if let Err(e) = job.run().await {
        volume.abort_compact(job).await;
        return Err(e).with_context(|| format!("compacting volume {}", args.volume_id));
    }
    volume
        .commit_compact(job)
        .await
        .with_context(|| format!("committing compaction of volume {}", args.volume_id))?;
    volume.sync().await.context("syncing rewritten volume")?;

    info!(
        volume_id = args.volume_id,
        before,
        after = volume.dat_size(),
        reclaimed = before.saturating_sub(volume.dat_size()),
        revision = volume.compaction_revision(),
        "compaction finished"
    );
    Ok(())
}
