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

//! Silo server entry point.

use anyhow::Result;
use clap::{Parser, Subcommand};
use silo_server::{MasterApp, MasterConfig, VolumeServerApp, VolumeServerConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "silo-server", about = "Silo distributed blob storage", version)]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Run the master: topology, assignment, vacuum orchestration.
    Master,
    /// Run a volume server: needle storage, replication, heartbeats.
    Volume,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "silo_server=info,silo_api=info,silo_core=info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.role {
        Role::Master => {
            info!("starting master role");
            MasterApp::new(MasterConfig::default())?.run().await
        }
        Role::Volume => {
            info!("starting volume server role");
            VolumeServerApp::new(VolumeServerConfig::default())?.run().await
        }
    }
}
