//! RPC Gateway
//!
//! Accepts HTTP/JSON requests and forwards them to a gRPC backend.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                     RPC GATEWAY                      │
//!                      │                                                      │
//!   Client Request     │  ┌─────────┐   ┌──────────┐   ┌──────────────┐       │
//!   ───────────────────┼─▶│   net   │──▶│   http   │──▶│   routing    │       │
//!                      │  │listener │   │  server  │   │ route table  │       │
//!                      │  └─────────┘   └──────────┘   └──────┬───────┘       │
//!                      │                                      │               │
//!                      │                                      ▼               │
//!                      │                               ┌──────────────┐       │
//!                      │                               │   security   │       │
//!                      │                               │header policy │       │
//!                      │                               └──────┬───────┘       │
//!                      │                                      │               │
//!                      │                                      ▼               │
//!   Client Response    │  ┌──────────┐                 ┌──────────────┐       │
//!   ◀──────────────────┼──│transcode │◀───────────────▶│     rpc      │◀──────┼── Backend
//!                      │  │ response │                 │ gRPC client  │       │
//!                      │  └──────────┘                 └──────────────┘       │
//!                      │                                                      │
//!                      │  config · observability · resilience · lifecycle     │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use rpc_gateway::lifecycle::{self, StartupOptions};

#[derive(Parser, Debug)]
#[command(name = "rpc-gateway")]
#[command(about = "HTTP/JSON to RPC transcoding gateway", long_about = None)]
struct Cli {
    /// Gateway configuration file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Service description file (TOML).
    #[arg(short, long)]
    services: Option<PathBuf>,

    /// Prefix for environment overrides (`<PREFIX>_BACKEND`, `<PREFIX>_PORT`).
    #[arg(long)]
    env_prefix: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let options = StartupOptions {
        config_path: cli.config,
        services_path: cli.services,
        env_prefix: cli.env_prefix,
    };

    match lifecycle::run(options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Gateway failed");
            eprintln!("rpc-gateway: {e}");
            ExitCode::FAILURE
        }
    }
}
