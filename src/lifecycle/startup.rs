//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Build the route table from the service description
//! - Verify the backend is reachable
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listener binds last (traffic only when ready)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{self, ConfigError, GatewayConfig};
use crate::http::GatewayServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals;
use crate::net::{self, ListenerError};
use crate::observability::{logging, metrics};
use crate::routing::{DescriptionError, RouteBuildError, RouteTable, ServiceDescription};
use crate::rpc::{GrpcClient, RpcStatus};

/// Where startup reads its inputs from.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    pub config_path: Option<PathBuf>,
    pub services_path: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("no service description given (pass --services or set services_path)")]
    MissingServices,

    #[error(transparent)]
    Description(#[from] DescriptionError),

    #[error("route table build failed: {0}")]
    Routes(#[from] RouteBuildError),

    #[error("backend check failed: {0}")]
    Backend(RpcStatus),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Build the route table named by the options or the config.
pub fn load_routes(
    config: &GatewayConfig,
    services_path: Option<PathBuf>,
) -> Result<RouteTable, StartupError> {
    let path = services_path
        .or_else(|| config.services_path.as_ref().map(PathBuf::from))
        .ok_or(StartupError::MissingServices)?;

    let description = ServiceDescription::load(&path)?;
    let routes = RouteTable::build(&description)?;
    tracing::info!(path = %path.display(), routes = routes.len(), "Route table built");
    Ok(routes)
}

/// Start the gateway and serve until a shutdown signal.
pub async fn run(options: StartupOptions) -> Result<(), StartupError> {
    let config = config::load_config(options.config_path.as_deref(), options.env_prefix)?;
    logging::init(&config.observability);

    tracing::info!(
        backend = %config.backend,
        port = config.port,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    let routes = load_routes(&config, options.services_path)?;

    let client = GrpcClient::connect(&config.backend, Duration::from_secs(config.timeouts.connect_secs))
        .await
        .map_err(StartupError::Backend)?
        .with_max_message_bytes(config.limits.max_message_bytes);

    if config.observability.metrics_enabled {
        if let Some(addr) = config.observability.metrics_socket() {
            metrics::init_metrics(addr);
        }
    }

    let server = GatewayServer::new(&config, Arc::new(routes), Arc::new(client));
    let listener = net::bind(&config.bind_address()).await?;

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    signals::spawn_signal_listener(shutdown);

    server.run(listener, receiver).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
