//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults (GatewayConfig::default)
//!     → config file (TOML, optional) → loader.rs
//!     → environment overrides (<PREFIX>_BACKEND, <PREFIX>_PORT, ...)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    GatewayConfig, HeaderPolicyConfig, LimitsConfig, LogFormat, ObservabilityConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
