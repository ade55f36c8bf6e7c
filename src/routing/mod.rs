//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup):
//!     ServiceDescription (TOML)
//!     → schema.rs (message shapes)
//!     → matcher.rs (compile path templates)
//!     → router.rs (resolve bindings, reject ambiguity, sort by specificity)
//!     → Freeze as immutable RouteTable
//!
//! Incoming Request (method, path)
//!     → router.rs (route lookup)
//!     → Return: RouteMatch, NotFound, or MethodNotAllowed
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (segment comparison only)
//! - Deterministic: same input always matches same route
//! - Most specific template wins; equal-specificity overlap is a startup error

pub mod description;
pub mod matcher;
pub mod router;
pub mod schema;

pub use description::{DescriptionError, ServiceDescription};
pub use matcher::PathTemplate;
pub use router::{
    BodyBinding, FieldBinding, LookupError, RouteBuildError, RouteEntry, RouteMatch, RouteTable,
};
pub use schema::{FieldDescriptor, FieldKind, ScalarKind, Schema};
