//! Shared types and reconcile plumbing for Tessera controllers
//!
//! CRDs, errors, the object store, credentials, pause detection and the
//! time-windowed retry helpers live here so the per-kind controller crates
//! only contain their state machines.

#![deny(missing_docs)]

pub mod config;
pub mod credentials;
pub mod crd;
pub mod error;
pub mod events;
pub mod finalizers;
pub mod lifecycle;
pub mod pause;
pub mod predicates;
pub mod retry;
pub mod scope;
pub mod store;
pub mod telemetry;

pub use config::ControllerTimeouts;
pub use error::Error;
pub use scope::ResourceScope;
pub use store::{ObjectKey, ObjectStore};

/// Result type alias using our Error type
pub type Result<T, E = Error> = std::result::Result<T, E>;
