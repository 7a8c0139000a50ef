//! Startup utilities for the Tessera operator

mod crds;

pub use crds::{crd_manifests, ensure_crds_installed};
