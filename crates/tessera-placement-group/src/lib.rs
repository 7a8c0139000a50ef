//! PlacementGroup controller for Tessera
//!
//! Creates or adopts the remote placement group for each PlacementGroup
//! object, and tears it down once its members have left.

#![deny(missing_docs)]

mod controller;
mod options;

pub use controller::{
    error_policy, reconcile, Context, ContextBuilder, FINALIZER, LEGACY_FINALIZER,
};
pub use options::create_options;
