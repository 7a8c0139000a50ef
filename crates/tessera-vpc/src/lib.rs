//! Vpc controller for Tessera
//!
//! Creates or adopts the remote VPC with its subnets for each Vpc object.
//! Deletion honors per-subnet retention and waits for attached nodes to
//! leave the subnets being removed.

#![deny(missing_docs)]

mod controller;
mod options;

pub use controller::{
    error_policy, reconcile, Context, ContextBuilder, FINALIZER, LEGACY_FINALIZER,
};
pub use options::{bind_subnet_ids, create_options};
