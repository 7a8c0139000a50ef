//! Remote API client for Tessera-managed cloud resources
//!
//! This crate only knows about the cloud side: wire types, list filters and
//! the async traits the controllers consume. The reqwest-backed
//! [`HttpClient`] implements every trait against the v4 REST API.

#![deny(missing_docs)]

mod client;
pub mod error;
pub mod filter;
mod http;
pub mod types;

pub use client::{ClientFactory, PlacementGroupApi, VpcApi};
pub use error::CloudError;
pub use filter::Filter;
pub use http::{HttpClient, HttpClientFactory, DEFAULT_API_URL};
pub use types::{
    CreatePlacementGroupOptions, CreateSubnetOptions, CreateVpcOptions, PlacementGroup,
    PlacementGroupMember, PlacementPolicy, PlacementType, SubnetLinode, Vpc, VpcSubnet,
};
