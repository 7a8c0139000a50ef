//! Traits consumed by the controllers
//!
//! Controllers only see these traits so tests can substitute mocks for the
//! HTTP client.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CloudError;
use crate::filter::Filter;
use crate::types::{CreatePlacementGroupOptions, CreateVpcOptions, PlacementGroup, Vpc};

/// Placement group operations
#[async_trait]
pub trait PlacementGroupApi: Send + Sync {
    /// List placement groups matching the filter, in API order
    async fn list_placement_groups(&self, filter: &Filter)
        -> Result<Vec<PlacementGroup>, CloudError>;

    /// Get a placement group by id
    ///
    /// Returns [`CloudError::NotFound`] when the group does not exist.
    async fn get_placement_group(&self, id: i64) -> Result<PlacementGroup, CloudError>;

    /// Create a placement group
    ///
    /// `Ok(None)` means the API accepted the request without returning the
    /// resource. Callers treat that as an internal inconsistency.
    async fn create_placement_group(
        &self,
        opts: &CreatePlacementGroupOptions,
    ) -> Result<Option<PlacementGroup>, CloudError>;

    /// Delete a placement group by id
    async fn delete_placement_group(&self, id: i64) -> Result<(), CloudError>;
}

/// VPC and subnet operations
#[async_trait]
pub trait VpcApi: Send + Sync {
    /// List VPCs matching the filter, in API order
    async fn list_vpcs(&self, filter: &Filter) -> Result<Vec<Vpc>, CloudError>;

    /// Get a VPC by id, including its subnets
    async fn get_vpc(&self, id: i64) -> Result<Vpc, CloudError>;

    /// Create a VPC together with its initial subnets
    ///
    /// `Ok(None)` has the same meaning as for
    /// [`PlacementGroupApi::create_placement_group`].
    async fn create_vpc(&self, opts: &CreateVpcOptions) -> Result<Option<Vpc>, CloudError>;

    /// Delete a VPC and every subnet in it
    async fn delete_vpc(&self, id: i64) -> Result<(), CloudError>;

    /// Delete a single subnet of a VPC
    async fn delete_subnet(&self, vpc_id: i64, subnet_id: i64) -> Result<(), CloudError>;
}

/// Builds API clients for a given token
///
/// `None` selects the operator-wide default token.
pub trait ClientFactory: Send + Sync {
    /// Client for placement group operations
    fn placement_groups(&self, token: Option<&str>)
        -> Result<Arc<dyn PlacementGroupApi>, CloudError>;

    /// Client for VPC operations
    fn vpcs(&self, token: Option<&str>) -> Result<Arc<dyn VpcApi>, CloudError>;
}
