//! Billing source adapters: HTTP implementations of the `BulkSource` and
//! `ScopedSource` contracts.

pub mod aws;
pub mod cloudability;
mod common;
pub mod ibmcloud;
pub mod organizations;

pub use aws::{AwsCredentials, CostExplorerClient};
pub use cloudability::CloudabilityClient;
pub use ibmcloud::IbmCloudClient;
pub use organizations::OrganizationsClient;
