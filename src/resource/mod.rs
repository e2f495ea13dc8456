//! Resource abstraction layer
//!
//! Resource kinds are data, not code: each one is a JSON definition naming
//! the service, the list path and where ids live in the response.
//!
//! # Architecture
//!
//! - [`registry`] - Loads and caches resource definitions from embedded JSON
//! - [`fetcher`] - Fetches one page of a kind from a service client
//! - [`model`] - The [`Resource`] record produced for each listed item
//! - [`inventory`] - Fans a listing out over regions through a job pool
//!
//! # Resource Definitions
//!
//! Resources are defined in JSON files under `src/resources/`:
//! - `compute.json` - VPC networks, subnetworks, addresses, routers, firewalls
//! - `serverless.json` - Cloud Run services and jobs
//! - `security.json` - KMS key rings
//! - `data.json` - GKE clusters, Cloud SQL instances, Storage buckets
//!
//! # Example
//!
//! ```ignore
//! use gcpscan::provider::{Provider, ProviderOptions};
//! use gcpscan::resource::{list_resources, ScanOptions};
//!
//! async fn subnets() -> anyhow::Result<()> {
//!     let provider = Provider::connect(ProviderOptions::new("my-project")).await?;
//!     let listing = list_resources(&provider, "compute-subnetworks", &ScanOptions::default()).await?;
//!     println!("{} subnetworks", listing.resources.len());
//!     Ok(())
//! }
//! ```

pub mod fetcher;
pub mod inventory;
pub mod model;
pub mod registry;

pub use inventory::{list_many, list_resources, FailurePolicy, Listing, ScanOptions};
pub use model::Resource;
pub use registry::{get_all_resource_keys, get_resource, ResourceDef, Scope};
