//! Inventory of GCP projects with bounded concurrent region fan-out
//!
//! - [`jobpool`] - runs independent jobs with at most N in flight
//! - [`provider`] - per-project context, memoised clients and regions
//! - [`gcp`] - REST clients, auth and the error classifier
//! - [`resource`] - data-driven resource kinds and the inventory scan
//! - [`config`] - persisted user defaults

pub mod config;
pub mod gcp;
pub mod jobpool;
pub mod provider;
pub mod resource;

/// Version injected at compile time via GCPSCAN_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("GCPSCAN_VERSION") {
    Some(v) => v,
    None => "dev",
};
