//! GCP API interaction module
//!
//! # Module Structure
//!
//! - [`auth`] - Application Default Credentials, static tokens, gcloud defaults
//! - [`client`] - Per-service, per-region API clients
//! - [`errors`] - API error type and the soft-skip classifier
//! - [`http`] - HTTP utilities for REST API calls
//! - [`projects`] - Project identity and listing

pub mod auth;
pub mod client;
pub mod errors;
pub mod http;
pub mod projects;

pub use client::{GcpClient, Service};
pub use errors::{is_region_unavailable, is_soft_skippable, ApiError};
