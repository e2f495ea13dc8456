//! Configuration Management
//!
//! Handles persistent configuration storage for gcpscan.

use crate::gcp::auth::{get_default_project, get_default_region, FALLBACK_REGION};
use crate::jobpool::DEFAULT_CONCURRENCY;
use crate::provider::ProviderOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Project scanned when none is given on the command line
    #[serde(default)]
    pub project_id: Option<String>,
    /// Region for global API calls and discovery
    #[serde(default)]
    pub region: Option<String>,
    /// Fan-out width per listing
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Deadline for one listing, in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// When non-empty, only these regions are scanned
    #[serde(default)]
    pub include_regions: Vec<String>,
    #[serde(default)]
    pub exclude_regions: Vec<String>,
    /// Rebuild cached clients and region lists older than this
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gcpscan").join("config.json"))
    }

    /// Load configuration from disk. A missing or unreadable file yields the
    /// defaults.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("ignoring malformed config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }

    /// Get effective project (CLI > config > gcloud default)
    pub fn effective_project(&self, cli: Option<&str>) -> String {
        cli.map(str::to_string)
            .or_else(|| self.project_id.clone())
            .or_else(get_default_project)
            .unwrap_or_default()
    }

    /// Get effective region (CLI > config > gcloud default)
    pub fn effective_region(&self, cli: Option<&str>) -> String {
        cli.map(str::to_string)
            .or_else(|| self.region.clone())
            .or_else(get_default_region)
            .unwrap_or_else(|| FALLBACK_REGION.to_string())
    }

    pub fn effective_concurrency(&self, cli: Option<usize>) -> usize {
        cli.or(self.concurrency).unwrap_or(DEFAULT_CONCURRENCY).max(1)
    }

    pub fn effective_timeout(&self, cli: Option<u64>) -> Option<Duration> {
        cli.or(self.timeout_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Provider settings for `project_id`, filled from this configuration
    pub fn provider_options(&self, project_id: &str) -> ProviderOptions {
        let mut options = ProviderOptions::new(project_id);
        options.default_region = self.effective_region(None);
        options.concurrency = self.effective_concurrency(None);
        options.include_regions = self.include_regions.clone();
        options.exclude_regions = self.exclude_regions.clone();
        options.cache_ttl = self.cache_ttl_secs.map(Duration::from_secs);
        options
    }
}
