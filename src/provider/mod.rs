//! Scan context for one GCP project
//!
//! A [`Provider`] owns the project configuration and one [`Cache`]. Every
//! accessor that builds something expensive (service clients, the region
//! list, the project identity) consults that cache first. Providers share
//! nothing with each other, so several projects can be scanned at once.

pub mod cache;

pub use cache::{Cache, CacheEntry};

use crate::gcp::auth::{TokenSource, FALLBACK_REGION};
use crate::gcp::http::GcpHttpClient;
use crate::gcp::projects::{fetch_account_info, AccountInfo};
use crate::gcp::{GcpClient, Service};
use crate::jobpool::DEFAULT_CONCURRENCY;
use anyhow::{Context, Result};
use cache::{client_key, ACCOUNT_KEY, REGIONS_KEY};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

/// Settings for one scanned project
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub project_id: String,
    /// Used when a caller passes an empty region, and for discovery calls
    pub default_region: String,
    /// Fan-out width for region listings
    pub concurrency: usize,
    /// When non-empty, the region list; discovery is skipped
    pub include_regions: Vec<String>,
    /// Removed from discovered regions
    pub exclude_regions: Vec<String>,
    /// Replaces scheme and host of every service endpoint
    pub endpoint: Option<Url>,
    /// Cached objects older than this are rebuilt. `None` keeps them forever.
    pub cache_ttl: Option<Duration>,
}

impl ProviderOptions {
    pub fn new(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            default_region: FALLBACK_REGION.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            include_regions: Vec::new(),
            exclude_regions: Vec::new(),
            endpoint: None,
            cache_ttl: None,
        }
    }
}

/// Account context: configuration, credentials and the client registry
#[derive(Clone, Debug)]
pub struct Provider {
    options: Arc<ProviderOptions>,
    credentials: TokenSource,
    http: GcpHttpClient,
    cache: Cache,
    // Serialises region and account discovery so concurrent misses issue one call
    discovery: Arc<Mutex<()>>,
}

impl Provider {
    pub fn new(mut options: ProviderOptions, credentials: TokenSource) -> Result<Self> {
        if options.project_id.is_empty() {
            anyhow::bail!("No GCP project configured");
        }
        if options.default_region.is_empty() {
            options.default_region = FALLBACK_REGION.to_string();
        }
        options.concurrency = options.concurrency.max(1);

        Ok(Self {
            options: Arc::new(options),
            credentials,
            http: GcpHttpClient::new()?,
            cache: Cache::new(),
            discovery: Arc::new(Mutex::new(())),
        })
    }

    /// Build a provider with credentials from the environment or ADC
    pub async fn connect(options: ProviderOptions) -> Result<Self> {
        tracing::debug!("new gcp provider for project {}", options.project_id);
        let credentials = TokenSource::discover().await?;
        Self::new(options, credentials)
    }

    pub fn project_id(&self) -> &str {
        &self.options.project_id
    }

    pub fn default_region(&self) -> &str {
        &self.options.default_region
    }

    pub fn concurrency(&self) -> usize {
        self.options.concurrency
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    fn cached<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.cache
            .load_fresh(key, self.options.cache_ttl)?
            .data::<T>()
    }

    /// Return the value cached under `key`, building and storing it on a miss.
    ///
    /// Stale entries, failed entries and entries of another type are
    /// replaced. Callers racing on the same key may each build, but the
    /// first value stored wins and every caller gets it.
    pub fn get_or_build<T, F>(&self, key: &str, build: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.cached::<T>(key) {
            return value;
        }

        let value = Arc::new(build());
        let ttl = self.options.cache_ttl;
        let stored = self
            .cache
            .store_unless(key, CacheEntry::from_arc(value.clone()), |current| {
                current.valid
                    && !ttl.is_some_and(|ttl| current.is_expired(ttl))
                    && current.data::<T>().is_some()
            });
        stored.data::<T>().unwrap_or(value)
    }

    /// Client for `service` in `region`; an empty region means the default
    /// region. Never fails: problems surface on the first API call.
    pub fn client(&self, service: Service, region: &str) -> Arc<GcpClient> {
        let region = if region.is_empty() {
            self.default_region()
        } else {
            region
        };

        self.get_or_build(&client_key(service.as_str(), region), || {
            tracing::debug!("building {} client for {}", service, region);
            GcpClient::new(
                service,
                region,
                self.project_id(),
                self.options.endpoint.as_ref(),
                self.credentials.clone(),
                self.http.clone(),
            )
        })
    }

    /// Regions to fan out over.
    ///
    /// The first call discovers them (or takes the include list) and caches
    /// the result, even when empty. Discovery failures are returned and not
    /// cached, so a later call retries.
    pub async fn regions(&self) -> Result<Arc<Vec<String>>> {
        if let Some(regions) = self.cached::<Vec<String>>(REGIONS_KEY) {
            tracing::debug!("use regions from cache");
            return Ok(regions);
        }

        let _guard = self.discovery.lock().await;
        if let Some(regions) = self.cached::<Vec<String>>(REGIONS_KEY) {
            return Ok(regions);
        }

        if !self.options.include_regions.is_empty() {
            tracing::debug!(regions = ?self.options.include_regions, "using region limits");
            let regions = Arc::new(self.options.include_regions.clone());
            self.cache
                .store(REGIONS_KEY, CacheEntry::from_arc(regions.clone()));
            return Ok(regions);
        }

        tracing::debug!("no region cache or region limits found, fetching regions");
        let client = self.client(Service::Compute, "");
        let discovered = match list_regions(&client).await {
            Ok(regions) => regions,
            Err(err) => {
                tracing::warn!("unable to list regions: {:#}", err);
                return Err(err.context(format!(
                    "Failed to list regions for project {}",
                    self.project_id()
                )));
            }
        };

        let total = discovered.len();
        let regions: Vec<String> = discovered
            .into_iter()
            .filter(|r| !self.options.exclude_regions.contains(r))
            .collect();
        if regions.len() != total {
            tracing::debug!(regions = ?regions, "list of regions changed based on applied filters");
        }

        let regions = Arc::new(regions);
        self.cache
            .store(REGIONS_KEY, CacheEntry::from_arc(regions.clone()));
        Ok(regions)
    }

    /// Identity of the scanned project, fetched once
    pub async fn account_info(&self) -> Result<Arc<AccountInfo>> {
        if let Some(info) = self.cached::<AccountInfo>(ACCOUNT_KEY) {
            return Ok(info);
        }

        let _guard = self.discovery.lock().await;
        if let Some(info) = self.cached::<AccountInfo>(ACCOUNT_KEY) {
            return Ok(info);
        }

        let client = self.client(Service::ResourceManager, "");
        let info = Arc::new(fetch_account_info(&client).await?);
        self.cache
            .store(ACCOUNT_KEY, CacheEntry::from_arc(info.clone()));
        Ok(info)
    }

    /// Drop every cached client and discovered list
    pub fn invalidate(&self) {
        self.cache.clear();
    }
}

/// Names of the project's regions that are `UP`, following pagination
async fn list_regions(client: &GcpClient) -> Result<Vec<String>> {
    let path = client.compute_path("regions");
    let mut regions = Vec::new();
    let mut query: Vec<(String, String)> = Vec::new();

    loop {
        let response = client
            .get(&path, &query)
            .await
            .context("Failed to describe regions")?;

        if let Some(items) = response.get("items").and_then(|v| v.as_array()) {
            regions.extend(items.iter().filter_map(|item| {
                let up = item
                    .get("status")
                    .and_then(|s| s.as_str())
                    .map_or(true, |s| s == "UP");
                let name = item.get("name").and_then(|n| n.as_str())?;
                up.then(|| name.to_string())
            }));
        }

        match response.get("nextPageToken").and_then(|v| v.as_str()) {
            Some(token) if !token.is_empty() => {
                query = vec![("pageToken".to_string(), token.to_string())];
            }
            _ => break,
        }
    }

    Ok(regions)
}
