//! GCP service clients
//!
//! A [`GcpClient`] is bound to one service and one region. Building one is
//! cheap but not free (endpoint resolution, credential handle, connection
//! pool handle), so the provider memoises them per service and region.

use super::auth::TokenSource;
use super::http::GcpHttpClient;
use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// GCP APIs the inventory knows how to reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Compute,
    #[serde(rename = "run")]
    CloudRun,
    Kms,
    Container,
    ResourceManager,
    SqlAdmin,
    Storage,
}

impl Service {
    pub const ALL: [Service; 7] = [
        Service::Compute,
        Service::CloudRun,
        Service::Kms,
        Service::Container,
        Service::ResourceManager,
        Service::SqlAdmin,
        Service::Storage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::CloudRun => "run",
            Self::Kms => "kms",
            Self::Container => "container",
            Self::ResourceManager => "resourcemanager",
            Self::SqlAdmin => "sqladmin",
            Self::Storage => "storage",
        }
    }

    /// Served from a per-region hostname rather than one global host
    pub fn has_regional_host(&self) -> bool {
        matches!(self, Self::CloudRun)
    }

    /// Production host. Cloud Run is served from regional endpoints.
    fn host(&self, region: &str) -> String {
        match self {
            Self::Compute => "compute.googleapis.com".to_string(),
            Self::CloudRun => format!("{}-run.googleapis.com", region),
            Self::Kms => "cloudkms.googleapis.com".to_string(),
            Self::Container => "container.googleapis.com".to_string(),
            Self::ResourceManager => "cloudresourcemanager.googleapis.com".to_string(),
            Self::SqlAdmin => "sqladmin.googleapis.com".to_string(),
            Self::Storage => "storage.googleapis.com".to_string(),
        }
    }

    fn api_root(&self) -> &'static str {
        match self {
            Self::Compute => "compute/v1",
            Self::CloudRun => "v2",
            Self::Kms => "v1",
            Self::Container => "v1",
            Self::ResourceManager => "v1",
            Self::SqlAdmin => "v1",
            Self::Storage => "storage/v1",
        }
    }

    /// Base URL for API paths in `region`. `endpoint` replaces scheme and
    /// host for every service (emulators, tests).
    pub fn base_url(&self, region: &str, endpoint: Option<&Url>) -> String {
        let origin = match endpoint {
            Some(url) => url.as_str().trim_end_matches('/').to_string(),
            None => format!("https://{}", self.host(region)),
        };
        format!("{}/{}", origin, self.api_root())
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Service::ALL
            .into_iter()
            .find(|svc| svc.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown service: {}", s))
    }
}

/// Client for one GCP service in one region
#[derive(Clone)]
pub struct GcpClient {
    pub service: Service,
    pub region: String,
    pub project_id: String,
    base_url: String,
    regional_host: bool,
    credentials: TokenSource,
    http: GcpHttpClient,
}

impl GcpClient {
    pub fn new(
        service: Service,
        region: &str,
        project_id: &str,
        endpoint: Option<&Url>,
        credentials: TokenSource,
        http: GcpHttpClient,
    ) -> Self {
        Self {
            service,
            region: region.to_string(),
            project_id: project_id.to_string(),
            base_url: service.base_url(region, endpoint),
            regional_host: endpoint.is_none() && service.has_regional_host(),
            credentials,
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// True when requests go to a hostname that exists only for regions
    /// where the service is offered
    pub fn uses_regional_host(&self) -> bool {
        self.regional_host
    }

    /// Absolute URL for an API path relative to the service root
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET an API path with query parameters
    pub async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        let token = self.credentials.token().await?;
        self.http.get(&self.url(path), &token, query).await
    }

    /// Build a Compute Engine path for this client's project
    pub fn compute_path(&self, resource: &str) -> String {
        format!("projects/{}/{}", self.project_id, resource)
    }
}

impl fmt::Debug for GcpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcpClient")
            .field("service", &self.service)
            .field("region", &self.region)
            .field("project_id", &self.project_id)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(service: Service, region: &str, endpoint: Option<&Url>) -> GcpClient {
        GcpClient::new(
            service,
            region,
            "my-project",
            endpoint,
            TokenSource::Static("t".to_string()),
            GcpHttpClient::new().unwrap(),
        )
    }

    #[test]
    fn test_production_urls() {
        assert_eq!(
            Service::Compute.base_url("us-east1", None),
            "https://compute.googleapis.com/compute/v1"
        );
        assert_eq!(
            Service::CloudRun.base_url("europe-west1", None),
            "https://europe-west1-run.googleapis.com/v2"
        );
        assert_eq!(
            Service::Storage.base_url("us-east1", None),
            "https://storage.googleapis.com/storage/v1"
        );
    }

    #[test]
    fn test_endpoint_override() {
        let endpoint = Url::parse("http://127.0.0.1:8085/").unwrap();
        assert_eq!(
            Service::CloudRun.base_url("europe-west1", Some(&endpoint)),
            "http://127.0.0.1:8085/v2"
        );
    }

    #[test]
    fn test_paths() {
        let c = client(Service::Compute, "us-west1", None);
        assert_eq!(
            c.url(&c.compute_path("regions")),
            "https://compute.googleapis.com/compute/v1/projects/my-project/regions"
        );

        let k = client(Service::Kms, "us-west1", None);
        assert_eq!(
            k.url("/projects/my-project/locations/us-west1/keyRings"),
            "https://cloudkms.googleapis.com/v1/projects/my-project/locations/us-west1/keyRings"
        );
    }

    #[test]
    fn test_regional_host() {
        assert!(client(Service::CloudRun, "us-west1", None).uses_regional_host());
        assert!(!client(Service::Compute, "us-west1", None).uses_regional_host());
        assert!(!client(Service::Storage, "us-west1", None).uses_regional_host());

        let endpoint = Url::parse("http://127.0.0.1:8085/").unwrap();
        assert!(!client(Service::CloudRun, "us-west1", Some(&endpoint)).uses_regional_host());
    }

    #[test]
    fn test_service_from_str() {
        assert_eq!("run".parse::<Service>().unwrap(), Service::CloudRun);
        for svc in Service::ALL {
            assert_eq!(svc.as_str().parse::<Service>().unwrap(), svc);
        }
        assert!("lambda".parse::<Service>().is_err());
    }
}
