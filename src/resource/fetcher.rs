//! Resource Fetcher
//!
//! Handles fetching resources from GCP APIs based on resource definitions.

use super::registry::ResourceDef;
use crate::gcp::client::GcpClient;
use anyhow::{Context, Result};
use serde_json::Value;

/// One page of a listing
#[derive(Debug, Default)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_token: Option<String>,
}

/// Substitute `{project}` and `{region}` in a path or parameter template
pub fn expand_template(template: &str, project: &str, region: &str) -> String {
    template
        .replace("{project}", &urlencoding::encode(project))
        .replace("{region}", &urlencoding::encode(region))
}

/// Fetch one page of `def` through `client`
pub async fn fetch_page(
    client: &GcpClient,
    def: &ResourceDef,
    page_token: Option<&str>,
) -> Result<Page> {
    let path = expand_template(&def.path, &client.project_id, &client.region);

    let mut query: Vec<(String, String)> = def
        .params
        .iter()
        .map(|(k, v)| (k.clone(), expand_template(v, &client.project_id, &client.region)))
        .collect();
    query.sort();
    if let Some(token) = page_token {
        query.push(("pageToken".to_string(), token.to_string()));
    }

    tracing::debug!(service = %client.service, region = %client.region, path = %path, "fetching page");
    let response = client
        .get(&path, &query)
        .await
        .with_context(|| format!("Failed to list {} in {}", def.display_name, client.region))?;

    let next_token = response
        .get("nextPageToken")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    Ok(Page {
        items: extract_items(&response, &def.response_path),
        next_token,
    })
}

/// Extract items from response using the response_path.
///
/// A missing path means an empty page: list APIs omit the field when there
/// is nothing to return.
fn extract_items(response: &Value, path: &str) -> Vec<Value> {
    if path.is_empty() {
        return response.as_array().cloned().unwrap_or_default();
    }

    let mut current = response;
    for part in path.split('.') {
        current = match current.get(part) {
            Some(v) => v,
            None => return vec![],
        };
    }

    current.as_array().cloned().unwrap_or_default()
}

/// Extract short name from GCP resource URL
/// e.g., "https://www.googleapis.com/compute/v1/projects/my-project/regions/us-central1" -> "us-central1"
pub fn extract_short_name(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}

/// Look up a value by dot-notation path. Array indices are allowed.
pub fn lookup<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = item;
    for part in path.split('.') {
        current = match part.parse::<usize>() {
            Ok(idx) => current.get(idx)?,
            Err(_) => current.get(part)?,
        };
    }
    Some(current)
}
