//! GCP Projects
//!
//! A project is the account boundary of a scan.

use super::client::GcpClient;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

/// Identity of the scanned project
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountInfo {
    pub project_id: String,
    pub name: String,
    pub project_number: String,
    pub lifecycle_state: String,
}

fn str_field(value: &Value, key: &str, default: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
        .to_string()
}

impl From<&Value> for AccountInfo {
    fn from(value: &Value) -> Self {
        Self {
            project_id: str_field(value, "projectId", "-"),
            name: str_field(value, "name", "-"),
            project_number: str_field(value, "projectNumber", "-"),
            lifecycle_state: str_field(value, "lifecycleState", "UNKNOWN"),
        }
    }
}

/// Fetch the project behind `client.project_id` from Resource Manager
pub async fn fetch_account_info(client: &GcpClient) -> Result<AccountInfo> {
    let path = format!("projects/{}", client.project_id);
    let response = client
        .get(&path, &[])
        .await
        .with_context(|| format!("Failed to describe project {}", client.project_id))?;
    Ok(AccountInfo::from(&response))
}

/// List every ACTIVE project the credentials can see
pub async fn list_projects(client: &GcpClient) -> Result<Vec<AccountInfo>> {
    let mut projects = Vec::new();
    let mut query: Vec<(String, String)> = Vec::new();

    loop {
        let response = client.get("projects", &query).await?;

        if let Some(items) = response.get("projects").and_then(|v| v.as_array()) {
            projects.extend(
                items
                    .iter()
                    .map(AccountInfo::from)
                    .filter(|p| p.lifecycle_state == "ACTIVE"),
            );
        }

        match response.get("nextPageToken").and_then(|v| v.as_str()) {
            Some(token) if !token.is_empty() => {
                query = vec![("pageToken".to_string(), token.to_string())];
            }
            _ => break,
        }
    }

    Ok(projects)
}
