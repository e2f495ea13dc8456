//! Resource Registry - Load resource definitions from JSON
//!
//! Every listable kind is described in an embedded JSON file. The registry
//! parses them once and hands out `'static` references.

use crate::gcp::Service;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[
    include_str!("../resources/compute.json"),
    include_str!("../resources/serverless.json"),
    include_str!("../resources/security.json"),
    include_str!("../resources/data.json"),
];

/// Whether a kind is listed once per region or once per project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Regional,
    Global,
}

/// Resource definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDef {
    pub display_name: String,
    pub service: Service,
    /// API path relative to the service root; `{project}` and `{region}`
    /// are substituted
    pub path: String,
    /// Fixed query parameters, same placeholders as `path`
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Dot path to the item array in a response page
    pub response_path: String,
    pub id_field: String,
    pub name_field: String,
    #[serde(default)]
    pub scope: Scope,
}

impl ResourceDef {
    pub fn is_regional(&self) -> bool {
        self.scope == Scope::Regional
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub resources: HashMap<String, ResourceDef>,
}

static REGISTRY: OnceLock<ResourceConfig> = OnceLock::new();

/// Get the resource registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static ResourceConfig {
    REGISTRY.get_or_init(|| {
        let mut final_config = ResourceConfig::default();

        for content in RESOURCE_FILES {
            // Each file adds its own resource keys
            let partial: ResourceConfig = serde_json::from_str(content)
                .unwrap_or_else(|e| panic!("Failed to parse embedded resource JSON: {}", e));
            final_config.resources.extend(partial.resources);
        }

        final_config
    })
}

/// Get a resource definition by key
pub fn get_resource(key: &str) -> Option<&'static ResourceDef> {
    get_registry().resources.get(key)
}

/// All resource keys, sorted
pub fn get_all_resource_keys() -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = get_registry()
        .resources
        .keys()
        .map(|s| s.as_str())
        .collect();
    keys.sort_unstable();
    keys
}
