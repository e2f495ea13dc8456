use super::fetcher::{extract_short_name, lookup};
use super::registry::ResourceDef;
use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::Value;

/// Region recorded for resources that do not belong to one
pub const GLOBAL_REGION: &str = "global";

/// A listed cloud resource: identity plus the raw API representation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub kind: String,
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub region: String,
    pub data: Value,
}

impl Resource {
    /// Build a resource from one API item.
    ///
    /// For regional kinds `region` is the listed region. Global kinds take
    /// the item's own `region` or `location` when it has one.
    pub fn from_item(
        kind: &str,
        def: &ResourceDef,
        project_id: &str,
        region: &str,
        item: Value,
    ) -> Result<Self> {
        let id = match lookup(&item, &def.id_field) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => bail!("{} item has no {}", kind, def.id_field),
        };

        let name = lookup(&item, &def.name_field)
            .and_then(|v| v.as_str())
            .map(extract_short_name)
            .unwrap_or_else(|| id.clone());

        let region = if def.is_regional() {
            region.to_string()
        } else {
            item.get("region")
                .or_else(|| item.get("location"))
                .and_then(|v| v.as_str())
                .map(extract_short_name)
                .unwrap_or_else(|| GLOBAL_REGION.to_string())
        };

        Ok(Self {
            kind: kind.to_string(),
            id,
            name,
            project_id: project_id.to_string(),
            region,
            data: item,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::registry::get_resource;
    use serde_json::json;

    #[test]
    fn test_regional_item() {
        let def = get_resource("compute-routers").unwrap();
        let r = Resource::from_item(
            "compute-routers",
            def,
            "p",
            "us-east1",
            json!({"id": "123456", "name": "edge", "region": "https://x/regions/ignored"}),
        )
        .unwrap();
        assert_eq!(r.id, "123456");
        assert_eq!(r.name, "edge");
        assert_eq!(r.region, "us-east1");
        assert_eq!(r.project_id, "p");
    }

    #[test]
    fn test_numeric_id() {
        let def = get_resource("compute-networks").unwrap();
        let r = Resource::from_item("compute-networks", def, "p", "", json!({"id": 42, "name": "default"}))
            .unwrap();
        assert_eq!(r.id, "42");
        assert_eq!(r.region, GLOBAL_REGION);
    }

    #[test]
    fn test_global_item_takes_location() {
        let def = get_resource("gke-clusters").unwrap();
        let r = Resource::from_item(
            "gke-clusters",
            def,
            "p",
            "us-central1",
            json!({"id": "c1", "name": "prod", "location": "europe-west4"}),
        )
        .unwrap();
        assert_eq!(r.region, "europe-west4");
    }

    #[test]
    fn test_full_name_is_shortened() {
        let def = get_resource("kms-keyrings").unwrap();
        let r = Resource::from_item(
            "kms-keyrings",
            def,
            "p",
            "us-east1",
            json!({"name": "projects/p/locations/us-east1/keyRings/main"}),
        )
        .unwrap();
        assert_eq!(r.id, "projects/p/locations/us-east1/keyRings/main");
        assert_eq!(r.name, "main");
    }

    #[test]
    fn test_missing_id_fails() {
        let def = get_resource("compute-subnetworks").unwrap();
        let err = Resource::from_item("compute-subnetworks", def, "p", "us-east1", json!({"name": "x"}))
            .unwrap_err();
        assert!(err.to_string().contains("has no id"));
    }
}
