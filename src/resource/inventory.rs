//! Resource inventory
//!
//! Lists one resource kind across a project. Regional kinds fan out over the
//! provider's regions, one pool job per region; global kinds run a single
//! job. Regions where the caller lacks permission or the service does not
//! exist are skipped with a warning.

use super::fetcher::fetch_page;
use super::model::Resource;
use super::registry::{get_resource, ResourceDef};
use crate::gcp::{is_region_unavailable, is_soft_skippable, GcpClient};
use crate::jobpool::{Job, JobPool, PoolError};
use crate::provider::Provider;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What to do when some jobs of a listing fail
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Any failure fails the listing
    #[default]
    AllOrNothing,
    /// Keep results of successful jobs and report the failures alongside
    Partial,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub policy: FailurePolicy,
    /// Deadline for the whole listing of one kind
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

/// Outcome of listing one kind
#[derive(Debug, Default)]
pub struct Listing {
    /// Sorted by region, then id
    pub resources: Vec<Resource>,
    /// Only set under [`FailurePolicy::Partial`]
    pub errors: Option<PoolError>,
}

/// List every resource of `kind` visible to `provider`
pub async fn list_resources(provider: &Provider, kind: &str, opts: &ScanOptions) -> Result<Listing> {
    let def = get_resource(kind).ok_or_else(|| anyhow!("Unknown resource kind: {}", kind))?;

    let jobs = if def.is_regional() {
        match provider.regions().await {
            Ok(regions) => regions
                .iter()
                .map(|region| region_job(provider, kind, def, region))
                .collect(),
            Err(err) => vec![Job::failed(err)],
        }
    } else {
        vec![region_job(provider, kind, def, provider.default_region())]
    };

    let mut pool = JobPool::new(jobs, provider.concurrency());
    if let Some(cancel) = &opts.cancel {
        pool = pool.with_cancellation(cancel.clone());
    }
    if let Some(timeout) = opts.timeout {
        pool = pool.with_timeout(timeout);
    }
    pool.run().await;

    let (pages, errors) = match opts.policy {
        FailurePolicy::AllOrNothing => {
            let pages = pool.into_results().map_err(|err| {
                anyhow::Error::new(err).context(format!(
                    "Failed to list {} in project {}",
                    kind,
                    provider.project_id()
                ))
            })?;
            (pages, None)
        }
        FailurePolicy::Partial => pool.into_partial(),
    };

    let mut resources: Vec<Resource> = pages.into_iter().flatten().collect();
    resources.sort_by(|a, b| a.region.cmp(&b.region).then_with(|| a.id.cmp(&b.id)));

    tracing::info!(
        project = provider.project_id(),
        kind,
        count = resources.len(),
        failed = errors.as_ref().map_or(0, |e| e.failures().len()),
        "listing finished"
    );
    Ok(Listing { resources, errors })
}

/// List several kinds one after another, keyed by kind
pub async fn list_many(
    provider: &Provider,
    kinds: &[String],
    opts: &ScanOptions,
) -> Result<Vec<(String, Listing)>> {
    let mut listings = Vec::with_capacity(kinds.len());
    for kind in kinds {
        if opts.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            anyhow::bail!("Scan cancelled");
        }
        listings.push((kind.clone(), list_resources(provider, kind, opts).await?));
    }
    Ok(listings)
}

fn region_job(
    provider: &Provider,
    kind: &str,
    def: &'static ResourceDef,
    region: &str,
) -> Job<Vec<Resource>> {
    let client = provider.client(def.service, region);
    let kind = kind.to_string();
    Job::new(move |cancel| async move { list_region(client, kind, def, cancel).await })
}

/// Only a per-region hostname can be absent because the service is not
/// offered there. Resolution failures against global hosts or an explicit
/// endpoint are outages.
fn is_missing_regional_endpoint(client: &GcpClient, err: &anyhow::Error) -> bool {
    client.uses_regional_host() && is_region_unavailable(err)
}

async fn list_region(
    client: Arc<GcpClient>,
    kind: String,
    def: &'static ResourceDef,
    cancel: CancellationToken,
) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            anyhow::bail!("Listing of {} in {} cancelled", kind, client.region);
        }

        let page = match fetch_page(&client, def, page_token.as_deref()).await {
            Ok(page) => page,
            Err(err) if is_soft_skippable(&err) => {
                tracing::warn!(
                    "skipping {} in {}: access denied: {:#}",
                    kind,
                    client.region,
                    err
                );
                return Ok(resources);
            }
            Err(err) if is_missing_regional_endpoint(&client, &err) => {
                tracing::warn!(
                    "skipping {} in {}: service not available in region: {:#}",
                    kind,
                    client.region,
                    err
                );
                return Ok(resources);
            }
            Err(err) => return Err(err),
        };

        for item in page.items {
            resources.push(Resource::from_item(
                &kind,
                def,
                &client.project_id,
                &client.region,
                item,
            )?);
        }

        match page.next_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    tracing::debug!(kind = %kind, region = %client.region, count = resources.len(), "region listed");
    Ok(resources)
}
