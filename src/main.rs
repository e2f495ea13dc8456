use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use futures::future::join_all;
use gcpscan::config::Config;
use gcpscan::gcp::auth::{self, TokenSource};
use gcpscan::gcp::http::{format_gcp_error, GcpHttpClient};
use gcpscan::gcp::projects::{list_projects, AccountInfo};
use gcpscan::gcp::{GcpClient, Service};
use gcpscan::provider::Provider;
use gcpscan::resource::{
    get_all_resource_keys, get_resource, list_many, FailurePolicy, Resource, ScanOptions,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Inventory GCP resources across regions
#[derive(Parser, Debug)]
#[command(name = "gcpscan", version = gcpscan::VERSION, about, long_about = None)]
struct Args {
    /// Resource kinds to list (see --list-kinds)
    kinds: Vec<String>,

    /// GCP project to scan; repeat for several
    #[arg(short, long)]
    project: Vec<String>,

    /// Scan every ACTIVE project the credentials can see
    #[arg(long, conflicts_with = "project")]
    all_projects: bool,

    /// Region for global calls and region discovery
    #[arg(short, long)]
    region: Option<String>,

    /// Only scan these regions; repeat for several
    #[arg(long = "include-region")]
    include_regions: Vec<String>,

    /// Never scan these regions; repeat for several
    #[arg(long = "exclude-region")]
    exclude_regions: Vec<String>,

    /// Regions listed in parallel per resource kind
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Deadline for listing one kind, in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Report what succeeded instead of failing the whole kind
    #[arg(long)]
    partial: bool,

    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Bearer token to use instead of Application Default Credentials
    #[arg(long)]
    access_token: Option<String>,

    /// Send every API call to this origin (emulators)
    #[arg(long)]
    endpoint: Option<Url>,

    /// Print the known resource kinds and exit
    #[arg(long)]
    list_kinds: bool,

    /// Remember --project and --region as defaults
    #[arg(long)]
    save: bool,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_directive(self) -> Option<&'static str> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some("error"),
            LogLevel::Warn => Some("warn"),
            LogLevel::Info => Some("info"),
            LogLevel::Debug => Some("debug"),
            LogLevel::Trace => Some("trace"),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(directive) = level.as_directive() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    // RUST_LOG refines the level, e.g. "gcpscan::jobpool=trace"
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("gcpscan started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("gcpscan").join("gcpscan.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".gcpscan").join("gcpscan.log");
    }
    PathBuf::from("gcpscan.log")
}

#[derive(Debug, Serialize)]
struct ProjectReport {
    project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    account: Option<AccountInfo>,
    resources: BTreeMap<String, Vec<Resource>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    if args.list_kinds {
        for key in get_all_resource_keys() {
            if let Some(def) = get_resource(key) {
                let scope = if def.is_regional() { "regional" } else { "global" };
                println!("{:<22} {:<8} {}", key, scope, def.display_name);
            }
        }
        return Ok(());
    }

    if args.kinds.is_empty() {
        anyhow::bail!("No resource kinds given. Run with --list-kinds to see them");
    }
    if let Some(unknown) = args.kinds.iter().find(|k| get_resource(k).is_none()) {
        anyhow::bail!("Unknown resource kind: {}", unknown);
    }

    let mut config = Config::load();
    config.region = Some(config.effective_region(args.region.as_deref()));
    config.concurrency = Some(config.effective_concurrency(args.concurrency));
    if !args.include_regions.is_empty() {
        config.include_regions = args.include_regions.clone();
    }
    if !args.exclude_regions.is_empty() {
        config.exclude_regions = args.exclude_regions.clone();
    }
    if let Some(bad) = config
        .include_regions
        .iter()
        .chain(config.region.iter())
        .find(|r| !auth::validate_region(r))
    {
        anyhow::bail!("Invalid region: {}", bad);
    }

    let credentials = match &args.access_token {
        Some(token) => TokenSource::Static(token.clone()),
        None => TokenSource::discover().await?,
    };

    let projects = if args.all_projects {
        let client = GcpClient::new(
            Service::ResourceManager,
            &config.effective_region(None),
            "",
            args.endpoint.as_ref(),
            credentials.clone(),
            GcpHttpClient::new()?,
        );
        list_projects(&client)
            .await
            .context("Failed to list projects")?
            .into_iter()
            .map(|p| p.project_id)
            .collect()
    } else if args.project.is_empty() {
        vec![config.effective_project(None)]
    } else {
        args.project.clone()
    };

    if projects.iter().all(|p| p.is_empty()) {
        anyhow::bail!("No GCP project configured. Set GOOGLE_CLOUD_PROJECT or use --project flag");
    }
    if let Some(bad) = projects.iter().find(|p| !auth::validate_project_id(p)) {
        anyhow::bail!("Invalid project ID: {}", bad);
    }

    if args.save {
        config.project_id = projects.first().cloned();
        config.save()?;
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling scan");
            on_interrupt.cancel();
        }
    });

    let opts = ScanOptions {
        policy: if args.partial {
            FailurePolicy::Partial
        } else {
            FailurePolicy::AllOrNothing
        },
        timeout: config.effective_timeout(args.timeout),
        cancel: Some(cancel),
    };

    tracing::info!(projects = ?projects, kinds = ?args.kinds, "starting scan");
    let scans = projects.iter().map(|project_id| {
        let mut options = config.provider_options(project_id);
        options.endpoint = args.endpoint.clone();
        let credentials = credentials.clone();
        let kinds = &args.kinds;
        let opts = &opts;
        async move { scan_project(options, credentials, kinds, opts).await }
    });
    let reports = join_all(scans).await;

    let mut failed = 0;
    let mut output = Vec::with_capacity(reports.len());
    for (project_id, report) in projects.iter().zip(reports) {
        match report {
            Ok(report) => output.push(report),
            Err(err) => {
                failed += 1;
                eprintln!("{}: {}", project_id, format_gcp_error(&err));
                tracing::error!("scan of {} failed: {:#}", project_id, err);
            }
        }
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&output)?),
    }

    if failed > 0 {
        anyhow::bail!("{} of {} projects failed", failed, projects.len());
    }
    Ok(())
}

async fn scan_project(
    options: gcpscan::provider::ProviderOptions,
    credentials: TokenSource,
    kinds: &[String],
    opts: &ScanOptions,
) -> Result<ProjectReport> {
    let provider = Provider::new(options, credentials)?;

    let account = match provider.account_info().await {
        Ok(info) => Some(AccountInfo::clone(&info)),
        Err(err) => {
            tracing::warn!("unable to describe project {}: {:#}", provider.project_id(), err);
            None
        }
    };

    let mut report = ProjectReport {
        project_id: provider.project_id().to_string(),
        account,
        resources: BTreeMap::new(),
        errors: Vec::new(),
    };

    for (kind, listing) in list_many(&provider, kinds, opts).await? {
        if let Some(err) = listing.errors {
            report
                .errors
                .extend(err.failures().iter().map(|f| format!("{}: {}", kind, f.message)));
        }
        report.resources.insert(kind, listing.resources);
    }

    Ok(report)
}
