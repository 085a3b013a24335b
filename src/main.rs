//! tf-reconciler CLI entrypoint.
//!
//! This is the main entrypoint for the tf-reconciler command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tf_reconciler::cli::{Cli, Commands, LogFormat, OutputFormatter, PlanCommands};
use tf_reconciler::config::{ConfigParser, ConfigValidator, ControllerSettings, StoreBackend};
use tf_reconciler::controller::{Backoff, Controller, Reconciler, ReconcilerOptions};
use tf_reconciler::engine::TerraformEngine;
use tf_reconciler::error::{ConfigError, ReconcilerError, Result};
use tf_reconciler::resource::{LocalResourceStore, ResourceId, ResourceStore};
use tf_reconciler::source::{IndexSourceProvider, WorkspaceMaterializer};
use tf_reconciler::store::{
    generate_holder_id, BlobStore, ControllerLease, LedgerStore, LocalBlobStore, PlanStore,
    S3BlobStore,
};

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_format);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `--verbose` forces debug; otherwise `RUST_LOG` applies, defaulting to info.
fn init_logging(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let settings = load_settings(cli.config.as_ref())?;

    match cli.command {
        Commands::Run { workers } => cmd_run(settings, workers).await,
        Commands::Reconcile { resource } => cmd_reconcile(&settings, &resource, &formatter).await,
        Commands::Status { resource } => {
            cmd_status(&settings, resource.as_deref(), &formatter).await
        }
        Commands::Plan {
            command: PlanCommands::Show { resource },
        } => cmd_plan_show(&settings, &resource, &formatter).await,
        Commands::Approve { resource, plan } => {
            cmd_approve(&settings, &resource, plan, &formatter).await
        }
        Commands::Validate { warnings } => cmd_validate(&settings, warnings, &formatter).await,
    }
}

/// Run the controller until Ctrl-C.
async fn cmd_run(settings: ControllerSettings, workers: Option<usize>) -> Result<()> {
    let resources = resource_store(&settings);
    let blobs = blob_store(&settings).await?;
    let reconciler = build_reconciler(&settings, Arc::clone(&resources), Arc::clone(&blobs))?;

    let holder = generate_holder_id();
    let lease = ControllerLease::acquire(Arc::clone(&blobs), &holder).await?;
    info!("Controller {holder} holds the store lease");

    Controller::new(
        Arc::new(reconciler),
        resources,
        Backoff::from_settings(&settings.backoff)?,
    )
    .with_workers(workers.unwrap_or(settings.workers))
    .with_poll_interval(settings.poll_interval()?)
    .with_lease(lease)
    .run(shutdown_signal())
    .await
}

/// Run one reconciliation pass.
async fn cmd_reconcile(
    settings: &ControllerSettings,
    resource: &str,
    formatter: &OutputFormatter,
) -> Result<()> {
    let id: ResourceId = resource.parse()?;
    let resources = resource_store(settings);
    let blobs = blob_store(settings).await?;
    let reconciler = build_reconciler(settings, Arc::clone(&resources), Arc::clone(&blobs))?;

    // Hold the lease so a running controller is not raced
    let lease = ControllerLease::acquire(blobs, &generate_holder_id()).await?;
    let outcome = reconciler.reconcile(&id).await;
    if let Err(e) = lease.release().await {
        error!("Failed to release the controller lease: {e}");
    }
    let outcome = outcome?;

    let status = resources.get(&id).await.map(|r| r.status).unwrap_or_default();
    println!("{}", formatter.format_outcome(&id, &outcome, &status));
    Ok(())
}

/// Show resource status.
async fn cmd_status(
    settings: &ControllerSettings,
    resource: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let resources = resource_store(settings);

    if let Some(resource) = resource {
        let id: ResourceId = resource.parse()?;
        let resource = resources.get(&id).await?;
        println!("{}", formatter.format_resource(&resource));
        return Ok(());
    }

    let mut all = Vec::new();
    for id in resources.list().await?.into_keys() {
        all.push(resources.get(&id).await?);
    }
    println!("{}", formatter.format_status(&all));
    Ok(())
}

/// List stored plans.
async fn cmd_plan_show(
    settings: &ControllerSettings,
    resource: &str,
    formatter: &OutputFormatter,
) -> Result<()> {
    let id: ResourceId = resource.parse()?;
    let resource = resource_store(settings).get(&id).await?;
    let blobs = blob_store(settings).await?;

    let workspace = &resource.spec.workspace;
    let plans = PlanStore::new(Arc::clone(&blobs)).list(&id, workspace).await?;
    let ledger = LedgerStore::new(blobs).load(&id, workspace).await?;

    println!("{}", formatter.format_plans(&id, &plans, &ledger));
    Ok(())
}

/// Approve a plan.
async fn cmd_approve(
    settings: &ControllerSettings,
    resource: &str,
    plan: Option<String>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let id: ResourceId = resource.parse()?;
    let resources = resource_store(settings);
    let current = resources.get(&id).await?;

    let fingerprint = match plan {
        Some(plan) => plan,
        None if !current.status.plan.pending.is_empty() => current.status.plan.pending,
        None => {
            return Err(ReconcilerError::internal(format!(
                "{id} has no pending plan; pass --plan to approve a specific fingerprint"
            )));
        }
    };

    resources.set_approval(&id, &fingerprint).await?;
    info!("Set approvePlan of {id} to {fingerprint}");
    println!("{}", formatter.success(&format!("Approved {fingerprint} for {id}")));
    Ok(())
}

/// Validate settings and manifests.
async fn cmd_validate(
    settings: &ControllerSettings,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let validator = ConfigValidator::new();
    let mut results = vec![(
        String::from("settings"),
        validator.validate(settings).map_err(|e| e.to_string()),
    )];

    let resources = resource_store(settings);
    for id in resources.list().await?.into_keys() {
        let result = match resources.get(&id).await {
            Ok(resource) => validator
                .validate_resource(&resource)
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        results.push((id.to_string(), result));
    }

    println!("{}", formatter.format_validation(&results, show_warnings));

    let invalid = results.iter().filter(|(_, r)| r.is_err()).count();
    if invalid > 0 {
        return Err(ConfigError::validation_general(format!(
            "{invalid} of {} documents are invalid",
            results.len()
        ))
        .into());
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads settings from `--config`, or the discovered file, or defaults.
fn load_settings(config_path: Option<&PathBuf>) -> Result<ControllerSettings> {
    let settings = match config_path {
        Some(path) => {
            debug!("Loading settings from: {}", path.display());
            let parser = ConfigParser::new()
                .with_base_path(path.parent().unwrap_or_else(|| Path::new(".")));
            parser.load_dotenv()?;
            parser.load_with_env(path)?
        }
        None => {
            let parser = ConfigParser::new().with_base_path(".");
            parser.load_dotenv()?;
            parser.load_or_default(".")?
        }
    };

    ConfigValidator::new().validate(&settings)?;
    Ok(settings)
}

fn resource_store(settings: &ControllerSettings) -> Arc<dyn ResourceStore> {
    Arc::new(LocalResourceStore::new(&settings.resources_dir))
}

/// Creates the blob store selected by the settings.
async fn blob_store(settings: &ControllerSettings) -> Result<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match settings.store.backend {
        StoreBackend::Local => Arc::new(LocalBlobStore::new(settings.store_path())),
        StoreBackend::S3 => {
            let bucket = settings
                .store
                .bucket
                .as_deref()
                .ok_or_else(|| ConfigError::validation("S3 bucket not configured", "store.bucket"))?;
            Arc::new(
                S3BlobStore::new(
                    bucket,
                    settings.store.prefix.as_deref(),
                    settings.store.region.as_deref(),
                )
                .await?,
            )
        }
    };
    Ok(store)
}

fn build_reconciler(
    settings: &ControllerSettings,
    resources: Arc<dyn ResourceStore>,
    blobs: Arc<dyn BlobStore>,
) -> Result<Reconciler> {
    let workspace_root = settings.workspace_root();
    let cache_dir = workspace_root.with_file_name("artifacts");
    let sources = IndexSourceProvider::new(&settings.sources_index, cache_dir);
    let engine = TerraformEngine::from_settings(&settings.engine);

    Ok(Reconciler::new(
        resources,
        Arc::new(sources),
        Arc::new(engine),
        blobs,
        WorkspaceMaterializer::new(workspace_root),
    )
    .with_options(ReconcilerOptions {
        engine_timeout: settings.engine_timeout()?,
        resync_interval: settings.resync_interval()?,
    }))
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
