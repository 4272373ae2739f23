//! Fleet provisioner CLI
//!
//! Provisions and maintains a fleet of cloud compute nodes forming a
//! Kubernetes cluster. The core command, `--cluster`, reconciles the
//! declarative node-group configuration against the persisted cluster
//! state and the live cloud inventory; the remaining flags are state
//! maintenance operations.
//!
//! Credentials come from the environment: `COMPUTE_API_URL`,
//! `COMPUTE_API_TOKEN` and `COMPUTE_PROJECT_ID` for the cloud API;
//! `S3_ENDPOINT`, `S3_BUCKET`, `S3_ACCESS_KEY`, `S3_SECRET_KEY` (and
//! optionally `S3_REGION`) for the state store.

mod commands;
mod config;
mod error;
mod inventory;
mod reconciler;

use crate::config::FleetConfig;
use crate::error::FleetError;
use crate::reconciler::{Reconciler, RunOptions};
use crate::reconciler::provision::ProvisionSettings;
use clap::{CommandFactory, Parser};
use compute_client::ComputeClient;
use fleet_state::StateStore;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "fleet",
    version,
    about = "Declarative cloud node-fleet provisioner for Kubernetes clusters"
)]
struct Args {
    /// Reconcile the cluster against the node-group configuration
    #[arg(long)]
    cluster: bool,

    /// Path to the YAML node-group configuration (built-in default when absent)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cluster name, namespacing the persisted state key
    #[arg(long, default_value = "default")]
    name: String,

    /// Skip alive-verification of persisted nodes
    #[arg(long)]
    force: bool,

    /// Physically delete orphaned nodes (each after confirmation)
    #[arg(long)]
    delnodes: bool,

    /// Report the reconciliation plan without mutating anything
    #[arg(long)]
    dry_run: bool,

    /// Reattach recorded data disks, bypassing full reconciliation
    #[arg(long = "attach-disks")]
    attach_disks: bool,

    /// Refresh persisted state from the live cloud inventory
    #[arg(long)]
    sync: bool,

    /// Print the persisted state
    #[arg(long)]
    state: bool,

    /// Remove a node from persisted state only
    #[arg(long)]
    delnode: Option<String>,

    /// Mark a disk as critical (protected from deletion)
    #[arg(long = "critical-disk")]
    critical_disk: Option<String>,

    /// Set a fresh password on every node
    #[arg(long = "reset-password")]
    reset_password: bool,

    /// Interactive volume garbage collection
    #[arg(long = "prune-volumes")]
    prune_volumes: bool,

    /// Manual node password instead of a generated one
    #[arg(long = "ssh-pass")]
    ssh_pass: Option<String>,

    /// Ansible inventory output path
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

fn state_store(cluster: &str) -> Result<Option<StateStore>, FleetError> {
    let (Ok(endpoint), Ok(bucket)) = (env::var("S3_ENDPOINT"), env::var("S3_BUCKET")) else {
        return Ok(None);
    };
    let region = env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string());
    let access_key = env::var("S3_ACCESS_KEY").unwrap_or_default();
    let secret_key = env::var("S3_SECRET_KEY").unwrap_or_default();
    Ok(Some(StateStore::s3(
        &endpoint,
        &region,
        &bucket,
        &access_key,
        &secret_key,
        cluster,
    )?))
}

fn build_compute_client() -> Result<ComputeClient, FleetError> {
    let base_url = env::var("COMPUTE_API_URL")
        .map_err(|_| FleetError::InvalidConfig("COMPUTE_API_URL is required".to_string()))?;
    let token = env::var("COMPUTE_API_TOKEN")
        .map_err(|_| FleetError::InvalidConfig("COMPUTE_API_TOKEN is required".to_string()))?;
    let project_id = env::var("COMPUTE_PROJECT_ID")
        .map_err(|_| FleetError::InvalidConfig("COMPUTE_PROJECT_ID is required".to_string()))?;
    Ok(ComputeClient::new(base_url, token, project_id)?)
}

#[tokio::main]
async fn main() -> Result<(), FleetError> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let store_required = args.cluster
        || args.sync
        || args.state
        || args.attach_disks
        || args.reset_password
        || args.prune_volumes
        || args.delnode.is_some()
        || args.critical_disk.is_some();
    let store = state_store(&args.name)?;
    let store = match (store, store_required) {
        (Some(store), _) => Some(store),
        (None, true) => {
            return Err(FleetError::InvalidConfig(
                "S3_ENDPOINT and S3_BUCKET are required".to_string(),
            ));
        }
        (None, false) => None,
    };

    // State-only commands need no API client.
    if args.state {
        let store = store.as_ref().ok_or_else(store_missing)?;
        return commands::show_state(store).await;
    }
    if let Some(disk_id) = &args.critical_disk {
        let store = store.as_ref().ok_or_else(store_missing)?;
        return commands::mark_disk_critical(store, disk_id).await;
    }
    if let Some(node) = &args.delnode {
        let store = store.as_ref().ok_or_else(store_missing)?;
        return commands::remove_node_from_state(store, node).await;
    }

    if args.sync {
        let store = store.ok_or_else(store_missing)?;
        let client = build_compute_client()?;
        return commands::sync_state(&client, &store).await;
    }
    if args.attach_disks {
        let store = store.ok_or_else(store_missing)?;
        let client = build_compute_client()?;
        return commands::attach_recorded_disks(&client, &store).await;
    }
    if args.reset_password {
        let store = store.ok_or_else(store_missing)?;
        let client = build_compute_client()?;
        return commands::reset_password(&client, &store).await;
    }
    if args.prune_volumes {
        let store = store.ok_or_else(store_missing)?;
        let client = build_compute_client()?;
        return commands::prune_volumes(&client, &store).await;
    }

    if args.cluster {
        let started = Instant::now();
        let config = FleetConfig::load(args.config.as_deref())?;
        let store = store.ok_or_else(store_missing)?;
        let client = Arc::new(build_compute_client()?);
        let settings = ProvisionSettings::new(config.image.clone(), config.keypairs.clone());
        let reconciler = Reconciler::new(
            client,
            store,
            settings,
            Box::new(|prompt| commands::confirm(prompt)),
        );
        let options = RunOptions {
            force: args.force,
            gc: args.delnodes,
            dry_run: args.dry_run,
        };
        let report = reconciler
            .reconcile(
                &args.name,
                &config,
                options,
                args.ssh_pass.as_deref(),
                args.output.as_deref(),
            )
            .await?;

        info!(
            "reconciliation finished in {}s: {} nodes, {} failures, {} orphans",
            started.elapsed().as_secs(),
            report.nodes.len(),
            report.failures.len(),
            report.orphans.len()
        );
        // Per-node failures are reported, not fatal; the exit code stays 0.
        for failure in &report.failures {
            error!("{}", failure);
        }
        return Ok(());
    }

    Args::command().print_help()?;
    Ok(())
}

fn store_missing() -> FleetError {
    FleetError::InvalidConfig("state store not configured".to_string())
}
