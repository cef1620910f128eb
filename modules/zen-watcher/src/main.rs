//! Composition root: parses configuration, connects to the cluster
//! API, wires Discovery → Source Configuration Store → per-source
//! {Adapter, Pipeline Processor} → Persistor, starts the Garbage Collector
//! and the health/webhook HTTP server, and waits for SIGTERM/Ctrl-C to
//! drain everything within a bounded deadline.
//!
//! Grounded on `rootsignal-scout::main` (`Config::from_env` → connect →
//! construct → run → report shape) generalized from "one scout run" to
//! "run every configured source's adapter + pipeline until shutdown."

mod secrets;
mod server;
mod wiring;

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use zen_common::Config;
use zen_config_store::{Backend, ConfigStore};

const CLUSTER_CONNECT_RETRIES: u32 = 5;
const CLUSTER_CONNECT_BACKOFF_BASE_SECS: u64 = 1;
const CLUSTER_CONNECT_BACKOFF_CAP_SECS: u64 = 30;
const DRAIN_DEADLINE_SECS: u64 = 30;

#[derive(Parser)]
#[command(name = "zen-watcher")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the `SourceConfig` and `Observation` CRD manifests as YAML and exit.
    PrintCrd,
}

fn init_logging(config: &Config) {
    let directive = format!("zen={}", config.log_level);
    let filter = EnvFilter::from_default_env().add_directive(
        directive
            .parse()
            .unwrap_or_else(|_| "zen=info".parse().expect("static directive parses")),
    );
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_crd() -> anyhow::Result<()> {
    let source_config_crd = zen_config_store::SourceConfigResource::crd();
    let observation_crd = zen_persist::Observation::crd();
    println!("{}", serde_yaml::to_string(&source_config_crd)?);
    println!("---");
    println!("{}", serde_yaml::to_string(&observation_crd)?);
    Ok(())
}

/// Exit code 2: cluster API unreachable at startup beyond the
/// retry budget.
async fn connect_with_retry() -> anyhow::Result<kube::Client> {
    let mut backoff = CLUSTER_CONNECT_BACKOFF_BASE_SECS;
    for attempt in 1..=CLUSTER_CONNECT_RETRIES {
        match kube::Client::try_default().await {
            Ok(client) => return Ok(client),
            Err(e) if attempt < CLUSTER_CONNECT_RETRIES => {
                warn!(attempt, error = %e, "cluster API unreachable, retrying");
                tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
                backoff = (backoff * 2).min(CLUSTER_CONNECT_BACKOFF_CAP_SECS);
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("loop returns on both the last success and the last failure")
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::from_env();

    if matches!(cli.command, Some(Command::PrintCrd)) {
        if let Err(e) = print_crd() {
            eprintln!("failed to render CRD manifests: {e}");
            return ExitCode::from(1);
        }
        return ExitCode::SUCCESS;
    }

    init_logging(&config);
    info!("zen-watcher starting");
    config.log_redacted();

    let client = match connect_with_retry().await {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "cluster API unreachable at startup, giving up");
            return ExitCode::from(2);
        }
    };

    let backend = match &config.config_path {
        Some(dir) => Backend::FileSet {
            dir: std::path::PathBuf::from(dir),
        },
        None => Backend::Cluster {
            client: client.clone(),
            namespace: config.namespace.clone(),
        },
    };
    let config_store = Arc::new(ConfigStore::new(backend));
    if let Err(e) = config_store.load_initial().await {
        error!(error = %e, "initial SourceConfig load failed");
        return ExitCode::from(1);
    }

    let cancel = CancellationToken::new();
    let mut handles = Vec::new();

    let persistor = Arc::new(zen_persist::Persistor::new(client.clone()));
    let resolver = zen_discovery::Resolver::new(client.clone());
    let gc = zen_gc::GarbageCollector::new(client.clone(), config.namespace.clone(), config_store.clone());
    handles.push(tokio::spawn(gc.run(cancel.clone())));

    {
        let store = config_store.clone();
        let c = cancel.clone();
        handles.push(tokio::spawn(async move { store.run(c).await }));
    }

    let snapshot = config_store.snapshot();
    let mut webhook_router = axum::Router::new();
    let mut readiness = Vec::new();
    for source in snapshot.sources.values() {
        match wiring::spawn_source(
            source,
            &client,
            &resolver,
            &config.namespace,
            &persistor,
            &cancel,
            &mut handles,
            &mut webhook_router,
        )
        .await
        {
            Ok(health) => readiness.extend(health),
            Err(e) => error!(source = %source.name, error = %e, "failed to start source, skipping"),
        }
    }

    handles.push(tokio::spawn(server::serve(
        webhook_router,
        readiness,
        config.webhook_host.clone(),
        config.webhook_port,
        cancel.clone(),
    )));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining");
    cancel.cancel();

    let drain = tokio::time::timeout(
        std::time::Duration::from_secs(DRAIN_DEADLINE_SECS),
        futures::future::join_all(handles),
    );
    if drain.await.is_err() {
        warn!("drain deadline exceeded, exiting anyway");
    }

    info!("zen-watcher stopped");
    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
