use std::net::SocketAddr;
use std::sync::Arc;

use kube::Client;
use node_dns_controller::config::LogFormat;
use node_dns_controller::dns_provider::{CloudflareDnsProvider, DnsProvider};
use node_dns_controller::intent_source::KubeIntentSource;
use node_dns_controller::node_source::KubeNodeSource;
use node_dns_controller::observability::Observability;
use node_dns_controller::scheduler::Scheduler;
use node_dns_controller::{metrics, Config, Reconciler};
use tracing::{error, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env().map_err(|e| {
        eprintln!("configuration error: {e}");
        e
    })?;

    init_tracing(&config);
    metrics::init_metrics();

    info!(
        sync_interval_s = config.dns_sync_interval.as_secs(),
        health_check_interval_s = config.health_check_interval.as_secs(),
        "starting node-dns-controller",
    );

    let client = match &config.k8s_config_path {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)?;
            let options = kube::config::KubeConfigOptions::default();
            let client_config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &options).await?;
            Client::try_from(client_config)?
        }
        None => Client::try_default().await?,
    };

    let node_source = Arc::new(KubeNodeSource::new(
        client.clone(),
        config.deletion_taints.clone(),
        config.max_retries,
        config.retry_delay,
    ));
    let dns_provider = Arc::new(CloudflareDnsProvider::new(
        config.cloudflare_api_token.clone(),
        config.max_retries,
        config.retry_delay,
    ));
    let intent_source = Arc::new(KubeIntentSource::new(client.clone()));

    dns_provider.init().await?;

    let reconciler = Arc::new(Reconciler::new(
        node_source.clone(),
        dns_provider.clone(),
        intent_source,
        config.deletion_taints.clone(),
    ));

    // Prime state from upstream truth before accepting traffic. This
    // process persists nothing across restarts.
    let initial_report = reconciler.full_reconcile().await;
    info!(
        created = initial_report.records_created,
        deleted = initial_report.records_deleted,
        errors = initial_report.errors.len(),
        "initial synchronization complete"
    );

    let scheduler = Arc::new(Scheduler::new(
        reconciler.clone(),
        node_source,
        config.dns_sync_interval,
        config.health_check_interval,
    ));
    let handles = scheduler.spawn();

    let health_server = if config.enable_health_server {
        let observability = Observability::new(reconciler.clone());
        let addr = SocketAddr::from(([0, 0, 0, 0], config.health_port));
        Some(tokio::spawn(async move {
            if let Err(e) = node_dns_controller::health_server::serve(observability, addr).await {
                error!(error = %e, "health server exited");
            }
        }))
    } else {
        None
    };

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping watch stream and timers");

    scheduler.shutdown();
    for handle in handles {
        let _ = handle.await;
    }
    if let Some(h) = health_server {
        h.abort();
    }

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::filter::Targets::new()
        .with_target("node_dns_controller", level_from_str(&config.log_level));

    match config.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Console => {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer())
                .with(filter)
                .init();
        }
    }
}

fn level_from_str(level: &str) -> tracing::Level {
    level.parse().unwrap_or(tracing::Level::INFO)
}

/// Waits for Ctrl+C or, on unix, SIGTERM, whichever comes first, so the
/// process can shut down cooperatively under either an interactive session
/// or an orchestrator-issued termination.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received Ctrl+C"),
            _ = terminate.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("received Ctrl+C");
    }
}
