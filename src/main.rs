mod config;
mod metrics;
mod store_etcd;

use anyhow::{Context, Result};
use clap::Parser;
use fluxgate_control::reconciler::{Reconciler, ReconcilerOptions};
use fluxgate_control::routing::RoutingTree;
use fluxgate_control::watch;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use crate::metrics::App as MetricsApp;
use crate::store_etcd::EtcdConfigSource;

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();

	let args = config::Args::parse();

	if let Some(path) = &args.pid_file {
		tokio::fs::write(path, std::process::id().to_string())
			.await
			.with_context(|| format!("writing pid file {}", path.display()))?;
	}

	if args.store_endpoints.is_empty() {
		anyhow::bail!("at least one --store-endpoints value is required");
	}

	let mut registry = Registry::default();
	let control_metrics = Arc::new(fluxgate_control::metrics::Metrics::new(registry.sub_registry_with_prefix("fluxgate")));

	let tree = Arc::new(RoutingTree::new());
	let reconciler = Reconciler::new(tree.clone(), ReconcilerOptions::default()).with_metrics(control_metrics);

	let source = EtcdConfigSource::connect(&args.store_endpoints, args.store_root.clone())
		.await
		.context("connecting to config store")?;

	let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
	let mut run_set = JoinSet::new();

	let channel_capacity = args.change_channel_capacity;
	run_set.spawn(async move {
		match watch::run(&source, &reconciler, channel_capacity, shutdown_rx).await {
			Ok(()) => Ok(()),
			Err(e) => {
				tracing::error!(error = %e, "watch loop exited");
				Err(anyhow::anyhow!(e))
			}
		}
	});

	let admin_addr = args.admin_addr;
	run_set.spawn(async move {
		let listener = tokio::net::TcpListener::bind(admin_addr).await?;
		let app = MetricsApp::new(Arc::new(registry));
		axum::serve(listener, app.router()).await?;
		Ok(())
	});

	run_set.spawn(async move {
		tokio::signal::ctrl_c().await?;
		tracing::info!("received ctrl-c, shutting down");
		let _ = shutdown_tx.send(true);
		Ok(())
	});

	while let Some(result) = run_set.join_next().await {
		result??;
	}
	Ok(())
}
