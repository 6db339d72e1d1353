//! CLI surface. The control plane's opaque configuration (store address,
//! root key, listen addresses) is the only thing the binary exposes --
//! everything else (Hosts, Locations, Upstreams, Endpoints) is owned by the
//! store, never by a local config file.

use clap::Parser;
use std::net::SocketAddr;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
	/// Comma-separated etcd endpoints, e.g. "http://127.0.0.1:2379".
	#[arg(long, value_name = "addr", env = "FLUXGATE_STORE_ENDPOINTS", value_delimiter = ',')]
	pub store_endpoints: Vec<String>,

	/// Key prefix under which Hosts, Locations, and Upstreams are stored.
	#[arg(long, value_name = "key", env = "FLUXGATE_STORE_ROOT", default_value = "/fluxgate")]
	pub store_root: String,

	/// Address the dispatch-facing API listens on. The core crate has no
	/// notion of HTTP; this is read by a forwarder embedding this binary's
	/// reconciled [`fluxgate_control::RoutingTree`], not used directly here.
	#[arg(long, value_name = "addr", env = "FLUXGATE_PROXY_ADDR", default_value = "0.0.0.0:8080")]
	pub proxy_addr: SocketAddr,

	/// Address the Prometheus `/metrics` endpoint listens on.
	#[arg(long, value_name = "addr", env = "FLUXGATE_ADMIN_ADDR", default_value = "0.0.0.0:19000")]
	pub admin_addr: SocketAddr,

	/// Capacity of the bounded channel between the watch loop and the
	/// reconciler.
	#[arg(long, value_name = "n", env = "FLUXGATE_CHANGE_CHANNEL_CAPACITY", default_value_t = 100)]
	pub change_channel_capacity: usize,

	/// Optional file to write this process's pid to, for supervisors that
	/// expect one.
	#[arg(long, value_name = "path", env = "FLUXGATE_PID_FILE")]
	pub pid_file: Option<std::path::PathBuf>,
}
