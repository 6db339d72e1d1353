//! C5: Watch Loop / Bootstrap.
//!
//! [`ConfigSource`] is the seam between the core and whatever coordination
//! store backs it (see `SPEC_FULL.md`'s provenance note: modeled on etcd,
//! the way the teacher keeps its xDS/ADS client behind a trait rather than
//! calling a concrete transport directly). [`bootstrap`] turns one
//! `snapshot()` into an ordered burst of [`Change::Create`] events; the
//! streaming loop then forwards whatever the source's `watch()` yields
//! into a bounded channel feeding the [`Reconciler`].

use crate::entity::{Change, Declared};
use crate::reconciler::Reconciler;
use fluxgate_core::prelude::*;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// How long the producer half waits for the reconciler half to make room in
/// the change channel before treating the store as fatally stalled. The
/// channel itself is the primary backpressure mechanism (§5: "the Watch Loop
/// blocks on enqueue if the Reconciler is behind"); this timeout only fires
/// on a genuine, sustained backlog, not a momentary burst.
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StoreError {
	/// The store connection dropped, or a snapshot/watch call failed
	/// outright. Always fatal: the watch loop has no partial-recovery
	/// story, it's expected to exit and let its supervisor reconnect from
	/// scratch with a fresh `bootstrap`.
	#[error("config store unavailable: {0}")]
	Fatal(String),
}

/// An abstract source of declared configuration and the change stream that
/// follows it. Implemented for the real backend by an etcd-backed adapter
/// (kept out of this crate so `fluxgate-control` stays store-agnostic);
/// tests use an in-memory double.
#[async_trait::async_trait]
pub trait ConfigSource: Send + Sync {
	/// A full point-in-time snapshot of the declared configuration.
	async fn snapshot(&self) -> Result<Declared, StoreError>;

	/// The next change after the snapshot (or after the last change
	/// returned). Blocks until one is available; returns `Err` only on an
	/// unrecoverable store failure.
	async fn next_change(&self) -> Result<Change, StoreError>;
}

/// Turns a declared snapshot into the ordered burst of `Create` changes
/// that would produce the same tree from empty: every Host first (each
/// with an empty router), then every Location under it, each Location
/// carrying its Upstream's endpoints as of this snapshot. Upstreams
/// themselves never become `Change`s -- they only exist as the source of
/// the `upstream_endpoints` embedded in a Location create.
pub fn bootstrap(declared: &Declared) -> Vec<Change> {
	let mut changes = Vec::with_capacity(declared.hosts.len() * 2);
	for host in &declared.hosts {
		changes.push(Change::host_create(host.name.clone()));
		for loc in &host.locations {
			let endpoints = declared
				.upstream(&loc.upstream)
				.map(|u| u.endpoints.clone())
				.unwrap_or_else(|| {
					warn!(host = %host.name, location = %loc.name, upstream = %loc.upstream, "location references an undeclared upstream, bootstrapping with no endpoints");
					Vec::new()
				});
			changes.push(Change::location_create(host.name.clone(), loc.clone(), endpoints));
		}
	}
	changes
}

/// Runs the full lifecycle against one `ConfigSource`: snapshot, replay the
/// bootstrap burst through `reconciler`, then run two concurrent halves --
/// a producer that forwards `source.next_change()` into a bounded channel,
/// and a consumer that drains the channel into `reconciler.apply` -- until
/// the source reports a fatal error, the channel stays full past
/// `ENQUEUE_TIMEOUT`, or `shutdown` fires. The two halves run as genuinely
/// concurrent futures (not turns of one `select!` loop), so a burst of
/// several changes resolving `next_change()` back-to-back doesn't race
/// ahead of the consumer draining them.
pub async fn run(
	source: &dyn ConfigSource,
	reconciler: &Reconciler,
	channel_capacity: usize,
	shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<(), StoreError> {
	let declared = source.snapshot().await?;
	for change in bootstrap(&declared) {
		reconciler.apply(change);
	}
	info!(hosts = declared.hosts.len(), upstreams = declared.upstreams.len(), "bootstrap applied");

	let (tx, mut rx) = mpsc::channel::<Change>(channel_capacity);
	let mut producer_shutdown = shutdown.clone();
	let mut consumer_shutdown = shutdown;

	let produce = async {
		loop {
			tokio::select! {
				biased;
				_ = producer_shutdown.changed() => {
					if *producer_shutdown.borrow() {
						info!("watch loop producer shutting down");
						return Ok(());
					}
				}
				next = source.next_change() => {
					let change = next?;
					match tokio::time::timeout(ENQUEUE_TIMEOUT, tx.send(change)).await {
						Ok(Ok(())) => {}
						Ok(Err(_)) => return Ok(()), // consumer half exited first
						Err(_elapsed) => {
							return Err(StoreError::Fatal(
								"change channel stayed full past the enqueue timeout, reconciler stalled".into(),
							));
						}
					}
				}
			}
		}
	};

	let consume = async {
		loop {
			tokio::select! {
				biased;
				_ = consumer_shutdown.changed() => {
					if *consumer_shutdown.borrow() {
						info!("watch loop consumer shutting down");
						return;
					}
				}
				next = rx.recv() => {
					match next {
						Some(change) => reconciler.apply(change),
						None => return, // producer half exited first
					}
				}
			}
		}
	};

	tokio::select! {
		result = produce => result,
		_ = consume => Ok(()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entity::{EndpointSpec, Host, Location, Upstream};

	#[test]
	fn bootstrap_orders_hosts_before_their_locations() {
		let declared = Declared {
			hosts: vec![Host {
				name: "h1".into(),
				locations: vec![Location {
					name: "loc1".into(),
					path: "/a".into(),
					upstream: "up1".into(),
				}],
			}],
			upstreams: vec![Upstream {
				name: "up1".into(),
				endpoints: vec![EndpointSpec {
					id: "e1".into(),
					url: "http://10.0.0.1:80".into(),
				}],
			}],
		};
		let changes = bootstrap(&declared);
		assert_eq!(changes.len(), 2);
		assert!(matches!(changes[0], Change::Host { .. }));
		match &changes[1] {
			Change::Location { upstream_endpoints, .. } => assert_eq!(upstream_endpoints.len(), 1),
			_ => panic!("expected a location change"),
		}
	}

	#[test]
	fn bootstrap_tolerates_an_undeclared_upstream() {
		let declared = Declared {
			hosts: vec![Host {
				name: "h1".into(),
				locations: vec![Location {
					name: "loc1".into(),
					path: "/a".into(),
					upstream: "missing".into(),
				}],
			}],
			upstreams: vec![],
		};
		let changes = bootstrap(&declared);
		match &changes[1] {
			Change::Location { upstream_endpoints, .. } => assert!(upstream_endpoints.is_empty()),
			_ => panic!("expected a location change"),
		}
	}
}
