//! C4: Reconciler -- the single writer that turns [`Change`] events into
//! edits against the [`RoutingTree`].
//!
//! Upstream membership doesn't live in the tree directly: an `Upstream` is
//! only ever consulted through the Locations that reference it, so the
//! Reconciler keeps its own `locations_by_upstream` index and fans an
//! Endpoint change out to every [`LocationBalancer`] currently backed by
//! that Upstream, rather than re-querying the store. This mirrors the
//! `ServiceStore` / `EndpointSet` split in the teacher: the store tracks
//! declared members, a separate index tracks who's currently subscribed.

use crate::balancer::{BalancerError, LocationBalancer};
use crate::endpoint::Endpoint;
use crate::entity::{Action, Change, EndpointSpec, HostName, LocationName, UpstreamName};
use crate::metrics::{ChangeApplied, ChangeDropped, Metrics};
use crate::routing::{PathRouter, RoutingTree};
use fluxgate_core::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
	#[error("host {0} has no routing entry")]
	UnknownHost(HostName),
	#[error("location {0} already exists under its host")]
	DuplicateLocation(LocationName),
	#[error("location {0}: {1}")]
	Routing(LocationName, #[source] crate::routing::RoutingError),
	#[error("endpoint change for upstream {0}: {1}")]
	Endpoint(UpstreamName, #[source] BalancerError),
}

/// How a Host `create` for an already-present hostname is handled. The
/// store is expected never to emit this, but a watch stream that replays a
/// create after a missed delete is a real failure mode worth a named
/// policy rather than a silent special case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostDuplicatePolicy {
	/// Drop the old path-router (and everything under it) and install a
	/// fresh, empty one.
	Replace,
	/// Leave the existing router alone.
	Ignore,
}

#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
	pub on_duplicate_host: HostDuplicatePolicy,
}

impl Default for ReconcilerOptions {
	fn default() -> Self {
		ReconcilerOptions {
			on_duplicate_host: HostDuplicatePolicy::Replace,
		}
	}
}

struct LocationRef {
	host: HostName,
	balancer: std::sync::Arc<LocationBalancer>,
}

/// Applies [`Change`] events to a [`RoutingTree`]. Not `Sync` by contract
/// rather than by type: the watch loop is expected to hold exactly one
/// `Reconciler` and feed it changes from a single task, even though nothing
/// here stops a caller from wrapping it in an `Arc<Mutex<_>>` and calling
/// from many.
pub struct Reconciler {
	tree: std::sync::Arc<RoutingTree>,
	options: ReconcilerOptions,
	locations_by_upstream: RwLock<HashMap<UpstreamName, Vec<LocationRef>>>,
	metrics: Option<Arc<Metrics>>,
}

impl Reconciler {
	pub fn new(tree: std::sync::Arc<RoutingTree>, options: ReconcilerOptions) -> Reconciler {
		Reconciler {
			tree,
			options,
			locations_by_upstream: RwLock::new(HashMap::new()),
			metrics: None,
		}
	}

	/// Attaches a metrics recorder; every subsequent `apply` records a
	/// `ChangeApplied`/`ChangeDropped` event. Separate from `new` so tests
	/// and callers that don't care about metrics don't need a registry.
	pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Reconciler {
		self.metrics = Some(metrics);
		self
	}

	pub fn tree(&self) -> &std::sync::Arc<RoutingTree> {
		&self.tree
	}

	fn record_applied(&self, kind: &'static str) {
		if let Some(metrics) = &self.metrics {
			metrics.record(&ChangeApplied { kind }, ());
		}
	}

	fn record_dropped(&self, kind: &'static str, reason: &'static str) {
		if let Some(metrics) = &self.metrics {
			metrics.record(&ChangeDropped { kind, reason }, ());
		}
	}

	#[tracing::instrument(level = "info", name = "reconciler_apply", skip_all, fields(kind = change_kind(&change)))]
	pub fn apply(&self, change: Change) {
		match change {
			Change::Host { action, host } => self.apply_host(action, host),
			Change::Location {
				action,
				parent,
				name,
				path,
				upstream,
				upstream_endpoints,
			} => self.apply_location(action, parent, name, path, upstream, upstream_endpoints),
			Change::Endpoint { action, parent, id, url } => self.apply_endpoint(action, parent, id, url),
		}
	}

	fn apply_host(&self, action: Action, host: HostName) {
		match action {
			Action::Create => {
				if self.tree.get_router(&host).is_some() {
					match self.options.on_duplicate_host {
						HostDuplicatePolicy::Ignore => {
							debug!(%host, "host create ignored, router already present");
							self.record_dropped("host", "duplicate_ignored");
							return;
						}
						HostDuplicatePolicy::Replace => {
							warn!(%host, "host create replacing an existing router");
						}
					}
				}
				self.tree.set_router(host, PathRouter::new());
				self.record_applied("host");
			}
			Action::Delete => {
				let existed = self.tree.get_router(&host).is_some();
				if !existed {
					warn!(%host, "host delete for a host with no routing entry");
				}
				self.drop_locations_for_host(&host);
				self.tree.remove_router(&host);
				if existed {
					self.record_applied("host");
				} else {
					self.record_dropped("host", "not_found");
				}
			}
		}
	}

	fn apply_location(
		&self,
		action: Action,
		parent: HostName,
		name: LocationName,
		path: Strng,
		upstream: UpstreamName,
		upstream_endpoints: Vec<EndpointSpec>,
	) {
		let Some(router) = self.tree.get_router(&parent) else {
			warn!(%parent, location = %name, "location change for unknown host, dropped");
			self.record_dropped("location", "unknown_host");
			return;
		};
		match action {
			Action::Create => {
				let balancer = LocationBalancer::new(name.clone());
				for spec in upstream_endpoints {
					match Endpoint::make(spec.id.clone(), &spec.url) {
						Ok(ep) => {
							if let Err(e) = balancer.add(ep) {
								warn!(location = %name, error = %e, "duplicate endpoint in initial fan-out, skipped");
							}
						}
						Err(e) => warn!(location = %name, endpoint = %spec.id, error = %e, "malformed initial endpoint, skipped"),
					}
				}
				if let Err(e) = router.add(path, balancer.clone()) {
					warn!(%parent, location = %name, error = %e, "duplicate location path, dropped");
					self.record_dropped("location", "duplicate_path");
					return;
				}
				self.locations_by_upstream
					.write()
					.expect("lock poisoned")
					.entry(upstream)
					.or_default()
					.push(LocationRef {
						host: parent,
						balancer,
					});
				self.record_applied("location");
			}
			Action::Delete => {
				let Some(balancer) = router.get_by_id(&name) else {
					warn!(%parent, location = %name, "location delete for an unregistered location");
					self.record_dropped("location", "not_found");
					return;
				};
				router.remove(&balancer);
				self.forget_location(&balancer);
				self.record_applied("location");
			}
		}
	}

	fn apply_endpoint(&self, action: Action, parent: UpstreamName, id: crate::entity::EndpointId, url: String) {
		let index = self.locations_by_upstream.read().expect("lock poisoned");
		let Some(refs) = index.get(&parent) else {
			debug!(upstream = %parent, "endpoint change for an upstream with no subscribed locations");
			self.record_dropped("endpoint", "no_subscribers");
			return;
		};
		match action {
			Action::Create => {
				let endpoint = match Endpoint::make(id.clone(), &url) {
					Ok(ep) => ep,
					Err(e) => {
						warn!(upstream = %parent, endpoint = %id, error = %e, "malformed endpoint url, dropped");
						self.record_dropped("endpoint", "parse_error");
						return;
					}
				};
				for loc in refs {
					if let Err(e) = loc.balancer.add(endpoint.clone()) {
						debug!(host = %loc.host, location = %loc.balancer.name(), error = %e, "endpoint add no-op, already present");
					}
				}
				self.record_applied("endpoint");
			}
			Action::Delete => {
				for loc in refs {
					if let Err(e) = loc.balancer.remove(&id) {
						debug!(host = %loc.host, location = %loc.balancer.name(), error = %e, "endpoint delete no-op, not present");
					}
				}
				self.record_applied("endpoint");
			}
		}
	}

	fn drop_locations_for_host(&self, host: &HostName) {
		self.locations_by_upstream
			.write()
			.expect("lock poisoned")
			.retain(|_, refs| {
				refs.retain(|r| &r.host != host);
				!refs.is_empty()
			});
	}

	fn forget_location(&self, balancer: &std::sync::Arc<LocationBalancer>) {
		self.locations_by_upstream
			.write()
			.expect("lock poisoned")
			.retain(|_, refs| {
				refs.retain(|r| !crate::balancer::same_balancer(&r.balancer, balancer));
				!refs.is_empty()
			});
	}
}

fn change_kind(change: &Change) -> &'static str {
	match change {
		Change::Host { .. } => "host",
		Change::Location { .. } => "location",
		Change::Endpoint { .. } => "endpoint",
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entity::Location;

	fn fresh() -> Reconciler {
		Reconciler::new(std::sync::Arc::new(RoutingTree::new()), ReconcilerOptions::default())
	}

	#[test]
	fn location_create_fans_out_declared_endpoints() {
		let r = fresh();
		r.apply(Change::host_create("h1"));
		r.apply(Change::location_create(
			"h1",
			Location {
				name: "loc1".into(),
				path: "/api".into(),
				upstream: "up1".into(),
			},
			vec![EndpointSpec {
				id: "e1".into(),
				url: "http://10.0.0.1:80".into(),
			}],
		));
		let bal = r.tree().dispatch("h1", "/api").unwrap();
		assert_eq!(bal.len(), 1);
	}

	#[test]
	fn endpoint_create_reaches_all_subscribed_locations() {
		let r = fresh();
		r.apply(Change::host_create("h1"));
		r.apply(Change::location_create(
			"h1",
			Location {
				name: "loc1".into(),
				path: "/a".into(),
				upstream: "shared".into(),
			},
			vec![],
		));
		r.apply(Change::location_create(
			"h1",
			Location {
				name: "loc2".into(),
				path: "/b".into(),
				upstream: "shared".into(),
			},
			vec![],
		));
		r.apply(Change::endpoint_create(
			"shared",
			EndpointSpec {
				id: "e1".into(),
				url: "http://10.0.0.1:80".into(),
			},
		));
		assert_eq!(r.tree().dispatch("h1", "/a").unwrap().len(), 1);
		assert_eq!(r.tree().dispatch("h1", "/b").unwrap().len(), 1);
	}

	#[test]
	fn endpoint_delete_removes_from_all_subscribed_locations() {
		let r = fresh();
		r.apply(Change::host_create("h1"));
		r.apply(Change::location_create(
			"h1",
			Location {
				name: "loc1".into(),
				path: "/a".into(),
				upstream: "shared".into(),
			},
			vec![EndpointSpec {
				id: "e1".into(),
				url: "http://10.0.0.1:80".into(),
			}],
		));
		r.apply(Change::endpoint_delete("shared", "e1"));
		assert_eq!(r.tree().dispatch("h1", "/a").unwrap().len(), 0);
	}

	#[test]
	fn location_delete_stops_further_endpoint_fanout() {
		let r = fresh();
		r.apply(Change::host_create("h1"));
		r.apply(Change::location_create(
			"h1",
			Location {
				name: "loc1".into(),
				path: "/a".into(),
				upstream: "up1".into(),
			},
			vec![],
		));
		r.apply(Change::location_delete("h1", "loc1"));
		assert!(r.tree().dispatch("h1", "/a").is_err());
		// An endpoint change for the now-unreferenced upstream must not panic
		// or resurrect the location.
		r.apply(Change::endpoint_create(
			"up1",
			EndpointSpec {
				id: "e1".into(),
				url: "http://10.0.0.1:80".into(),
			},
		));
	}

	#[test]
	fn host_delete_drops_its_locations_from_the_fanout_index() {
		let r = fresh();
		r.apply(Change::host_create("h1"));
		r.apply(Change::location_create(
			"h1",
			Location {
				name: "loc1".into(),
				path: "/a".into(),
				upstream: "up1".into(),
			},
			vec![],
		));
		r.apply(Change::host_delete("h1"));
		assert!(r.tree().get_router("h1").is_none());
		// No subscribers remain; this must be a no-op, not a panic.
		r.apply(Change::endpoint_create(
			"up1",
			EndpointSpec {
				id: "e1".into(),
				url: "http://10.0.0.1:80".into(),
			},
		));
	}

	#[test]
	fn location_create_for_unknown_host_is_dropped() {
		let r = fresh();
		r.apply(Change::location_create(
			"ghost",
			Location {
				name: "loc1".into(),
				path: "/a".into(),
				upstream: "up1".into(),
			},
			vec![],
		));
		assert!(r.tree().get_router("ghost").is_none());
	}

	#[test]
	fn duplicate_host_create_replace_policy_resets_locations() {
		let r = fresh();
		r.apply(Change::host_create("h1"));
		r.apply(Change::location_create(
			"h1",
			Location {
				name: "loc1".into(),
				path: "/a".into(),
				upstream: "up1".into(),
			},
			vec![],
		));
		r.apply(Change::host_create("h1"));
		assert!(r.tree().dispatch("h1", "/a").is_err());
	}

	#[test]
	fn duplicate_host_create_ignore_policy_keeps_locations() {
		let r = Reconciler::new(
			std::sync::Arc::new(RoutingTree::new()),
			ReconcilerOptions {
				on_duplicate_host: HostDuplicatePolicy::Ignore,
			},
		);
		r.apply(Change::host_create("h1"));
		r.apply(Change::location_create(
			"h1",
			Location {
				name: "loc1".into(),
				path: "/a".into(),
				upstream: "up1".into(),
			},
			vec![],
		));
		r.apply(Change::host_create("h1"));
		assert!(r.tree().dispatch("h1", "/a").is_ok());
	}

	#[test]
	fn metrics_count_applied_and_dropped_changes_by_kind() {
		let mut registry = prometheus_client::registry::Registry::default();
		let metrics = Arc::new(Metrics::new(&mut registry));
		let r = Reconciler::new(std::sync::Arc::new(RoutingTree::new()), ReconcilerOptions::default()).with_metrics(metrics.clone());

		r.apply(Change::host_create("h1"));
		// Unknown host: dropped, not applied.
		r.apply(Change::location_create(
			"ghost",
			Location {
				name: "loc1".into(),
				path: "/a".into(),
				upstream: "up1".into(),
			},
			vec![],
		));
		r.apply(Change::location_create(
			"h1",
			Location {
				name: "loc1".into(),
				path: "/a".into(),
				upstream: "up1".into(),
			},
			vec![],
		));

		let mut buf = String::new();
		prometheus_client::encoding::text::encode(&mut buf, &registry).unwrap();
		assert!(buf.contains("changes_applied_total{kind=\"host\"} 1"));
		assert!(buf.contains("changes_applied_total{kind=\"location\"} 1"));
		assert!(buf.contains("changes_dropped_total{kind=\"location\",reason=\"unknown_host\"} 1"));
	}
}
