//! Dispatch-facing API: the one call the forwarding layer actually needs.
//!
//! Kept as its own thin module (rather than folding into [`crate::routing`])
//! because it's the one seam a forwarder outside this crate is meant to
//! depend on; everything else here is reconciliation-side machinery.

use crate::balancer::{BalancerError, LocationBalancer};
use crate::endpoint::Endpoint;
use crate::routing::RoutingTree;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
	#[error("no route for this host and path")]
	NoRoute,
	#[error("route matched but its upstream has no live endpoints")]
	NoEndpoints,
}

/// Resolves a request's destination in two lookups: hostname to
/// [`LocationBalancer`], then balancer to endpoint. Never panics and never
/// blocks on anything but the read locks in [`RoutingTree`] and
/// [`LocationBalancer`] -- this is meant to sit directly on a proxy's hot
/// path. A forwarder maps [`DispatchError`] to HTTP 404 itself; this crate
/// has no notion of HTTP status codes.
pub fn dispatch(tree: &RoutingTree, hostname: &str, path: &str) -> Result<Endpoint, DispatchError> {
	let balancer = tree.dispatch(hostname, path).map_err(|_| DispatchError::NoRoute)?;
	pick(&balancer)
}

fn pick(balancer: &Arc<LocationBalancer>) -> Result<Endpoint, DispatchError> {
	balancer.pick().map_err(|e| match e {
		BalancerError::NoEndpoints => DispatchError::NoEndpoints,
		// `pick` only ever returns `NoEndpoints`; the other variants belong
		// to `add`/`remove`, not chosen here for exhaustiveness's sake.
		other => unreachable!("pick() does not produce {other:?}"),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entity::Location;
	use crate::reconciler::{Reconciler, ReconcilerOptions};
	use crate::entity::{Change, EndpointSpec};

	#[test]
	fn dispatch_resolves_an_endpoint_end_to_end() {
		let tree = Arc::new(RoutingTree::new());
		let r = Reconciler::new(tree.clone(), ReconcilerOptions::default());
		r.apply(Change::host_create("h1"));
		r.apply(Change::location_create(
			"h1",
			Location {
				name: "loc1".into(),
				path: "/a".into(),
				upstream: "up1".into(),
			},
			vec![EndpointSpec {
				id: "e1".into(),
				url: "http://10.0.0.1:80".into(),
			}],
		));
		let ep = dispatch(&tree, "h1", "/a/x").unwrap();
		assert_eq!(ep.id, "e1");
	}

	#[test]
	fn dispatch_reports_no_route_for_unknown_host() {
		let tree = RoutingTree::new();
		assert_eq!(dispatch(&tree, "ghost", "/a").unwrap_err(), DispatchError::NoRoute);
	}

	#[test]
	fn dispatch_reports_no_endpoints_for_an_empty_location() {
		let tree = Arc::new(RoutingTree::new());
		let r = Reconciler::new(tree.clone(), ReconcilerOptions::default());
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
		assert_eq!(dispatch(&tree, "h1", "/a/x").unwrap_err(), DispatchError::NoEndpoints);
	}
}
