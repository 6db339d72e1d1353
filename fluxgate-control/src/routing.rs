//! C3: Routing Tree -- two mutable levels, hostname to path-pattern to
//! balancer.
//!
//! The Host level is a plain `RwLock<HashMap<..>>`: hosts come and go
//! rarely and a map swap is cheap. The Path level uses `matchit` (the same
//! crate `monolake-services` reaches for to dispatch by path) for the
//! dispatch-time `match`, but keeps its own ordered `entries` list as the
//! source of truth for `add`/`remove`/`get_by_*` and rebuilds the compiled
//! `matchit::Router` from it on every structural edit -- `matchit` itself
//! has no incremental removal, so a fresh compile on edit (not on every
//! request) is the natural idiom, mirroring the `Arc`-swapped "frozen
//! router" pattern common to dynamic-config proxies in this space.
//!
//! `matchit` itself only matches exact segments, but a Location's path is a
//! prefix per spec.md §8 (a Location at `/api` dispatches requests for
//! `/api/x`) -- each pattern is therefore registered both verbatim and with
//! a trailing catch-all (see `insert_prefix_route`).

use crate::balancer::{same_balancer, LocationBalancer};
use fluxgate_core::Strng;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
	#[error("path {0} already registered")]
	DuplicatePath(Strng),
	#[error("malformed path pattern {0}")]
	MalformedPattern(Strng),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no route matches")]
pub struct MatchError;

/// The hostname -> path-router level.
#[derive(Debug, Default)]
pub struct RoutingTree {
	hosts: RwLock<HashMap<Strng, Arc<PathRouter>>>,
}

impl RoutingTree {
	pub fn new() -> RoutingTree {
		RoutingTree::default()
	}

	/// Installs or replaces the path-router for `hostname`. The caller (the
	/// Reconciler) never replaces a live router -- it only ever installs a
	/// fresh, empty one on Host create, or removes one on Host delete -- so
	/// "replace" here is really "first install", but the API allows it
	/// unconditionally per spec.
	pub fn set_router(&self, hostname: Strng, router: Arc<PathRouter>) {
		self.hosts.write().expect("lock poisoned").insert(hostname, router);
	}

	pub fn get_router(&self, hostname: &str) -> Option<Arc<PathRouter>> {
		self.hosts.read().expect("lock poisoned").get(hostname).cloned()
	}

	pub fn remove_router(&self, hostname: &str) {
		self.hosts.write().expect("lock poisoned").remove(hostname);
	}

	/// Dispatch-facing lookup: hostname -> path -> balancer, in one
	/// read-lock acquisition per level. A missing host or no matching path
	/// both collapse to [`MatchError`], which the forwarding layer maps to
	/// HTTP 404.
	pub fn dispatch(&self, hostname: &str, path: &str) -> Result<Arc<LocationBalancer>, MatchError> {
		let router = self.get_router(hostname).ok_or(MatchError)?;
		router.match_path(path).ok_or(MatchError)
	}
}

/// A Location path matches the literal path and anything under it, per
/// spec.md §8's S1 (`/api` matches a dispatch for `/api/x`). `matchit` itself
/// only does exact-segment matching, so each pattern is registered twice:
/// once verbatim, once with a trailing catch-all, both pointing at the same
/// entry index.
fn insert_prefix_route(router: &mut matchit::Router<usize>, pattern: &str, idx: usize) -> Result<(), matchit::InsertError> {
	router.insert(pattern, idx)?;
	router.insert(prefix_wildcard(pattern), idx)?;
	Ok(())
}

fn prefix_wildcard(pattern: &str) -> String {
	if pattern.ends_with('/') {
		format!("{pattern}{{*fluxgate_tail}}")
	} else {
		format!("{pattern}/{{*fluxgate_tail}}")
	}
}

#[derive(Default)]
struct PathRouterInner {
	entries: Vec<(Strng, Arc<LocationBalancer>)>,
	compiled: matchit::Router<usize>,
}

impl PathRouterInner {
	fn recompile(&mut self) {
		let mut fresh = matchit::Router::new();
		for (idx, (pattern, _)) in self.entries.iter().enumerate() {
			// Entries were already validated on insertion, so a fresh
			// recompile of the same patterns cannot fail.
			let _ = insert_prefix_route(&mut fresh, pattern.as_str(), idx);
		}
		self.compiled = fresh;
	}
}

impl std::fmt::Debug for PathRouterInner {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PathRouterInner")
			.field("entries", &self.entries.iter().map(|(p, _)| p.clone()).collect::<Vec<_>>())
			.finish()
	}
}

/// The ordered set of `(pattern, balancer)` entries under one hostname.
#[derive(Debug, Default)]
pub struct PathRouter {
	inner: RwLock<PathRouterInner>,
}

impl PathRouter {
	pub fn new() -> Arc<PathRouter> {
		Arc::new(PathRouter::default())
	}

	pub fn add(&self, pattern: Strng, balancer: Arc<LocationBalancer>) -> Result<(), RoutingError> {
		let mut inner = self.inner.write().expect("lock poisoned");
		if inner.entries.iter().any(|(p, _)| p == &pattern) {
			return Err(RoutingError::DuplicatePath(pattern));
		}
		// Validate against a scratch router before mutating entries, so a
		// malformed pattern -- or one whose prefix-wildcard form conflicts
		// with an existing entry -- never gets the lock into an
		// inconsistent state.
		let mut probe = matchit::Router::new();
		for (p, _) in inner.entries.iter() {
			let _ = insert_prefix_route(&mut probe, p.as_str(), 0usize);
		}
		if insert_prefix_route(&mut probe, pattern.as_str(), 0usize).is_err() {
			return Err(RoutingError::MalformedPattern(pattern));
		}
		inner.entries.push((pattern, balancer));
		inner.recompile();
		Ok(())
	}

	pub fn get_by_pattern(&self, pattern: &str) -> Option<Arc<LocationBalancer>> {
		let inner = self.inner.read().expect("lock poisoned");
		inner.entries.iter().find(|(p, _)| p == pattern).map(|(_, b)| b.clone())
	}

	pub fn get_by_id(&self, location_name: &str) -> Option<Arc<LocationBalancer>> {
		let inner = self.inner.read().expect("lock poisoned");
		inner
			.entries
			.iter()
			.find(|(_, b)| b.name().as_str() == location_name)
			.map(|(_, b)| b.clone())
	}

	pub fn remove(&self, balancer: &Arc<LocationBalancer>) {
		let mut inner = self.inner.write().expect("lock poisoned");
		inner.entries.retain(|(_, b)| !same_balancer(b, balancer));
		inner.recompile();
	}

	/// Dispatch-time match. A pattern matches its own literal path and every
	/// path nested under it (`/api` matches `/api` and `/api/x`); beyond
	/// that, the relative ordering of overlapping patterns is whatever
	/// `matchit` gives us. The core only guarantees determinism -- the same
	/// path against the same tree state always resolves to the same
	/// balancer.
	pub fn match_path(&self, path: &str) -> Option<Arc<LocationBalancer>> {
		let inner = self.inner.read().expect("lock poisoned");
		let idx = inner.compiled.at(path).ok()?.value;
		inner.entries.get(*idx).map(|(_, b)| b.clone())
	}

	pub fn is_empty(&self) -> bool {
		self.inner.read().expect("lock poisoned").entries.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn duplicate_path_is_rejected() {
		let pr = PathRouter::new();
		pr.add("/api".into(), LocationBalancer::new("loc1")).unwrap();
		let err = pr.add("/api".into(), LocationBalancer::new("loc2")).unwrap_err();
		assert_eq!(err, RoutingError::DuplicatePath("/api".into()));
	}

	#[test]
	fn lookup_by_pattern_and_by_id() {
		let pr = PathRouter::new();
		let bal = LocationBalancer::new("loc1");
		pr.add("/api".into(), bal.clone()).unwrap();
		assert!(pr.get_by_pattern("/api").is_some());
		assert!(pr.get_by_id("loc1").is_some());
		assert!(pr.get_by_id("nope").is_none());
	}

	#[test]
	fn remove_drops_the_entry_identity_equal() {
		let pr = PathRouter::new();
		let bal = LocationBalancer::new("loc1");
		pr.add("/api".into(), bal.clone()).unwrap();
		pr.remove(&bal);
		assert!(pr.get_by_pattern("/api").is_none());
		assert!(pr.is_empty());
	}

	#[test]
	fn dispatch_resolves_host_then_path() {
		let tree = RoutingTree::new();
		let pr = PathRouter::new();
		let bal = LocationBalancer::new("loc1");
		pr.add("/api".into(), bal).unwrap();
		tree.set_router("h1".into(), pr);

		assert!(tree.dispatch("h1", "/api").is_ok());
		assert!(tree.dispatch("h1", "/missing").is_err());
		assert!(tree.dispatch("h2", "/api").is_err());
	}

	#[test]
	fn pattern_matches_as_a_prefix() {
		let pr = PathRouter::new();
		let bal = LocationBalancer::new("loc1");
		pr.add("/api".into(), bal.clone()).unwrap();

		assert!(same_balancer(&pr.match_path("/api").unwrap(), &bal));
		assert!(same_balancer(&pr.match_path("/api/x").unwrap(), &bal));
		assert!(same_balancer(&pr.match_path("/api/x/y").unwrap(), &bal));
		assert!(pr.match_path("/other").is_none());
	}
}
