//! C2: Location Balancer -- a round-robin pool of live endpoints behind one
//! Location.
//!
//! Membership is copy-on-write (`arc_swap::ArcSwap<Vec<Endpoint>>`), the
//! idiom `agent-proxy/src/store/binds.rs` uses for its own `Bind` updates
//! (`Arc::unwrap_or_clone` + reinsert). That gives `pick()` a lock-free,
//! always-consistent snapshot: a reader never observes a partially built
//! member list, and never sees an endpoint that a concurrent `remove` has
//! already dropped from the snapshot it took.

use crate::endpoint::Endpoint;
use arc_swap::ArcSwap;
use fluxgate_core::Strng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BalancerError {
	#[error("endpoint {0} already registered")]
	AlreadyExists(Strng),
	#[error("endpoint {0} not registered")]
	NotFound(Strng),
	#[error("no endpoints available")]
	NoEndpoints,
}

/// A round-robin pool of endpoints for a single Location.
#[derive(Debug)]
pub struct LocationBalancer {
	/// The Location's own identity, carried so the Path Router can look a
	/// balancer up by `loc.name` (`get_by_id`) as well as by pattern.
	name: Strng,
	members: ArcSwap<Vec<Endpoint>>,
	cursor: AtomicUsize,
}

impl LocationBalancer {
	pub fn new(name: impl Into<Strng>) -> Arc<LocationBalancer> {
		Arc::new(LocationBalancer {
			name: name.into(),
			members: ArcSwap::from_pointee(Vec::new()),
			cursor: AtomicUsize::new(0),
		})
	}

	pub fn name(&self) -> &Strng {
		&self.name
	}

	pub fn len(&self) -> usize {
		self.members.load().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Idempotent-by-error insertion: adding an already-present `id` leaves
	/// membership untouched and returns an error, it never replaces the
	/// existing entry.
	pub fn add(&self, endpoint: Endpoint) -> Result<(), BalancerError> {
		let current = self.members.load();
		if current.iter().any(|e| e.id == endpoint.id) {
			return Err(BalancerError::AlreadyExists(endpoint.id));
		}
		let mut next = (**current).clone();
		next.push(endpoint);
		self.members.store(Arc::new(next));
		Ok(())
	}

	/// Removes by `id`. Removing an absent id fails without disturbing the
	/// rest of the membership.
	pub fn remove(&self, id: &Strng) -> Result<(), BalancerError> {
		let current = self.members.load();
		if !current.iter().any(|e| &e.id == id) {
			return Err(BalancerError::NotFound(id.clone()));
		}
		let next: Vec<Endpoint> = current.iter().filter(|e| &e.id != id).cloned().collect();
		self.members.store(Arc::new(next));
		Ok(())
	}

	/// Chooses the next member in round-robin order. Always returns either
	/// a currently-registered endpoint or `NoEndpoints` -- never a
	/// reference to a just-removed one, since the snapshot taken here is
	/// immutable for the duration of the call.
	pub fn pick(&self) -> Result<Endpoint, BalancerError> {
		let current = self.members.load();
		if current.is_empty() {
			return Err(BalancerError::NoEndpoints);
		}
		let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % current.len();
		Ok(current[idx].clone())
	}

	pub fn contains(&self, id: &Strng) -> bool {
		self.members.load().iter().any(|e| &e.id == id)
	}
}

/// Balancers are compared by identity (pointer equality on the `Arc`), not
/// by contents -- the Path Router removes "the entry whose balancer is
/// identity-equal", never by deep comparison.
pub fn same_balancer(a: &Arc<LocationBalancer>, b: &Arc<LocationBalancer>) -> bool {
	Arc::ptr_eq(a, b)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ep(id: &str) -> Endpoint {
		Endpoint::make(id, "http://10.0.0.1:80").unwrap()
	}

	#[test]
	fn add_is_idempotent_by_error() {
		let b = LocationBalancer::new("loc1");
		b.add(ep("e1")).unwrap();
		let err = b.add(ep("e1")).unwrap_err();
		assert_eq!(err, BalancerError::AlreadyExists("e1".into()));
		assert_eq!(b.len(), 1);
	}

	#[test]
	fn remove_absent_fails_without_disturbing_others() {
		let b = LocationBalancer::new("loc1");
		b.add(ep("e1")).unwrap();
		let err = b.remove(&"e2".into()).unwrap_err();
		assert_eq!(err, BalancerError::NotFound("e2".into()));
		assert_eq!(b.len(), 1);
	}

	#[test]
	fn pick_round_robins_and_fails_when_empty() {
		let b = LocationBalancer::new("loc1");
		assert_eq!(b.pick().unwrap_err(), BalancerError::NoEndpoints);
		b.add(ep("e1")).unwrap();
		b.add(ep("e2")).unwrap();
		let picks: Vec<_> = (0..4).map(|_| b.pick().unwrap().id).collect();
		assert_eq!(picks, vec!["e1", "e2", "e1", "e2"]);
	}

	#[test]
	fn remove_advances_past_removed_member() {
		let b = LocationBalancer::new("loc1");
		b.add(ep("e1")).unwrap();
		b.add(ep("e2")).unwrap();
		b.add(ep("e3")).unwrap();
		let _ = b.pick().unwrap(); // e1, cursor now at 1
		b.remove(&"e2".into()).unwrap();
		let remaining: std::collections::HashSet<_> = (0..10).map(|_| b.pick().unwrap().id).collect();
		assert!(!remaining.contains(&Strng::from("e2")));
	}
}
