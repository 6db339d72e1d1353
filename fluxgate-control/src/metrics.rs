//! Reconciliation and dispatch metrics, following the `Recorder` /
//! `Family<Labels, Counter>` pattern from `src/relay/metrics.rs`: one
//! label struct per event kind, one `Family` per counter, `Recorder<E, ()>`
//! implementations that just `get_or_create(event).inc()`.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use fluxgate_core::prelude::Recorder;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ChangeApplied {
	pub kind: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ChangeDropped {
	pub kind: &'static str,
	pub reason: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BalancerPick {
	pub outcome: &'static str,
}

pub struct Metrics {
	changes_applied: Family<ChangeApplied, Counter>,
	changes_dropped: Family<ChangeDropped, Counter>,
	balancer_picks: Family<BalancerPick, Counter>,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		let changes_applied = Family::default();
		registry.register(
			"changes_applied",
			"Reconciled Change events applied to the routing tree, by kind",
			changes_applied.clone(),
		);

		let changes_dropped = Family::default();
		registry.register(
			"changes_dropped",
			"Change events dropped without effect, by kind and reason",
			changes_dropped.clone(),
		);

		let balancer_picks = Family::default();
		registry.register(
			"balancer_picks",
			"Location balancer pick() outcomes",
			balancer_picks.clone(),
		);

		Metrics {
			changes_applied,
			changes_dropped,
			balancer_picks,
		}
	}
}

impl Recorder<ChangeApplied, ()> for Metrics {
	fn record(&self, event: &ChangeApplied, _: ()) {
		self.changes_applied.get_or_create(event).inc();
	}
}

impl Recorder<ChangeDropped, ()> for Metrics {
	fn record(&self, event: &ChangeDropped, _: ()) {
		self.changes_dropped.get_or_create(event).inc();
	}
}

impl Recorder<BalancerPick, ()> for Metrics {
	fn record(&self, event: &BalancerPick, _: ()) {
		self.balancer_picks.get_or_create(event).inc();
	}
}
