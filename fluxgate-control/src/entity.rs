//! The declarative data model: Host, Location, Upstream, Endpoint, and the
//! Change events that move the running Routing Tree toward it.
//!
//! These are the shapes the config store deals in -- plain data, no
//! balancer or tree state attached. [`crate::reconciler::Reconciler`] is the
//! only thing that turns them into structural edits.

use fluxgate_core::Strng;
use serde::{Deserialize, Serialize};

pub type HostName = Strng;
pub type LocationName = Strng;
pub type UpstreamName = Strng;
pub type EndpointId = Strng;

/// A single backend target as declared in the store: identity plus a raw
/// URL string. Parsing happens in [`crate::endpoint`], not here -- the
/// declared form must still deserialize even if the URL momentarily isn't
/// parseable, so a bad record can be rejected at apply time instead of
/// poisoning the whole snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
	pub id: EndpointId,
	pub url: String,
}

/// A named group of interchangeable backend endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Upstream {
	pub name: UpstreamName,
	#[serde(default)]
	pub endpoints: Vec<EndpointSpec>,
}

/// A path rule within a Host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
	pub name: LocationName,
	pub path: Strng,
	pub upstream: UpstreamName,
}

/// A virtual host: a hostname plus the Locations declared under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Host {
	pub name: HostName,
	#[serde(default)]
	pub locations: Vec<Location>,
}

/// The full declared configuration, as returned by [`crate::watch::ConfigSource::snapshot`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Declared {
	pub hosts: Vec<Host>,
	pub upstreams: Vec<Upstream>,
}

impl Declared {
	/// Looks up a declared Upstream by name.
	pub fn upstream(&self, name: &str) -> Option<&Upstream> {
		self.upstreams.iter().find(|u| u.name == name)
	}
}

/// `create` or `delete`, never anything else -- an unknown action string
/// from the store is rejected before it ever becomes a `Change` (see
/// `crate::watch`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
	Create,
	Delete,
}

/// A reconciliation event: a tagged variant over the three child kinds the
/// store can mutate. Dispatch is a single `match` in the Reconciler -- no
/// downcasting, no interface values (see spec REDESIGN FLAGS).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Change {
	Host {
		action: Action,
		host: HostName,
	},
	/// `upstream_endpoints` is the snapshot of the referenced Upstream's
	/// endpoints at the moment of creation; it is only consulted on
	/// `Action::Create` (a `Location` delete only needs `name` to look the
	/// balancer up by identity).
	Location {
		action: Action,
		parent: HostName,
		name: LocationName,
		path: Strng,
		upstream: UpstreamName,
		upstream_endpoints: Vec<EndpointSpec>,
	},
	/// Identity-based: a delete carries only the endpoint `id`, never a
	/// sentinel URL (see spec.md §9's Open Question on this).
	Endpoint {
		action: Action,
		parent: UpstreamName,
		id: EndpointId,
		url: String,
	},
}

impl Change {
	pub fn host_create(host: impl Into<HostName>) -> Change {
		Change::Host {
			action: Action::Create,
			host: host.into(),
		}
	}

	pub fn host_delete(host: impl Into<HostName>) -> Change {
		Change::Host {
			action: Action::Delete,
			host: host.into(),
		}
	}

	pub fn location_create(
		parent: impl Into<HostName>,
		loc: Location,
		upstream_endpoints: Vec<EndpointSpec>,
	) -> Change {
		Change::Location {
			action: Action::Create,
			parent: parent.into(),
			name: loc.name,
			path: loc.path,
			upstream: loc.upstream,
			upstream_endpoints,
		}
	}

	pub fn location_delete(parent: impl Into<HostName>, name: impl Into<LocationName>) -> Change {
		Change::Location {
			action: Action::Delete,
			parent: parent.into(),
			name: name.into(),
			path: fluxgate_core::strng::new(""),
			upstream: fluxgate_core::strng::new(""),
			upstream_endpoints: Vec::new(),
		}
	}

	pub fn endpoint_create(parent: impl Into<UpstreamName>, ep: EndpointSpec) -> Change {
		Change::Endpoint {
			action: Action::Create,
			parent: parent.into(),
			id: ep.id,
			url: ep.url,
		}
	}

	/// `url` is accepted but ignored on delete: removal is identity-based.
	pub fn endpoint_delete(parent: impl Into<UpstreamName>, id: impl Into<EndpointId>) -> Change {
		Change::Endpoint {
			action: Action::Delete,
			parent: parent.into(),
			id: id.into(),
			url: String::new(),
		}
	}
}
