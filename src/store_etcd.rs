//! An etcd-backed [`fluxgate_control::ConfigSource`].
//!
//! Key layout under `root`:
//!
//! ```text
//! {root}/hosts/{host}                              -> "" (presence marks existence)
//! {root}/hosts/{host}/locations/{location}          -> json { path, upstream }
//! {root}/upstreams/{upstream}/endpoints/{id}         -> the endpoint URL
//! ```
//!
//! This is a plain recursive-directory convention, the same shape
//! `vulcand` itself kept its backends/frontends/servers in. `snapshot`
//! reads the whole prefix once; `next_change` holds one long-lived etcd
//! watch over the same prefix and classifies each key event by which of
//! the three shapes it matches.

use async_trait::async_trait;
use etcd_client::{Client, EventType, GetOptions, WatchOptions, WatchStream, Watcher};
use fluxgate_control::entity::{Action, Declared, EndpointSpec, Host, Location, Upstream};
use fluxgate_control::{Change, ConfigSource, StoreError};
use fluxgate_core::prelude::*;
use serde::Deserialize;
use tokio::sync::Mutex;

pub struct EtcdConfigSource {
	client: Mutex<Client>,
	root: String,
	watch: Mutex<Option<(Watcher, WatchStream)>>,
}

#[derive(Deserialize)]
struct LocationBody {
	path: String,
	upstream: String,
}

impl EtcdConfigSource {
	pub async fn connect(endpoints: &[String], root: impl Into<String>) -> Result<EtcdConfigSource, StoreError> {
		let client = Client::connect(endpoints, None)
			.await
			.map_err(|e| StoreError::Fatal(format!("connecting to etcd: {e}")))?;
		Ok(EtcdConfigSource {
			client: Mutex::new(client),
			root: root.into(),
			watch: Mutex::new(None),
		})
	}

	fn hosts_prefix(&self) -> String {
		format!("{}/hosts/", self.root)
	}

	fn upstreams_prefix(&self) -> String {
		format!("{}/upstreams/", self.root)
	}
}

enum Key {
	Host(String),
	Location(String, String),
	EndpointMember(String, String),
	Unrecognized,
}

fn classify(root: &str, key: &str) -> Key {
	let hosts_prefix = format!("{root}/hosts/");
	let upstreams_prefix = format!("{root}/upstreams/");

	if let Some(rest) = key.strip_prefix(&hosts_prefix) {
		let mut parts = rest.splitn(3, '/');
		return match (parts.next(), parts.next(), parts.next()) {
			(Some(host), None, None) if !host.is_empty() => Key::Host(host.to_string()),
			(Some(host), Some("locations"), Some(loc)) if !host.is_empty() && !loc.is_empty() => {
				Key::Location(host.to_string(), loc.to_string())
			}
			_ => Key::Unrecognized,
		};
	}
	if let Some(rest) = key.strip_prefix(&upstreams_prefix) {
		let mut parts = rest.splitn(3, '/');
		return match (parts.next(), parts.next(), parts.next()) {
			(Some(upstream), Some("endpoints"), Some(id)) if !upstream.is_empty() && !id.is_empty() => {
				Key::EndpointMember(upstream.to_string(), id.to_string())
			}
			_ => Key::Unrecognized,
		};
	}
	Key::Unrecognized
}

#[async_trait]
impl ConfigSource for EtcdConfigSource {
	async fn snapshot(&self) -> Result<Declared, StoreError> {
		let mut client = self.client.lock().await;
		let resp = client
			.get(self.root.as_str(), Some(GetOptions::new().with_prefix()))
			.await
			.map_err(|e| StoreError::Fatal(format!("etcd get prefix {}: {e}", self.root)))?;

		let mut declared = Declared::default();
		let mut hosts: std::collections::HashMap<String, Host> = std::collections::HashMap::new();
		let mut upstreams: std::collections::HashMap<String, Upstream> = std::collections::HashMap::new();

		for kv in resp.kvs() {
			let key = kv.key_str().map_err(|e| StoreError::Fatal(format!("non-utf8 etcd key: {e}")))?;
			match classify(&self.root, key) {
				Key::Host(host) => {
					hosts.entry(host.clone()).or_insert_with(|| Host {
						name: strng::new(&host),
						locations: Vec::new(),
					});
				}
				Key::Location(host, name) => {
					let value = kv.value_str().map_err(|e| StoreError::Fatal(format!("non-utf8 location body: {e}")))?;
					let body: LocationBody = serde_json::from_str(value)
						.map_err(|e| StoreError::Fatal(format!("malformed location body for {host}/{name}: {e}")))?;
					hosts
						.entry(host.clone())
						.or_insert_with(|| Host {
							name: strng::new(&host),
							locations: Vec::new(),
						})
						.locations
						.push(Location {
							name: strng::new(&name),
							path: strng::new(&body.path),
							upstream: strng::new(&body.upstream),
						});
				}
				Key::EndpointMember(upstream, id) => {
					let url = kv.value_str().map_err(|e| StoreError::Fatal(format!("non-utf8 endpoint url: {e}")))?;
					upstreams
						.entry(upstream.clone())
						.or_insert_with(|| Upstream {
							name: strng::new(&upstream),
							endpoints: Vec::new(),
						})
						.endpoints
						.push(EndpointSpec {
							id: strng::new(&id),
							url: url.to_string(),
						});
				}
				Key::Unrecognized => {
					warn!(key, "ignoring etcd key outside the known schema");
				}
			}
		}

		declared.hosts = hosts.into_values().collect();
		declared.upstreams = upstreams.into_values().collect();
		Ok(declared)
	}

	async fn next_change(&self) -> Result<Change, StoreError> {
		loop {
			let mut guard = self.watch.lock().await;
			if guard.is_none() {
				let mut client = self.client.lock().await;
				let (watcher, stream) = client
					.watch(self.root.as_str(), Some(WatchOptions::new().with_prefix()))
					.await
					.map_err(|e| StoreError::Fatal(format!("starting etcd watch on {}: {e}", self.root)))?;
				*guard = Some((watcher, stream));
			}
			let (_, stream) = guard.as_mut().expect("just populated");

			let message = stream
				.message()
				.await
				.map_err(|e| StoreError::Fatal(format!("etcd watch stream error: {e}")))?;
			let Some(resp) = message else {
				// Stream closed; drop the stale watcher and retry fresh next time.
				*guard = None;
				return Err(StoreError::Fatal("etcd watch stream closed".into()));
			};
			if resp.canceled() {
				*guard = None;
				return Err(StoreError::Fatal("etcd watch canceled by server".into()));
			}

			let mut raw_events = Vec::new();
			for event in resp.events() {
				let Some(kv) = event.kv() else { continue };
				let Ok(key) = kv.key_str() else { continue };
				let action = match event.event_type() {
					EventType::Put => Action::Create,
					EventType::Delete => Action::Delete,
				};
				raw_events.push((key.to_string(), kv.value_str().unwrap_or("").to_string(), action));
			}
			drop(guard);

			for (key, value, action) in raw_events {
				if let Some(change) = self.event_to_change(&key, &value, action).await {
					return Ok(change);
				}
			}
		}
	}
}

impl EtcdConfigSource {
	/// Reads the current endpoint membership of one Upstream directly,
	/// used to seed a Location that's created by a live watch event (as
	/// opposed to bootstrap, where the whole snapshot is already in hand).
	async fn fetch_upstream_endpoints(&self, upstream: &str) -> Vec<EndpointSpec> {
		let prefix = format!("{}/upstreams/{upstream}/endpoints/", self.root);
		let mut client = self.client.lock().await;
		let Ok(resp) = client.get(prefix.as_str(), Some(GetOptions::new().with_prefix())).await else {
			return Vec::new();
		};
		resp.kvs()
			.iter()
			.filter_map(|kv| {
				let id = kv.key_str().ok()?.rsplit('/').next()?.to_string();
				let url = kv.value_str().ok()?.to_string();
				Some(EndpointSpec { id: strng::new(&id), url })
			})
			.collect()
	}

	async fn event_to_change(&self, key: &str, value: &str, action: Action) -> Option<Change> {
		match classify(&self.root, key) {
			Key::Host(host) => Some(match action {
				Action::Create => Change::host_create(host),
				Action::Delete => Change::host_delete(host),
			}),
			Key::Location(host, name) => match action {
				Action::Create => {
					let body: LocationBody = serde_json::from_str(value).ok()?;
					let endpoints = self.fetch_upstream_endpoints(&body.upstream).await;
					Some(Change::location_create(
						host,
						Location {
							name: strng::new(&name),
							path: strng::new(&body.path),
							upstream: strng::new(&body.upstream),
						},
						endpoints,
					))
				}
				Action::Delete => Some(Change::location_delete(host, name)),
			},
			Key::EndpointMember(upstream, id) => match action {
				Action::Create => Some(Change::endpoint_create(upstream, EndpointSpec { id: strng::new(&id), url: value.to_string() })),
				Action::Delete => Some(Change::endpoint_delete(upstream, id)),
			},
			Key::Unrecognized => {
				warn!(key, "ignoring etcd watch event outside the known schema");
				None
			}
		}
	}
}
