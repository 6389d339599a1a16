//! Kubernetes API resource discovery and caching.
//!
//! Resource types are discovered lazily, one `apiVersion`/`kind` at a time,
//! and memoized for the lifetime of the cache.

use std::{
	collections::HashMap,
	sync::{Arc, Mutex, PoisonError},
};

use kube::{
	core::GroupVersionKind,
	discovery::{oneshot::pinned_kind, ApiCapabilities, ApiResource, Scope},
	Client,
};
use thiserror::Error;
use tracing::instrument;

use super::ResourceScope;

/// Errors that can occur during API resource discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("failed to discover resource {api_version}/{kind}")]
	ResourceDiscovery {
		api_version: String,
		kind: String,
		#[source]
		source: kube::Error,
	},
}

/// Extract a GroupVersionKind from a Kubernetes manifest.
pub fn gvk_from_manifest(manifest: &serde_json::Value) -> Option<GroupVersionKind> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	Some(gvk_from_api_version(api_version, kind))
}

/// Create a GroupVersionKind from an apiVersion string and kind.
pub fn gvk_from_api_version(api_version: &str, kind: &str) -> GroupVersionKind {
	let (group, version) = match api_version.split_once('/') {
		Some((g, v)) => (g, v),
		None => ("", api_version),
	};
	GroupVersionKind::gvk(group, version, kind)
}

/// Discovered API resource with scope and capabilities.
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
	/// The kube ApiResource for making API calls.
	pub api_resource: ApiResource,
	/// Whether this resource is namespaced or cluster-wide.
	pub scope: ResourceScope,
	/// API capabilities (verbs, subresources, etc.)
	pub capabilities: ApiCapabilities,
}

/// Memoized API resource discovery results.
///
/// Cheap to clone; clones share the same cache.
#[derive(Clone, Default)]
pub struct ApiResourceCache {
	resources: Arc<Mutex<HashMap<GroupVersionKind, DiscoveredResource>>>,
}

impl ApiResourceCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Look up a resource that was already discovered.
	pub fn lookup(&self, gvk: &GroupVersionKind) -> Option<DiscoveredResource> {
		self.resources
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.get(gvk)
			.cloned()
	}

	/// Look up a resource, asking the cluster on a cache miss.
	#[instrument(skip(self, client), fields(api_version = %gvk.api_version(), kind = %gvk.kind))]
	pub async fn resolve(
		&self,
		client: &Client,
		gvk: &GroupVersionKind,
	) -> Result<DiscoveredResource, DiscoveryError> {
		if let Some(found) = self.lookup(gvk) {
			return Ok(found);
		}

		tracing::debug!("discovering resource");
		let (api_resource, capabilities) =
			pinned_kind(client, gvk)
				.await
				.map_err(|source| DiscoveryError::ResourceDiscovery {
					api_version: gvk.api_version(),
					kind: gvk.kind.clone(),
					source,
				})?;

		let scope = match capabilities.scope {
			Scope::Namespaced => ResourceScope::Namespaced,
			Scope::Cluster => ResourceScope::ClusterWide,
		};
		let discovered = DiscoveredResource {
			api_resource,
			scope,
			capabilities,
		};

		self.resources
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(gvk.clone(), discovered.clone());
		Ok(discovered)
	}

	pub fn len(&self) -> usize {
		self.resources
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
