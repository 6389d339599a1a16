//! Resource types served by the mock cluster.

use std::collections::BTreeMap;

/// Resource types the mock server knows about, grouped by `apiVersion`.
#[derive(Debug, Clone)]
pub struct MockDiscovery {
	pub groups: BTreeMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self::empty()
			.with_resources(
				"v1",
				[
					MockApiResource::namespaced("configmaps", "ConfigMap"),
					MockApiResource::namespaced("secrets", "Secret"),
					MockApiResource::namespaced("services", "Service"),
					MockApiResource::namespaced("serviceaccounts", "ServiceAccount"),
					MockApiResource::cluster_scoped("namespaces", "Namespace"),
				],
			)
			.with_resources(
				"apps/v1",
				[MockApiResource::namespaced("deployments", "Deployment")],
			)
			.with_resources(
				"rbac.authorization.k8s.io/v1",
				[
					MockApiResource::namespaced("roles", "Role"),
					MockApiResource::cluster_scoped("clusterroles", "ClusterRole"),
				],
			)
			.with_resources(
				"mbatch.test/v1",
				[MockApiResource::namespaced("widgets", "Widget").custom()],
			)
	}
}

impl MockDiscovery {
	pub fn empty() -> Self {
		Self {
			groups: BTreeMap::new(),
		}
	}

	pub fn with_resources(
		mut self,
		api_version: &str,
		resources: impl IntoIterator<Item = MockApiResource>,
	) -> Self {
		self.groups
			.entry(api_version.to_string())
			.or_default()
			.extend(resources);
		self
	}

	pub fn find(&self, api_version: &str, kind: &str) -> Option<&MockApiResource> {
		self.groups.get(api_version)?.iter().find(|r| r.kind == kind)
	}

	/// Collection path for objects of the given type.
	///
	/// `namespace` is ignored for cluster-scoped types and defaults to
	/// `default` for namespaced ones.
	pub fn collection_path(
		&self,
		api_version: &str,
		kind: &str,
		namespace: Option<&str>,
	) -> Option<String> {
		let resource = self.find(api_version, kind)?;
		let root = if api_version.contains('/') {
			format!("/apis/{api_version}")
		} else {
			format!("/api/{api_version}")
		};
		Some(if resource.namespaced {
			let ns = namespace.unwrap_or("default");
			format!("{root}/namespaces/{ns}/{}", resource.name)
		} else {
			format!("{root}/{}", resource.name)
		})
	}

	/// Whether a request path belongs to a type that rejects strategic merge patches.
	pub(crate) fn rejects_strategic_merge(&self, request_path: &str) -> bool {
		self.groups.iter().any(|(api_version, resources)| {
			let root = if api_version.contains('/') {
				format!("/apis/{api_version}/")
			} else {
				format!("/api/{api_version}/")
			};
			request_path.starts_with(&root)
				&& resources
					.iter()
					.any(|r| !r.strategic_merge && request_path.contains(&format!("/{}/", r.name)))
		})
	}
}

/// A mock API resource definition.
#[derive(Debug, Clone)]
pub struct MockApiResource {
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	/// Custom resources answer strategic merge patches with 415.
	pub strategic_merge: bool,
}

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced: true,
			strategic_merge: true,
		}
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self {
			namespaced: false,
			..Self::namespaced(name, kind)
		}
	}

	/// Mark as a custom resource.
	pub fn custom(mut self) -> Self {
		self.strategic_merge = false;
		self
	}

	pub(crate) fn to_api_resource_json(&self) -> serde_json::Value {
		serde_json::json!({
			"name": self.name,
			"singularName": "",
			"namespaced": self.namespaced,
			"kind": self.kind,
			"verbs": ["create", "delete", "get", "list", "patch", "update", "watch"],
		})
	}
}
