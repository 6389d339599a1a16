//! Kubernetes resource apply engine.
//!
//! [`KubeApplier`] implements [`Applier`] on top of kube-rs: it splits a blob
//! into its YAML documents, stamps the owner reference onto each object and
//! applies it using either server-side or client-side apply.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
	api::{Api, DynamicObject, Patch, PatchParams, PostParams},
	Client,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

use super::{
	discovery::{gvk_from_manifest, ApiResourceCache, DiscoveredResource, DiscoveryError},
	ResourceScope,
};
use crate::{applier::Applier, document::YamlDocument, owner::OwningResource};

/// Field manager recorded on applied objects unless overridden.
pub const DEFAULT_FIELD_MANAGER: &str = "mbatch";

/// Errors that can occur during apply operations.
#[derive(Debug, Error)]
pub enum KubeApplyError {
	#[error("decoding YAML document #{index}")]
	Decode {
		index: usize,
		#[source]
		source: serde_yaml::Error,
	},

	#[error("manifest missing apiVersion or kind")]
	MissingApiVersionOrKind,

	#[error("manifest missing metadata.name")]
	MissingName,

	#[error(transparent)]
	Discovery(#[from] DiscoveryError),

	#[error("applying {kind}/{name}")]
	ApplyFailed {
		kind: String,
		name: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("converting manifest to DynamicObject")]
	ManifestConversion(#[source] serde_json::Error),
}

/// Apply strategy for resource updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyStrategy {
	/// Server-side apply using PATCH with Apply.
	#[default]
	Server,

	/// Client-side apply using PATCH with strategic merge.
	Client,
}

impl fmt::Display for ApplyStrategy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ApplyStrategy::Server => write!(f, "server"),
			ApplyStrategy::Client => write!(f, "client"),
		}
	}
}

/// Applies manifest blobs to a Kubernetes cluster.
#[derive(Clone)]
pub struct KubeApplier {
	client: Client,
	api_cache: ApiResourceCache,
	strategy: ApplyStrategy,
	field_manager: String,
	force: bool,
}

impl KubeApplier {
	pub fn new(client: Client) -> Self {
		Self {
			client,
			api_cache: ApiResourceCache::new(),
			strategy: ApplyStrategy::default(),
			field_manager: DEFAULT_FIELD_MANAGER.to_string(),
			force: false,
		}
	}

	/// Share an existing discovery cache.
	pub fn with_api_cache(mut self, api_cache: ApiResourceCache) -> Self {
		self.api_cache = api_cache;
		self
	}

	pub fn with_strategy(mut self, strategy: ApplyStrategy) -> Self {
		self.strategy = strategy;
		self
	}

	pub fn with_field_manager(mut self, field_manager: impl Into<String>) -> Self {
		self.field_manager = field_manager.into();
		self
	}

	/// Take ownership of conflicting fields during server-side apply.
	pub fn with_force(mut self, force: bool) -> Self {
		self.force = force;
		self
	}

	pub fn api_cache(&self) -> &ApiResourceCache {
		&self.api_cache
	}

	/// Apply a single manifest to the cluster.
	#[instrument(skip(self, manifest, owner), fields(
		kind = manifest.get("kind").and_then(|v| v.as_str()).unwrap_or("unknown"),
		name = manifest.pointer("/metadata/name").and_then(|v| v.as_str()).unwrap_or("unknown"),
	))]
	pub async fn apply_manifest(
		&self,
		mut manifest: serde_json::Value,
		namespace: &str,
		owner: Option<&OwningResource>,
	) -> Result<(), KubeApplyError> {
		let gvk = gvk_from_manifest(&manifest).ok_or(KubeApplyError::MissingApiVersionOrKind)?;

		let name = manifest
			.pointer("/metadata/name")
			.and_then(|v| v.as_str())
			.ok_or(KubeApplyError::MissingName)?
			.to_string();

		let discovered = self.api_cache.resolve(&self.client, &gvk).await?;

		let target_namespace = resolve_namespace(&mut manifest, &discovered, namespace);
		if let Some(owner) = owner {
			if owner_reaches(owner.namespace.as_deref(), target_namespace.as_deref()) {
				stamp_owner_reference(&mut manifest, &owner.to_owner_reference())
					.map_err(KubeApplyError::ManifestConversion)?;
			} else {
				tracing::warn!(
					owner_kind = %owner.kind,
					owner_name = %owner.name,
					owner_namespace = ?owner.namespace,
					namespace = ?target_namespace,
					"owner is outside the object's namespace, applying without owner reference"
				);
			}
		}

		let api = self.dynamic_api(&discovered, target_namespace.as_deref());
		let apply_failed = |e: kube::Error| KubeApplyError::ApplyFailed {
			kind: gvk.kind.clone(),
			name: name.clone(),
			source: Box::new(e),
		};

		match self.strategy {
			ApplyStrategy::Server => {
				let patch_params = PatchParams {
					field_manager: Some(self.field_manager.clone()),
					force: self.force,
					..Default::default()
				};

				api.patch(&name, &patch_params, &Patch::Apply(&manifest))
					.await
					.map_err(apply_failed)?;
			}
			ApplyStrategy::Client => {
				let patch_params = PatchParams {
					field_manager: Some(self.field_manager.clone()),
					..Default::default()
				};

				// Ensure annotations exists (kubectl always includes this)
				let manifest = ensure_annotations(manifest);

				// Try strategic merge patch first, fall back to merge patch for CRDs
				let result = api
					.patch(&name, &patch_params, &Patch::Strategic(&manifest))
					.await;

				match result {
					Ok(_) => {}
					Err(kube::Error::Api(ref err)) if err.code == 415 => {
						// UnsupportedMediaType - CRD doesn't support strategic merge
						api.patch(&name, &patch_params, &Patch::Merge(&manifest))
							.await
							.map_err(apply_failed)?;
					}
					Err(kube::Error::Api(ref err)) if err.code == 404 => {
						let obj: DynamicObject = serde_json::from_value(manifest)
							.map_err(KubeApplyError::ManifestConversion)?;

						api.create(&PostParams::default(), &obj)
							.await
							.map_err(apply_failed)?;
					}
					Err(e) => return Err(apply_failed(e)),
				}
			}
		}

		tracing::debug!(namespace = ?target_namespace, "applied");
		Ok(())
	}

	/// Create a dynamic API for the given resource.
	fn dynamic_api(
		&self,
		discovered: &DiscoveredResource,
		namespace: Option<&str>,
	) -> Api<DynamicObject> {
		match namespace {
			Some(ns) => Api::namespaced_with(self.client.clone(), ns, &discovered.api_resource),
			None => Api::all_with(self.client.clone(), &discovered.api_resource),
		}
	}
}

impl Applier for KubeApplier {
	type Error = KubeApplyError;

	async fn apply(
		&self,
		doc: &YamlDocument,
		namespace: &str,
		owner: Option<&OwningResource>,
	) -> Result<(), Self::Error> {
		let manifests = decode_manifests(doc)?;

		let owner = match owner {
			Some(owner) if owner.uid.is_none() => {
				tracing::warn!(
					kind = %owner.kind,
					name = %owner.name,
					"owner has no uid, applying without owner reference"
				);
				None
			}
			other => other,
		};

		for manifest in manifests {
			self.apply_manifest(manifest, namespace, owner).await?;
		}
		Ok(())
	}
}

/// Split a blob into its YAML documents, skipping empty ones.
pub fn decode_manifests(doc: &YamlDocument) -> Result<Vec<serde_json::Value>, KubeApplyError> {
	let mut manifests = Vec::new();
	for (index, document) in serde_yaml::Deserializer::from_slice(doc.as_bytes()).enumerate() {
		let value = serde_json::Value::deserialize(document)
			.map_err(|source| KubeApplyError::Decode { index, source })?;
		if !value.is_null() {
			manifests.push(value);
		}
	}
	Ok(manifests)
}

/// Pick the namespace a manifest is applied into.
///
/// Namespaced objects keep an explicit `metadata.namespace` and otherwise get
/// `default_namespace` written into them. Cluster-wide objects get none.
fn resolve_namespace(
	manifest: &mut serde_json::Value,
	discovered: &DiscoveredResource,
	default_namespace: &str,
) -> Option<String> {
	match discovered.scope {
		ResourceScope::Namespaced => {
			let ns = manifest
				.pointer("/metadata/namespace")
				.and_then(|v| v.as_str())
				.map(|s| s.to_string())
				.unwrap_or_else(|| default_namespace.to_string());
			if let Some(serde_json::Value::Object(metadata)) = manifest.get_mut("metadata") {
				metadata.insert("namespace".to_string(), serde_json::Value::String(ns.clone()));
			}
			Some(ns)
		}
		ResourceScope::ClusterWide => None,
	}
}

/// Whether an owner in `owner_namespace` may own an object in `namespace`.
///
/// A namespaced owner only reaches objects in its own namespace; a
/// cluster-scoped owner (no namespace) reaches everything.
fn owner_reaches(owner_namespace: Option<&str>, namespace: Option<&str>) -> bool {
	match owner_namespace {
		Some(owner_namespace) => namespace == Some(owner_namespace),
		None => true,
	}
}

/// Add `owner` to `metadata.ownerReferences`, replacing a reference with the same UID.
///
/// An object has at most one controller: if another reference already claims
/// it, `owner` is added without the `controller` flag.
fn stamp_owner_reference(
	manifest: &mut serde_json::Value,
	owner: &OwnerReference,
) -> Result<(), serde_json::Error> {
	let mut reference = serde_json::to_value(owner)?;
	if let Some(serde_json::Value::Object(metadata)) = manifest.get_mut("metadata") {
		let references = metadata
			.entry("ownerReferences")
			.or_insert_with(|| serde_json::json!([]));
		match references {
			serde_json::Value::Array(items) => {
				items.retain(|item| item.get("uid") != reference.get("uid"));
				let controlled = items
					.iter()
					.any(|item| item.get("controller") == Some(&serde_json::Value::Bool(true)));
				if controlled {
					if let serde_json::Value::Object(fields) = &mut reference {
						if fields.remove("controller").is_some() {
							tracing::debug!(
								"object already has a controller, adding owner as non-controller"
							);
						}
					}
				}
				items.push(reference);
			}
			other => *other = serde_json::Value::Array(vec![reference]),
		}
	}
	Ok(())
}

/// Ensure metadata.annotations exists in the manifest.
fn ensure_annotations(mut manifest: serde_json::Value) -> serde_json::Value {
	if let serde_json::Value::Object(ref mut obj) = manifest {
		if let Some(serde_json::Value::Object(ref mut metadata)) = obj.get_mut("metadata") {
			metadata
				.entry("annotations")
				.or_insert(serde_json::json!({}));
		}
	}
	manifest
}
