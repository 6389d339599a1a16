//! The object that owns every applied resource.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{api::DynamicObject, Resource};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OwnerError {
	#[error("owner object has no type information (apiVersion/kind)")]
	MissingTypeMeta,

	#[error("owner object has no metadata.name")]
	MissingName,
}

/// Identity of the owning object, as needed for a Kubernetes owner reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwningResource {
	pub api_version: String,
	pub kind: String,
	pub name: String,
	/// `None` for cluster-scoped owners.
	pub namespace: Option<String>,
	pub uid: Option<String>,
}

impl OwningResource {
	pub fn new(
		api_version: impl Into<String>,
		kind: impl Into<String>,
		name: impl Into<String>,
	) -> Self {
		Self {
			api_version: api_version.into(),
			kind: kind.into(),
			name: name.into(),
			namespace: None,
			uid: None,
		}
	}

	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = Some(namespace.into());
		self
	}

	pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
		self.uid = Some(uid.into());
		self
	}

	/// Derive the owner from a statically typed object.
	pub fn from_resource<K>(obj: &K) -> Result<Self, OwnerError>
	where
		K: Resource<DynamicType = ()>,
	{
		let meta = obj.meta();
		Ok(Self {
			api_version: K::api_version(&()).into_owned(),
			kind: K::kind(&()).into_owned(),
			name: meta.name.clone().ok_or(OwnerError::MissingName)?,
			namespace: meta.namespace.clone(),
			uid: meta.uid.clone(),
		})
	}

	/// Derive the owner from an untyped object, using its embedded type meta.
	pub fn from_dynamic(obj: &DynamicObject) -> Result<Self, OwnerError> {
		let types = obj.types.as_ref().ok_or(OwnerError::MissingTypeMeta)?;
		Ok(Self {
			api_version: types.api_version.clone(),
			kind: types.kind.clone(),
			name: obj.metadata.name.clone().ok_or(OwnerError::MissingName)?,
			namespace: obj.metadata.namespace.clone(),
			uid: obj.metadata.uid.clone(),
		})
	}

	/// Build the owner reference stamped onto owned objects.
	///
	/// The reference marks the owner as controller and blocks owner deletion
	/// until dependents are gone, matching foreground garbage collection.
	/// A missing UID yields an empty `uid`, which the API server rejects.
	pub fn to_owner_reference(&self) -> OwnerReference {
		OwnerReference {
			api_version: self.api_version.clone(),
			kind: self.kind.clone(),
			name: self.name.clone(),
			uid: self.uid.clone().unwrap_or_default(),
			controller: Some(true),
			block_owner_deletion: Some(true),
		}
	}
}
