//! Resolving the owning object from the cluster.

use kube::{
	api::{Api, DynamicObject},
	Client,
};
use thiserror::Error;
use tracing::instrument;

use super::{
	discovery::{gvk_from_api_version, ApiResourceCache, DiscoveryError},
	ResourceScope,
};
use crate::owner::{OwnerError, OwningResource};

#[derive(Debug, Error)]
pub enum FetchOwnerError {
	#[error(transparent)]
	Discovery(#[from] DiscoveryError),

	#[error("{kind}/{name} is namespaced, but no namespace was given for it")]
	MissingNamespace { kind: String, name: String },

	#[error("fetching owner {kind}/{name}")]
	Fetch {
		kind: String,
		name: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error(transparent)]
	Owner(#[from] OwnerError),
}

/// Read the owner object from the cluster so its UID can be referenced.
#[instrument(skip(client, cache))]
pub async fn fetch_owner(
	client: &Client,
	cache: &ApiResourceCache,
	api_version: &str,
	kind: &str,
	name: &str,
	namespace: Option<&str>,
) -> Result<OwningResource, FetchOwnerError> {
	let gvk = gvk_from_api_version(api_version, kind);
	let discovered = cache.resolve(client, &gvk).await?;

	let api: Api<DynamicObject> = match discovered.scope {
		ResourceScope::Namespaced => {
			let ns = namespace.ok_or_else(|| FetchOwnerError::MissingNamespace {
				kind: kind.to_string(),
				name: name.to_string(),
			})?;
			Api::namespaced_with(client.clone(), ns, &discovered.api_resource)
		}
		ResourceScope::ClusterWide => Api::all_with(client.clone(), &discovered.api_resource),
	};

	let mut obj = api.get(name).await.map_err(|e| FetchOwnerError::Fetch {
		kind: kind.to_string(),
		name: name.to_string(),
		source: Box::new(e),
	})?;

	// Objects read back from the API may omit their type meta.
	if obj.types.is_none() {
		obj.types = Some(kube::core::TypeMeta {
			api_version: api_version.to_string(),
			kind: kind.to_string(),
		});
	}

	let owner = OwningResource::from_dynamic(&obj)?;
	tracing::debug!(uid = ?owner.uid, "resolved owner");
	Ok(owner)
}
