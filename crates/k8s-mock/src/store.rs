//! In-memory object storage for the mock cluster.

use std::{
	collections::BTreeMap,
	sync::{Arc, PoisonError, RwLock},
};

/// Objects keyed by (collection path, name).
#[derive(Debug, Clone, Default)]
pub struct ObjectStore {
	objects: Arc<RwLock<BTreeMap<(String, String), serde_json::Value>>>,
}

impl ObjectStore {
	pub fn get(&self, collection: &str, name: &str) -> Option<serde_json::Value> {
		self.objects
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(&(collection.to_string(), name.to_string()))
			.cloned()
	}

	pub fn contains(&self, collection: &str, name: &str) -> bool {
		self.get(collection, name).is_some()
	}

	/// Store an object, assigning a uid when it has none.
	pub fn insert(
		&self,
		collection: &str,
		name: &str,
		mut object: serde_json::Value,
	) -> serde_json::Value {
		assign_uid(&mut object, collection, name);
		self.objects
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert((collection.to_string(), name.to_string()), object.clone());
		object
	}

	/// Merge `patch` into the stored object (or an empty one) and store the result.
	pub fn merge(
		&self,
		collection: &str,
		name: &str,
		patch: serde_json::Value,
	) -> serde_json::Value {
		let base = self
			.get(collection, name)
			.unwrap_or(serde_json::Value::Null);
		let merged = strip_patch_directives(merge_json(base, patch));
		self.insert(collection, name, merged)
	}

	pub fn len(&self) -> usize {
		self.objects
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

fn assign_uid(object: &mut serde_json::Value, collection: &str, name: &str) {
	if let Some(serde_json::Value::Object(metadata)) = object.get_mut("metadata") {
		metadata.entry("uid").or_insert_with(|| {
			let prefix = collection.replace('/', "-");
			serde_json::Value::String(format!("uid{prefix}-{name}"))
		});
	}
}

/// Deep merge two JSON values (patch into base).
fn merge_json(base: serde_json::Value, patch: serde_json::Value) -> serde_json::Value {
	match (base, patch) {
		(serde_json::Value::Object(mut base_map), serde_json::Value::Object(patch_map)) => {
			for (key, patch_value) in patch_map {
				let base_value = base_map.remove(&key).unwrap_or(serde_json::Value::Null);
				base_map.insert(key, merge_json(base_value, patch_value));
			}
			serde_json::Value::Object(base_map)
		}
		(_, patch) => patch,
	}
}

/// Drop strategic merge directives (`$patch`, `$setElementOrder/...`).
fn strip_patch_directives(value: serde_json::Value) -> serde_json::Value {
	match value {
		serde_json::Value::Object(map) => serde_json::Value::Object(
			map.into_iter()
				.filter(|(key, _)| !key.starts_with('$'))
				.map(|(key, val)| (key, strip_patch_directives(val)))
				.collect(),
		),
		serde_json::Value::Array(items) => {
			serde_json::Value::Array(items.into_iter().map(strip_patch_directives).collect())
		}
		other => other,
	}
}
