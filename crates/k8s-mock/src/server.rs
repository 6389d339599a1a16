//! Wiremock-backed mock Kubernetes API server.
//!
//! Serves legacy discovery for the configured resource types and a small
//! object API (GET, PATCH and POST) on top of an [`ObjectStore`]. The server
//! is reachable through a regular kubeconfig, so tests exercise the same
//! connection path as real clusters.

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use tracing::{debug, warn};
use wiremock::{
	matchers::{method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use crate::{discovery::MockDiscovery, store::ObjectStore};

/// Configuration of a mock cluster.
#[derive(Builder)]
pub struct MockCluster {
	/// Resource types served by discovery.
	#[builder(default)]
	discovery: MockDiscovery,
	/// Objects that exist before the first request.
	#[builder(default)]
	objects: Vec<serde_json::Value>,
	/// Writes to objects with this name fail with a 500.
	#[builder(into)]
	failing_name: Option<String>,
}

/// A running mock cluster.
pub struct RunningMockCluster {
	server: MockServer,
	store: ObjectStore,
	discovery: MockDiscovery,
}

/// A request received by the mock cluster.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
	pub method: String,
	pub path: String,
	pub query: Option<String>,
	pub content_type: Option<String>,
}

impl MockCluster {
	pub async fn start(self) -> RunningMockCluster {
		let server = MockServer::start().await;
		let store = ObjectStore::default();

		debug!(uri = %server.uri(), "started mock cluster");

		for object in self.objects {
			match object_location(&self.discovery, &object) {
				Some((collection, name)) => {
					store.insert(&collection, &name, object);
				}
				None => warn!(?object, "skipping seed object of unknown type"),
			}
		}

		mount_version(&server).await;
		mount_discovery(&server, &self.discovery).await;
		mount_objects(&server, &store, &self.discovery, self.failing_name).await;

		RunningMockCluster {
			server,
			store,
			discovery: self.discovery,
		}
	}
}

impl RunningMockCluster {
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Kubeconfig with a single `mock-context` pointing at this server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}

	/// Stored object of the given type, if any.
	pub fn object(
		&self,
		api_version: &str,
		kind: &str,
		namespace: Option<&str>,
		name: &str,
	) -> Option<serde_json::Value> {
		let collection = self
			.discovery
			.collection_path(api_version, kind, namespace)?;
		self.store.get(&collection, name)
	}

	pub fn store(&self) -> &ObjectStore {
		&self.store
	}

	/// Object API requests (writes and reads) received so far, in order.
	pub async fn object_requests(&self) -> Vec<RecordedRequest> {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.into_iter()
			.filter(|req| is_object_path(req.url.path()))
			.map(|req| RecordedRequest {
				method: req.method.as_str().to_string(),
				path: req.url.path().to_string(),
				query: req.url.query().map(str::to_string),
				content_type: content_type(&req),
			})
			.collect()
	}
}

fn object_location(
	discovery: &MockDiscovery,
	object: &serde_json::Value,
) -> Option<(String, String)> {
	let api_version = object.get("apiVersion")?.as_str()?;
	let kind = object.get("kind")?.as_str()?;
	let name = object.pointer("/metadata/name")?.as_str()?;
	let namespace = object
		.pointer("/metadata/namespace")
		.and_then(|v| v.as_str());
	let collection = discovery.collection_path(api_version, kind, namespace)?;
	Some((collection, name.to_string()))
}

/// Split an object path into (collection path, name).
///
/// `/api/v1/namespaces/default/configmaps/my-config` becomes
/// (`/api/v1/namespaces/default/configmaps`, `my-config`).
fn split_object_path(path: &str) -> (String, String) {
	let path = path.trim_end_matches('/');
	match path.rsplit_once('/') {
		Some((collection, name)) => (collection.to_string(), name.to_string()),
		None => (path.to_string(), String::new()),
	}
}

/// Discovery documents live at `/api/<v>` and `/apis/<g>/<v>`; everything deeper is an object path.
fn is_object_path(path: &str) -> bool {
	let segments = path.trim_matches('/').split('/').count();
	if path.starts_with("/apis/") {
		segments > 3
	} else if path.starts_with("/api/") {
		segments > 2
	} else {
		false
	}
}

fn content_type(req: &Request) -> Option<String> {
	req.headers
		.get("content-type")
		.and_then(|v| v.to_str().ok())
		.map(str::to_string)
}

fn status(code: u16, reason: &str, message: &str) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(serde_json::json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"major": "1",
			"minor": "31",
			"gitVersion": "v1.31.0",
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-08-13T00:00:00Z",
			"goVersion": "go1.22.5",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery) {
	for (api_version, resources) in &discovery.groups {
		let discovery_path = if api_version.contains('/') {
			format!("/apis/{api_version}")
		} else {
			format!("/api/{api_version}")
		};
		let resources: Vec<_> = resources
			.iter()
			.map(|r| r.to_api_resource_json())
			.collect();

		Mock::given(method("GET"))
			.and(path(discovery_path))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"kind": "APIResourceList",
				"apiVersion": "v1",
				"groupVersion": api_version,
				"resources": resources
			})))
			.mount(server)
			.await;
	}
}

async fn mount_objects(
	server: &MockServer,
	store: &ObjectStore,
	discovery: &MockDiscovery,
	failing_name: Option<String>,
) {
	let patch_store = store.clone();
	let patch_discovery = discovery.clone();
	let patch_failing = failing_name.clone();

	// Server-side apply creates missing objects, the other patch types 404 like a real apiserver
	Mock::given(method("PATCH"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let (collection, name) = split_object_path(req.url.path());
			if patch_failing.as_deref() == Some(name.as_str()) {
				return status(500, "InternalError", &format!("injected failure for {name}"));
			}

			let content_type = content_type(req).unwrap_or_default();
			if content_type.contains("strategic-merge-patch")
				&& patch_discovery.rejects_strategic_merge(req.url.path())
			{
				return status(
					415,
					"UnsupportedMediaType",
					"the body of the request was in an unknown format",
				);
			}
			if !content_type.contains("apply-patch") && !patch_store.contains(&collection, &name) {
				return status(404, "NotFound", &format!("{name} not found"));
			}

			let patch: serde_json::Value =
				serde_json::from_slice(&req.body).unwrap_or(serde_json::Value::Null);
			let stored = patch_store.merge(&collection, &name, patch);
			ResponseTemplate::new(200).set_body_json(stored)
		})
		.mount(server)
		.await;

	let post_store = store.clone();
	Mock::given(method("POST"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let collection = req.url.path().trim_end_matches('/').to_string();
			let body: serde_json::Value =
				serde_json::from_slice(&req.body).unwrap_or(serde_json::Value::Null);
			let Some(name) = body.pointer("/metadata/name").and_then(|v| v.as_str()) else {
				return status(422, "Invalid", "metadata.name is required");
			};
			if failing_name.as_deref() == Some(name) {
				return status(500, "InternalError", &format!("injected failure for {name}"));
			}
			if post_store.contains(&collection, name) {
				return status(409, "AlreadyExists", &format!("{name} already exists"));
			}

			let name = name.to_string();
			let stored = post_store.insert(&collection, &name, body);
			ResponseTemplate::new(201).set_body_json(stored)
		})
		.mount(server)
		.await;

	let get_store = store.clone();
	Mock::given(method("GET"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let (collection, name) = split_object_path(req.url.path());
			match get_store.get(&collection, &name) {
				Some(object) => ResponseTemplate::new(200).set_body_json(object),
				None => status(404, "NotFound", &format!("{name} not found")),
			}
		})
		.mount(server)
		.await;
}
