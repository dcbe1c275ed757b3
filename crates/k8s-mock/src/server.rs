//! The mock server and its wiremock routes.

use std::{
	path::{Path, PathBuf},
	sync::{Arc, RwLock},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace, warn};
use wiremock::{
	matchers::{method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use crate::{
	discovery::MockDiscovery,
	store::{Location, Store, StoreError},
};

type SharedStore = Arc<RwLock<Store>>;

/// Configuration of a mock cluster.
#[derive(Builder, Default)]
pub struct MockCluster {
	#[builder(default)]
	discovery: MockDiscovery,
	/// Manifests present at startup. Their paths are derived from
	/// `apiVersion`/`kind` through the discovery data.
	#[builder(default)]
	objects: Vec<Value>,
}

/// A started mock cluster.
pub struct RunningMockCluster {
	server: MockServer,
	store: SharedStore,
	discovery: Arc<MockDiscovery>,
}

impl MockCluster {
	pub async fn start(self) -> RunningMockCluster {
		let server = MockServer::start().await;
		debug!(uri = %server.uri(), "started mock cluster");

		let discovery = Arc::new(self.discovery);
		let mut store = Store::default();
		let default_namespace = json!({
			"apiVersion": "v1",
			"kind": "Namespace",
			"metadata": {"name": "default"}
		});
		for object in std::iter::once(default_namespace).chain(self.objects) {
			match collection_for(&object, &discovery) {
				Some(location) => {
					if let Err(e) = store.insert(&location, object) {
						warn!(?e, "skipping seed object");
					}
				}
				None => warn!(%object, "seed object has no served collection"),
			}
		}

		let cluster = RunningMockCluster {
			server,
			store: Arc::new(RwLock::new(store)),
			discovery,
		};
		cluster.mount_health().await;
		cluster.mount_discovery().await;
		cluster.mount_objects().await;
		cluster
	}
}

fn collection_for(object: &Value, discovery: &MockDiscovery) -> Option<Location> {
	let api_version = object.get("apiVersion")?.as_str()?;
	let kind = object.get("kind")?.as_str()?;
	let resource = discovery.resource_for_kind(api_version, kind)?;
	let namespace = resource.namespaced.then(|| {
		object
			.pointer("/metadata/namespace")
			.and_then(Value::as_str)
			.unwrap_or("default")
			.to_string()
	});
	Some(Location {
		group_version: api_version.to_string(),
		plural: resource.name.clone(),
		namespaced: resource.namespaced,
		namespace,
		name: None,
	})
}

impl RunningMockCluster {
	/// Base URL, e.g. `http://127.0.0.1:12345`.
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// The underlying server, for mounting overriding routes.
	///
	/// Routes mounted with a priority below 5 take precedence over the
	/// built-in ones.
	pub fn inner(&self) -> &MockServer {
		&self.server
	}

	/// Number of received requests with exactly this method and path.
	pub async fn request_count(&self, http_method: &str, request_path: &str) -> usize {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.iter()
			.filter(|r| r.method.as_str() == http_method && r.url.path() == request_path)
			.count()
	}

	/// Number of discovery requests served so far.
	pub async fn discovery_request_count(&self) -> usize {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.iter()
			.filter(|r| is_discovery_path(r.url.path()))
			.count()
	}

	/// Current stored state of an object.
	pub fn object(&self, api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Option<Value> {
		let resource = self.discovery.resource_for_kind(api_version, kind)?;
		let location = Location {
			group_version: api_version.to_string(),
			plural: resource.name.clone(),
			namespaced: resource.namespaced,
			namespace: namespace.map(ToOwned::to_owned),
			name: None,
		};
		self.store.read().ok()?.get(&location, name).ok()
	}

	/// A kubeconfig with a single context pointing at this server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock")
	}

	/// A kubeconfig whose only context, `context_name`, is also current.
	///
	/// The user authenticates with the bearer token `mock-token`.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = format!("{context_name}-cluster");
		let user_name = format!("{context_name}-user");
		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.clone(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name,
					user: Some(user_name.clone()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name,
				auth_info: Some(AuthInfo {
					token: Some("mock-token".to_string().into()),
					..Default::default()
				}),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}

	async fn mount_health(&self) {
		for endpoint in ["/readyz", "/livez"] {
			Mock::given(method("GET"))
				.and(path_regex(format!("^{endpoint}(/.*)?$")))
				.respond_with(|req: &Request| {
					let verbose = req.url.query_pairs().any(|(k, _)| k == "verbose");
					let body = if verbose {
						"[+]ping ok\n[+]etcd ok\nhealthz check passed\n"
					} else {
						"ok"
					};
					ResponseTemplate::new(200).set_body_string(body)
				})
				.mount(&self.server)
				.await;
		}
	}

	async fn mount_discovery(&self) {
		Mock::given(method("GET"))
			.and(path("/api"))
			.respond_with(ResponseTemplate::new(200).set_body_json(self.discovery.api_versions()))
			.mount(&self.server)
			.await;

		Mock::given(method("GET"))
			.and(path("/apis"))
			.respond_with(ResponseTemplate::new(200).set_body_json(self.discovery.api_group_list()))
			.mount(&self.server)
			.await;

		for gv in self.discovery.group_versions.keys() {
			let Some(list) = self.discovery.resource_list(gv) else {
				continue;
			};
			let route = if gv.contains('/') {
				format!("^/apis/{gv}/?$")
			} else {
				format!("^/api/{gv}/?$")
			};
			Mock::given(method("GET"))
				.and(path_regex(route))
				.respond_with(ResponseTemplate::new(200).set_body_json(list))
				.mount(&self.server)
				.await;
		}
	}

	async fn mount_objects(&self) {
		for verb in ["GET", "POST", "PUT", "PATCH", "DELETE"] {
			let store = Arc::clone(&self.store);
			let discovery = Arc::clone(&self.discovery);
			Mock::given(method(verb))
				.and(path_regex(r"^/apis?/"))
				.respond_with(move |req: &Request| {
					let Some(location) = Location::parse(req.url.path(), &discovery) else {
						return status(404, "NotFound", "the server could not find the requested resource");
					};
					trace!(method = %req.method, path = %req.url.path(), "object request");
					handle(&store, &location, req)
				})
				.mount(&self.server)
				.await;
		}
	}
}

fn is_discovery_path(p: &str) -> bool {
	let segments: Vec<&str> = p.trim_matches('/').split('/').collect();
	matches!(
		segments.as_slice(),
		["api"] | ["apis"] | ["api", _] | ["apis", _] | ["apis", _, _]
	)
}

fn query(req: &Request, key: &str) -> Option<String> {
	req.url
		.query_pairs()
		.find(|(k, _)| k == key)
		.map(|(_, v)| v.into_owned())
}

fn handle(store: &SharedStore, location: &Location, req: &Request) -> ResponseTemplate {
	let labels = query(req, "labelSelector");
	let fields = query(req, "fieldSelector");
	let body = || serde_json::from_slice::<Value>(&req.body);

	let Ok(mut store) = store.write() else {
		return status(500, "InternalError", "store lock poisoned");
	};
	let result = match (req.method.as_str(), &location.name) {
		("GET", Some(name)) => store.get(location, name),
		("GET", None) => {
			if query(req, "watch").is_some_and(|w| w == "true" || w == "1") {
				// Watches end immediately; clients re-list or re-watch.
				return ResponseTemplate::new(200).set_body_string("");
			}
			let items = store.list(location, labels.as_deref(), fields.as_deref());
			Ok(list_body(items, store.resource_version()))
		}
		("POST", None) => match body() {
			Ok(object) => store.insert(location, object),
			Err(e) => Err(StoreError::BadRequest(e.to_string())),
		},
		("PUT", Some(name)) => match body() {
			Ok(object) => store.replace(location, name, object),
			Err(e) => Err(StoreError::BadRequest(e.to_string())),
		},
		("PATCH", Some(name)) => {
			let content_type = req
				.headers
				.get("content-type")
				.and_then(|v| v.to_str().ok())
				.unwrap_or_default();
			if content_type.starts_with("application/json-patch+json") {
				return status(415, "UnsupportedMediaType", "json patch is not supported");
			}
			match body() {
				Ok(patch) => store.patch(location, name, patch),
				Err(e) => Err(StoreError::BadRequest(e.to_string())),
			}
		}
		("DELETE", Some(name)) => store.remove(location, name),
		("DELETE", None) => {
			let removed = store.remove_matching(location, labels.as_deref());
			Ok(list_body(removed, store.resource_version()))
		}
		_ => return status(405, "MethodNotAllowed", "method not allowed"),
	};

	match result {
		Ok(object) => {
			let code = if req.method.as_str() == "POST" { 201 } else { 200 };
			ResponseTemplate::new(code).set_body_json(object)
		}
		Err(StoreError::NotFound(name)) => status(404, "NotFound", &format!("\"{name}\" not found")),
		Err(StoreError::AlreadyExists(name)) => {
			status(409, "AlreadyExists", &format!("\"{name}\" already exists"))
		}
		Err(StoreError::BadRequest(message)) => status(400, "BadRequest", &message),
	}
}

fn list_body(items: Vec<Value>, resource_version: String) -> Value {
	json!({
		"kind": "List",
		"apiVersion": "v1",
		"metadata": {"resourceVersion": resource_version},
		"items": items
	})
}

fn status(code: u16, reason: &str, message: &str) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}

/// Write `kubeconfig` as YAML to `dir/config` and return the path.
pub fn write_kubeconfig(kubeconfig: &Kubeconfig, dir: &Path) -> std::io::Result<PathBuf> {
	let path = dir.join("config");
	let yaml = serde_yaml::to_string(kubeconfig).map_err(std::io::Error::other)?;
	std::fs::write(&path, yaml)?;
	Ok(path)
}
