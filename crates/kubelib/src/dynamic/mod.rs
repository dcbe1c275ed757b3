//! Generic access to arbitrary resource kinds.
//!
//! Kinds are addressed by `(apiVersion, kind)` and resolved to REST paths
//! through the server's discovery documents. Each group version is queried
//! at most once per kind for the lifetime of a session configuration.

mod discovery;
mod handle;
mod watch;

use std::{collections::HashMap, sync::Arc, time::Duration};

use kube::{core::GroupVersionKind, Client};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

pub use self::{
	discovery::{gvk_from_api_version, ResourceDescriptor},
	handle::{ResourceHandle, ResourceOrList, Target},
	watch::{ResourceEvent, WatchOptions},
};
use crate::{registry::RegistryError, ClientConfiguration};

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
	/// Resource is namespaced (e.g., Deployment, ConfigMap).
	Namespaced,

	/// Resource is cluster-wide (e.g., Namespace, ClusterRole).
	ClusterWide,
}

/// Errors raised by dynamic resource operations.
#[derive(Debug, Error)]
pub enum DynamicError {
	#[error("no resource of kind `{kind}` is served for apiVersion `{api_version}`")]
	ResourceNotFound { api_version: String, kind: String },

	#[error("invalid selector for {kind}: {reason}")]
	InvalidSelector { kind: String, reason: &'static str },

	#[error("invalid request body: {0}")]
	InvalidBody(String),

	#[error("timed out after {timeout:?} waiting for {what}")]
	Timeout { what: String, timeout: Duration },

	#[error("cancelled while waiting for {what}")]
	Cancelled { what: String },

	#[error("no pods match selector `{selector}` in namespace `{namespace}`")]
	PodsNotFound { namespace: String, selector: String },

	#[error(transparent)]
	Registry(#[from] RegistryError),

	#[error(transparent)]
	Serialization(#[from] serde_json::Error),

	#[error(transparent)]
	Watch(#[from] kube::runtime::watcher::Error),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// Resolves `(apiVersion, kind)` pairs to [`ResourceHandle`]s.
///
/// Owned by a [`Session`](crate::Session); a reconfiguration builds a new
/// resolver, which drops the discovery cache.
pub struct DynamicResourceResolver {
	client: Client,
	config: Arc<ClientConfiguration>,
	cache: Mutex<HashMap<GroupVersionKind, Arc<ResourceDescriptor>>>,
}

impl std::fmt::Debug for DynamicResourceResolver {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DynamicResourceResolver")
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

impl DynamicResourceResolver {
	pub(crate) fn new(client: Client, config: Arc<ClientConfiguration>) -> Self {
		Self {
			client,
			config,
			cache: Mutex::new(HashMap::new()),
		}
	}

	pub fn configuration(&self) -> &Arc<ClientConfiguration> {
		&self.config
	}

	/// Resolve a kind to a handle, discovering it on first use.
	pub async fn resolve(&self, api_version: &str, kind: &str) -> Result<ResourceHandle, DynamicError> {
		let descriptor = self.descriptor(api_version, kind).await?;
		Ok(ResourceHandle::new(self.client.clone(), descriptor))
	}

	/// The cached descriptor for a kind, discovering it on first use.
	///
	/// The lock is held across discovery so concurrent callers share one
	/// request.
	#[instrument(skip(self))]
	pub async fn descriptor(
		&self,
		api_version: &str,
		kind: &str,
	) -> Result<Arc<ResourceDescriptor>, DynamicError> {
		let gvk = gvk_from_api_version(api_version, kind);
		let mut cache = self.cache.lock().await;
		if let Some(descriptor) = cache.get(&gvk) {
			debug!("discovery cache hit");
			return Ok(Arc::clone(descriptor));
		}

		let descriptor = Arc::new(discovery::discover(&self.client, &gvk).await?);
		cache.insert(gvk, Arc::clone(&descriptor));
		Ok(descriptor)
	}

	/// Number of kinds resolved so far.
	pub async fn cached_kinds(&self) -> usize {
		self.cache.lock().await.len()
	}
}
