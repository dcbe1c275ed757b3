//! Per-kind API discovery.

use kube::{
	core::GroupVersionKind,
	discovery::{verbs, ApiResource},
	Client,
};
use tracing::{debug, instrument};

use super::{DynamicError, ResourceScope};

/// Where and how a kind is served, as advertised by the API server.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
	/// The kube ApiResource for making API calls.
	pub api_resource: ApiResource,
	/// Whether this resource is namespaced or cluster-wide.
	pub scope: ResourceScope,
	/// Verbs advertised for the resource.
	pub verbs: Vec<String>,
}

impl ResourceDescriptor {
	pub fn is_namespaced(&self) -> bool {
		self.scope == ResourceScope::Namespaced
	}

	pub fn supports(&self, verb: &str) -> bool {
		self.verbs.iter().any(|v| v == verb)
	}

	pub fn supports_watch(&self) -> bool {
		self.supports(verbs::WATCH)
	}

	/// Plural resource name used in REST paths, e.g. `deployments`.
	pub fn plural(&self) -> &str {
		&self.api_resource.plural
	}

	pub fn kind(&self) -> &str {
		&self.api_resource.kind
	}

	pub fn api_version(&self) -> &str {
		&self.api_resource.api_version
	}
}

/// Create a GroupVersionKind from an apiVersion string and kind.
pub fn gvk_from_api_version(api_version: &str, kind: &str) -> GroupVersionKind {
	let (group, version) = match api_version.split_once('/') {
		Some((g, v)) => (g, v),
		None => ("", api_version),
	};
	GroupVersionKind::gvk(group, version, kind)
}

/// Query the resource list of the kind's group version and pick the kind.
///
/// Issues exactly one request: `GET /api/{version}` for the core group,
/// `GET /apis/{group}/{version}` otherwise.
#[instrument(skip(client), fields(api_version = %gvk.api_version(), kind = %gvk.kind))]
pub(super) async fn discover(
	client: &Client,
	gvk: &GroupVersionKind,
) -> Result<ResourceDescriptor, DynamicError> {
	let not_found = || DynamicError::ResourceNotFound {
		api_version: gvk.api_version(),
		kind: gvk.kind.clone(),
	};

	let list = if gvk.group.is_empty() {
		client.list_core_api_resources(&gvk.version).await
	} else {
		client.list_api_group_resources(&gvk.api_version()).await
	};
	let list = match list {
		Ok(list) => list,
		Err(kube::Error::Api(ref err)) if err.code == 404 => return Err(not_found()),
		Err(e) => return Err(e.into()),
	};

	// Subresources (`pods/log`) share the parent's kind
	let resource = list
		.resources
		.into_iter()
		.find(|r| r.kind == gvk.kind && !r.name.contains('/'))
		.ok_or_else(not_found)?;

	debug!(plural = %resource.name, namespaced = resource.namespaced, "discovered resource");

	Ok(ResourceDescriptor {
		api_resource: ApiResource::from_gvk_with_plural(gvk, &resource.name),
		scope: if resource.namespaced {
			ResourceScope::Namespaced
		} else {
			ResourceScope::ClusterWide
		},
		verbs: resource.verbs,
	})
}
