//! Typed API-group clients sharing one configuration.

use std::sync::Arc;

use kube::{
	api::{Api, DynamicObject},
	core::{ClusterResourceScope, NamespaceResourceScope},
	discovery::ApiResource,
	Client, Resource,
};

use super::ClientConfiguration;

/// API groups a session exposes a typed client for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiGroup {
	Core,
	Apps,
	Batch,
	Networking,
	Rbac,
	Autoscaling,
	/// Any group; addressed through an [`ApiResource`].
	CustomObjects,
}

impl ApiGroup {
	pub const ALL: [ApiGroup; 7] = [
		ApiGroup::Core,
		ApiGroup::Apps,
		ApiGroup::Batch,
		ApiGroup::Networking,
		ApiGroup::Rbac,
		ApiGroup::Autoscaling,
		ApiGroup::CustomObjects,
	];

	/// Short name, e.g. `apps/v1`.
	pub fn name(self) -> &'static str {
		match self {
			ApiGroup::Core => "core/v1",
			ApiGroup::Apps => "apps/v1",
			ApiGroup::Batch => "batch/v1",
			ApiGroup::Networking => "networking/v1",
			ApiGroup::Rbac => "rbac.authorization/v1",
			ApiGroup::Autoscaling => "autoscaling/v1",
			ApiGroup::CustomObjects => "custom-objects",
		}
	}

	/// Kubernetes API group served, `None` for custom objects.
	pub fn group(self) -> Option<&'static str> {
		match self {
			ApiGroup::Core => Some(""),
			ApiGroup::Apps => Some("apps"),
			ApiGroup::Batch => Some("batch"),
			ApiGroup::Networking => Some("networking.k8s.io"),
			ApiGroup::Rbac => Some("rbac.authorization.k8s.io"),
			ApiGroup::Autoscaling => Some("autoscaling"),
			ApiGroup::CustomObjects => None,
		}
	}

	/// Whether kinds of `group` belong to this client.
	pub fn serves(self, group: &str) -> bool {
		self.group().is_none_or(|g| g == group)
	}
}

/// A client bound to one API group.
///
/// Every client of a session clones the same transport and holds the same
/// [`ClientConfiguration`], so transport policy is identical across them.
#[derive(Clone)]
pub struct TypedApiClient {
	group: ApiGroup,
	client: Client,
	config: Arc<ClientConfiguration>,
}

impl std::fmt::Debug for TypedApiClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TypedApiClient")
			.field("group", &self.group)
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

impl TypedApiClient {
	fn new(group: ApiGroup, client: Client, config: Arc<ClientConfiguration>) -> Self {
		Self {
			group,
			client,
			config,
		}
	}

	pub fn group(&self) -> ApiGroup {
		self.group
	}

	pub fn client(&self) -> &Client {
		&self.client
	}

	pub fn configuration(&self) -> &Arc<ClientConfiguration> {
		&self.config
	}

	pub fn accepts_invalid_certs(&self) -> bool {
		self.config.accepts_invalid_certs()
	}

	fn debug_check_group<K: Resource<DynamicType = ()>>(&self) {
		debug_assert!(
			self.group.serves(&K::group(&())),
			"{} is not served by {}",
			K::kind(&()),
			self.group.name()
		);
	}

	/// Namespaced API for a kind of this group.
	pub fn namespaced<K>(&self, namespace: &str) -> Api<K>
	where
		K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
	{
		self.debug_check_group::<K>();
		Api::namespaced(self.client.clone(), namespace)
	}

	/// Namespaced API in the configuration's default namespace.
	pub fn default_namespaced<K>(&self) -> Api<K>
	where
		K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
	{
		self.namespaced(self.config.default_namespace())
	}

	/// API for a cluster-scoped kind of this group.
	pub fn cluster<K>(&self) -> Api<K>
	where
		K: Resource<Scope = ClusterResourceScope, DynamicType = ()>,
	{
		self.debug_check_group::<K>();
		Api::all(self.client.clone())
	}

	/// API across all namespaces.
	pub fn all<K>(&self) -> Api<K>
	where
		K: Resource<DynamicType = ()>,
	{
		self.debug_check_group::<K>();
		Api::all(self.client.clone())
	}

	/// Namespaced API for a resource known only at runtime.
	pub fn namespaced_with(&self, namespace: &str, resource: &ApiResource) -> Api<DynamicObject> {
		Api::namespaced_with(self.client.clone(), namespace, resource)
	}

	/// Cluster-wide API for a resource known only at runtime.
	pub fn all_with(&self, resource: &ApiResource) -> Api<DynamicObject> {
		Api::all_with(self.client.clone(), resource)
	}
}

/// The fixed set of typed clients of a session.
#[derive(Debug, Clone)]
pub struct ApiClients {
	pub core: TypedApiClient,
	pub apps: TypedApiClient,
	pub batch: TypedApiClient,
	pub networking: TypedApiClient,
	pub rbac: TypedApiClient,
	pub autoscaling: TypedApiClient,
	pub custom_objects: TypedApiClient,
}

impl ApiClients {
	pub(crate) fn new(client: &Client, config: &Arc<ClientConfiguration>) -> Self {
		let make = |group| TypedApiClient::new(group, client.clone(), Arc::clone(config));
		Self {
			core: make(ApiGroup::Core),
			apps: make(ApiGroup::Apps),
			batch: make(ApiGroup::Batch),
			networking: make(ApiGroup::Networking),
			rbac: make(ApiGroup::Rbac),
			autoscaling: make(ApiGroup::Autoscaling),
			custom_objects: make(ApiGroup::CustomObjects),
		}
	}

	pub fn get(&self, group: ApiGroup) -> &TypedApiClient {
		match group {
			ApiGroup::Core => &self.core,
			ApiGroup::Apps => &self.apps,
			ApiGroup::Batch => &self.batch,
			ApiGroup::Networking => &self.networking,
			ApiGroup::Rbac => &self.rbac,
			ApiGroup::Autoscaling => &self.autoscaling,
			ApiGroup::CustomObjects => &self.custom_objects,
		}
	}

	pub fn iter(&self) -> impl Iterator<Item = &TypedApiClient> {
		ApiGroup::ALL.into_iter().map(|group| self.get(group))
	}
}
