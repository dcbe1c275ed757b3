//! Discovery documents served by the mock.

use std::collections::BTreeMap;

use serde_json::{json, Value};

const ALL_VERBS: [&str; 8] = [
	"create",
	"delete",
	"deletecollection",
	"get",
	"list",
	"patch",
	"update",
	"watch",
];

/// Resources served per group version.
///
/// Core resources live under the `v1` key.
#[derive(Clone, Debug)]
pub struct MockDiscovery {
	pub group_versions: BTreeMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		let mut discovery = Self {
			group_versions: BTreeMap::new(),
		};
		discovery.add(
			"v1",
			[
				MockApiResource::namespaced("pods", "Pod"),
				MockApiResource::subresource("pods/exec", "PodExecOptions"),
				MockApiResource::subresource("pods/status", "Pod"),
				MockApiResource::namespaced("configmaps", "ConfigMap"),
				MockApiResource::namespaced("secrets", "Secret"),
				MockApiResource::namespaced("services", "Service"),
				MockApiResource::namespaced("serviceaccounts", "ServiceAccount"),
				MockApiResource::cluster_scoped("namespaces", "Namespace"),
				MockApiResource::cluster_scoped("nodes", "Node"),
			],
		);
		discovery.add(
			"apps/v1",
			[
				MockApiResource::namespaced("deployments", "Deployment"),
				MockApiResource::subresource("deployments/scale", "Scale"),
				MockApiResource::namespaced("statefulsets", "StatefulSet"),
				MockApiResource::namespaced("daemonsets", "DaemonSet"),
			],
		);
		discovery.add("batch/v1", [MockApiResource::namespaced("jobs", "Job")]);
		discovery.add(
			"rbac.authorization.k8s.io/v1",
			[
				MockApiResource::namespaced("roles", "Role"),
				MockApiResource::cluster_scoped("clusterroles", "ClusterRole"),
			],
		);
		discovery
	}
}

impl MockDiscovery {
	/// Serve additional resources, e.g. custom resource definitions.
	pub fn add(
		&mut self,
		group_version: &str,
		resources: impl IntoIterator<Item = MockApiResource>,
	) -> &mut Self {
		self.group_versions
			.entry(group_version.to_string())
			.or_default()
			.extend(resources);
		self
	}

	/// Find a top-level resource by plural name.
	pub fn resource(&self, group_version: &str, plural: &str) -> Option<&MockApiResource> {
		self.group_versions
			.get(group_version)?
			.iter()
			.find(|r| r.name == plural)
	}

	/// Find a top-level resource by kind.
	pub fn resource_for_kind(&self, group_version: &str, kind: &str) -> Option<&MockApiResource> {
		self.group_versions
			.get(group_version)?
			.iter()
			.find(|r| r.kind == kind && !r.name.contains('/'))
	}

	pub(crate) fn api_versions(&self) -> Value {
		json!({
			"kind": "APIVersions",
			"versions": ["v1"],
			"serverAddressByClientCIDRs": []
		})
	}

	pub(crate) fn api_group_list(&self) -> Value {
		let groups: Vec<_> = self
			.group_versions
			.keys()
			.filter_map(|gv| gv.split_once('/'))
			.map(|(group, version)| {
				let gv = format!("{group}/{version}");
				json!({
					"name": group,
					"versions": [{"groupVersion": gv, "version": version}],
					"preferredVersion": {"groupVersion": gv, "version": version}
				})
			})
			.collect();
		json!({"kind": "APIGroupList", "apiVersion": "v1", "groups": groups})
	}

	pub(crate) fn resource_list(&self, group_version: &str) -> Option<Value> {
		let resources: Vec<_> = self
			.group_versions
			.get(group_version)?
			.iter()
			.map(|r| {
				json!({
					"name": r.name,
					"singularName": "",
					"namespaced": r.namespaced,
					"kind": r.kind,
					"verbs": r.verbs,
				})
			})
			.collect();
		Some(json!({
			"kind": "APIResourceList",
			"apiVersion": "v1",
			"groupVersion": group_version,
			"resources": resources
		}))
	}
}

#[derive(Clone, Debug)]
pub struct MockApiResource {
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

impl MockApiResource {
	fn new(name: &str, kind: &str, namespaced: bool, verbs: &[&str]) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced,
			verbs: verbs.iter().map(|v| (*v).to_string()).collect(),
		}
	}

	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self::new(name, kind, true, &ALL_VERBS)
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self::new(name, kind, false, &ALL_VERBS)
	}

	/// A `parent/sub` entry, listed in discovery but not served by the store.
	pub fn subresource(name: &str, kind: &str) -> Self {
		Self::new(name, kind, true, &["get", "create"])
	}
}
