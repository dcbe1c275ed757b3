//! Kind-name registry of built-in object models.
//!
//! Request bodies for known kinds are round-tripped through their typed
//! `k8s-openapi` model so malformed manifests are rejected locally.

use k8s_openapi::{
	api::{
		apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
		autoscaling::v2::HorizontalPodAutoscaler,
		batch::v1::{CronJob, Job},
		core::v1::{
			ConfigMap, Endpoints, Namespace, PersistentVolumeClaim, Pod, Secret, Service,
			ServiceAccount,
		},
		networking::v1::Ingress,
		rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
	},
	Resource,
};
use kube::api::DynamicObject;
use phf::phf_map;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("no object model registered for kind `{0}`")]
	ResourceNotFound(String),

	#[error("invalid {kind} object: {source}")]
	InvalidObject {
		kind: String,
		#[source]
		source: serde_json::Error,
	},
}

type Constructor = fn(Value) -> Result<DynamicObject, serde_json::Error>;

/// A registered kind.
pub struct ObjectKind {
	pub api_version: &'static str,
	pub kind: &'static str,
	construct: Constructor,
}

impl std::fmt::Debug for ObjectKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ObjectKind")
			.field("api_version", &self.api_version)
			.field("kind", &self.kind)
			.finish_non_exhaustive()
	}
}

const fn kind<K>() -> ObjectKind
where
	K: Resource + Serialize + DeserializeOwned,
{
	ObjectKind {
		api_version: K::API_VERSION,
		kind: K::KIND,
		construct: typed_round_trip::<K>,
	}
}

fn typed_round_trip<K>(body: Value) -> Result<DynamicObject, serde_json::Error>
where
	K: Resource + Serialize + DeserializeOwned,
{
	let typed: K = serde_json::from_value(body)?;
	serde_json::from_value(serde_json::to_value(typed)?)
}

static KINDS: phf::Map<&'static str, ObjectKind> = phf_map! {
	"Pod" => kind::<Pod>(),
	"Service" => kind::<Service>(),
	"ConfigMap" => kind::<ConfigMap>(),
	"Secret" => kind::<Secret>(),
	"ServiceAccount" => kind::<ServiceAccount>(),
	"Namespace" => kind::<Namespace>(),
	"Endpoints" => kind::<Endpoints>(),
	"PersistentVolumeClaim" => kind::<PersistentVolumeClaim>(),
	"Deployment" => kind::<Deployment>(),
	"ReplicaSet" => kind::<ReplicaSet>(),
	"StatefulSet" => kind::<StatefulSet>(),
	"DaemonSet" => kind::<DaemonSet>(),
	"Job" => kind::<Job>(),
	"CronJob" => kind::<CronJob>(),
	"Ingress" => kind::<Ingress>(),
	"Role" => kind::<Role>(),
	"RoleBinding" => kind::<RoleBinding>(),
	"ClusterRole" => kind::<ClusterRole>(),
	"ClusterRoleBinding" => kind::<ClusterRoleBinding>(),
	"HorizontalPodAutoscaler" => kind::<HorizontalPodAutoscaler>(),
};

pub fn lookup(kind: &str) -> Option<&'static ObjectKind> {
	KINDS.get(kind)
}

/// Registered kind names, in no particular order.
pub fn kinds() -> impl Iterator<Item = &'static str> {
	KINDS.keys().copied()
}

/// Build an object of a registered kind from a JSON body.
///
/// `apiVersion` and `kind` are filled in when absent.
pub fn construct(kind: &str, mut body: Value) -> Result<DynamicObject, RegistryError> {
	let entry = lookup(kind).ok_or_else(|| RegistryError::ResourceNotFound(kind.to_string()))?;
	if let Value::Object(map) = &mut body {
		map.entry("apiVersion")
			.or_insert_with(|| Value::from(entry.api_version));
		map.entry("kind").or_insert_with(|| Value::from(entry.kind));
	}
	(entry.construct)(body).map_err(|source| RegistryError::InvalidObject {
		kind: kind.to_string(),
		source,
	})
}
