//! Generic verbs over a discovered resource.

use std::sync::Arc;

use bon::Builder;
use kube::{
	api::{Api, DeleteParams, DynamicObject, ListParams, ObjectList, Patch, PatchParams, PostParams},
	Client,
};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{DynamicError, ResourceDescriptor};
use crate::registry;

/// Which objects a verb applies to.
///
/// Only the filters set here are forwarded to the server.
#[derive(Debug, Clone, Default, Builder)]
pub struct Target {
	#[builder(into)]
	pub namespace: Option<String>,
	#[builder(into)]
	pub name: Option<String>,
	#[builder(into)]
	pub label_selector: Option<String>,
	#[builder(into)]
	pub field_selector: Option<String>,
}

impl Target {
	/// Whether a name or selector narrows the target.
	pub fn has_selector(&self) -> bool {
		self.name.is_some() || self.label_selector.is_some() || self.field_selector.is_some()
	}

	pub(super) fn list_params(&self) -> ListParams {
		let mut params = ListParams::default();
		if let Some(labels) = &self.label_selector {
			params = params.labels(labels);
		}
		if let Some(fields) = &self.field_selector {
			params = params.fields(fields);
		}
		params
	}
}

/// Result of [`ResourceHandle::get`].
#[derive(Debug, Clone)]
pub enum ResourceOrList {
	Object(DynamicObject),
	List(ObjectList<DynamicObject>),
}

impl ResourceOrList {
	pub fn into_items(self) -> Vec<DynamicObject> {
		match self {
			ResourceOrList::Object(object) => vec![object],
			ResourceOrList::List(list) => list.items,
		}
	}
}

/// A discovered kind with get/create/replace/patch/delete/watch verbs.
#[derive(Clone)]
pub struct ResourceHandle {
	client: Client,
	descriptor: Arc<ResourceDescriptor>,
}

impl std::fmt::Debug for ResourceHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ResourceHandle")
			.field("descriptor", &self.descriptor)
			.finish_non_exhaustive()
	}
}

impl ResourceHandle {
	pub(super) fn new(client: Client, descriptor: Arc<ResourceDescriptor>) -> Self {
		Self { client, descriptor }
	}

	pub fn descriptor(&self) -> &Arc<ResourceDescriptor> {
		&self.descriptor
	}

	fn invalid(&self, reason: &'static str) -> DynamicError {
		DynamicError::InvalidSelector {
			kind: self.descriptor.kind().to_string(),
			reason,
		}
	}

	/// A name addresses one object and cannot be narrowed further.
	fn validate_name_alone(&self, target: &Target) -> Result<(), DynamicError> {
		if target.name.is_some()
			&& (target.label_selector.is_some() || target.field_selector.is_some())
		{
			return Err(self.invalid("name cannot be combined with label_selector or field_selector"));
		}
		Ok(())
	}

	/// Namespaced kinds need a namespace; every kind needs a name or selector.
	fn validate_mutation(&self, target: &Target) -> Result<(), DynamicError> {
		if self.descriptor.is_namespaced() && target.namespace.is_none() {
			return Err(self.invalid("namespace is required for a namespaced kind"));
		}
		if !target.has_selector() {
			return Err(self.invalid("one of name, label_selector or field_selector is required"));
		}
		self.validate_name_alone(target)
	}

	pub(super) fn api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
		let ar = &self.descriptor.api_resource;
		match namespace {
			Some(ns) if self.descriptor.is_namespaced() => {
				Api::namespaced_with(self.client.clone(), ns, ar)
			}
			_ => Api::all_with(self.client.clone(), ar),
		}
	}

	/// Fetch one object by name, or list objects matching the selectors.
	#[instrument(skip(self), fields(kind = %self.descriptor.kind()))]
	pub async fn get(&self, target: &Target) -> Result<ResourceOrList, DynamicError> {
		if self.descriptor.is_namespaced() && target.namespace.is_none() {
			return Err(self.invalid("namespace is required for a namespaced kind"));
		}
		self.validate_name_alone(target)?;
		let api = self.api(target.namespace.as_deref());
		match &target.name {
			Some(name) => Ok(ResourceOrList::Object(api.get(name).await?)),
			None => Ok(ResourceOrList::List(api.list(&target.list_params()).await?)),
		}
	}

	/// Create an object from a manifest.
	///
	/// Namespace and name missing from the target are taken from the
	/// manifest's metadata, and the target's values are written back into it.
	#[instrument(skip(self, body), fields(kind = %self.descriptor.kind()))]
	pub async fn create(
		&self,
		target: &Target,
		mut body: Value,
	) -> Result<DynamicObject, DynamicError> {
		let target = self.merge_metadata(target, &mut body)?;
		self.validate_mutation(&target)?;

		let object = self.build_object(body)?;
		let api = self.api(target.namespace.as_deref());
		debug!(name = ?object.metadata.name, "creating");
		Ok(api.create(&PostParams::default(), &object).await?)
	}

	/// Replace every targeted object with `body`.
	#[instrument(skip(self, body), fields(kind = %self.descriptor.kind()))]
	pub async fn replace(
		&self,
		target: &Target,
		mut body: Value,
	) -> Result<Vec<DynamicObject>, DynamicError> {
		let target = self.merge_metadata(target, &mut body)?;
		self.validate_mutation(&target)?;

		let api = self.api(target.namespace.as_deref());
		let mut replaced = Vec::new();
		for name in self.target_names(&api, &target).await? {
			let mut body = body.clone();
			set_metadata(&mut body, "name", &name);
			let object = self.build_object(body)?;
			replaced.push(api.replace(&name, &PostParams::default(), &object).await?);
		}
		Ok(replaced)
	}

	/// Patch every targeted object.
	#[instrument(skip(self, patch), fields(kind = %self.descriptor.kind()))]
	pub async fn patch(
		&self,
		target: &Target,
		patch: &Patch<Value>,
	) -> Result<Vec<DynamicObject>, DynamicError> {
		self.validate_mutation(target)?;

		let api = self.api(target.namespace.as_deref());
		let mut patched = Vec::new();
		for name in self.target_names(&api, target).await? {
			patched.push(api.patch(&name, &PatchParams::default(), patch).await?);
		}
		Ok(patched)
	}

	/// Delete one object by name, or every object matching the selectors.
	#[instrument(skip(self), fields(kind = %self.descriptor.kind()))]
	pub async fn delete(&self, target: &Target) -> Result<(), DynamicError> {
		self.validate_mutation(target)?;

		let api = self.api(target.namespace.as_deref());
		let params = DeleteParams::default();
		match &target.name {
			Some(name) => {
				api.delete(name, &params).await?;
			}
			None => {
				api.delete_collection(&params, &target.list_params()).await?;
			}
		}
		Ok(())
	}

	/// Names addressed by the target: its name, or the current selector matches.
	async fn target_names(
		&self,
		api: &Api<DynamicObject>,
		target: &Target,
	) -> Result<Vec<String>, DynamicError> {
		if let Some(name) = &target.name {
			return Ok(vec![name.clone()]);
		}
		let list = api.list(&target.list_params()).await?;
		Ok(list
			.items
			.into_iter()
			.filter_map(|object| object.metadata.name)
			.collect())
	}

	/// Fill gaps between the target and the manifest metadata.
	fn merge_metadata(&self, target: &Target, body: &mut Value) -> Result<Target, DynamicError> {
		let Value::Object(map) = &mut *body else {
			return Err(DynamicError::InvalidBody("manifest must be a JSON object".into()));
		};
		map.entry("apiVersion")
			.or_insert_with(|| Value::from(self.descriptor.api_version()));
		map.entry("kind")
			.or_insert_with(|| Value::from(self.descriptor.kind()));

		let from_body = |field: &str| {
			body.pointer(&format!("/metadata/{field}"))
				.and_then(Value::as_str)
				.map(ToOwned::to_owned)
		};
		let mut merged = target.clone();
		// Selectors address their own objects; the manifest's name is not a filter.
		if !merged.has_selector() {
			merged.name = from_body("name");
		}
		if self.descriptor.is_namespaced() && merged.namespace.is_none() {
			merged.namespace = from_body("namespace");
		}

		if let Some(name) = &merged.name {
			set_metadata(body, "name", name);
		}
		if let (true, Some(namespace)) = (self.descriptor.is_namespaced(), &merged.namespace) {
			set_metadata(body, "namespace", namespace);
		}
		Ok(merged)
	}

	/// Known kinds are checked against their typed model first.
	fn build_object(&self, body: Value) -> Result<DynamicObject, DynamicError> {
		let kind = self.descriptor.kind();
		match registry::lookup(kind) {
			Some(entry) if entry.api_version == self.descriptor.api_version() => {
				Ok(registry::construct(kind, body)?)
			}
			_ => Ok(serde_json::from_value(body)?),
		}
	}
}

fn set_metadata(body: &mut Value, field: &str, value: &str) {
	if let Value::Object(map) = body {
		let metadata = map
			.entry("metadata")
			.or_insert_with(|| Value::Object(serde_json::Map::new()));
		if let Value::Object(metadata) = metadata {
			metadata.insert(field.to_string(), Value::from(value));
		}
	}
}
