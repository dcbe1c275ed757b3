//! In-memory object store behind the mock's REST endpoints.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::discovery::MockDiscovery;

/// Where a request path points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Location {
	pub group_version: String,
	pub plural: String,
	pub namespaced: bool,
	pub namespace: Option<String>,
	pub name: Option<String>,
}

impl Location {
	/// Parse `/api/v1/...` and `/apis/<group>/<version>/...` object paths.
	///
	/// Subresource paths and paths of unserved resources yield `None`.
	pub fn parse(path: &str, discovery: &MockDiscovery) -> Option<Self> {
		let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
		let (group_version, rest) = match segments.as_slice() {
			["api", version, rest @ ..] => ((*version).to_string(), rest),
			["apis", group, version, rest @ ..] => (format!("{group}/{version}"), rest),
			_ => return None,
		};

		let (namespace, plural, name) = match rest {
			["namespaces", ns, plural, tail @ ..]
				if discovery
					.resource(&group_version, plural)
					.is_some_and(|r| r.namespaced) =>
			{
				(Some((*ns).to_string()), *plural, tail)
			}
			[plural, tail @ ..] => (None, *plural, tail),
			[] => return None,
		};
		let name = match name {
			[] => None,
			[name] => Some((*name).to_string()),
			_ => return None,
		};
		let resource = discovery.resource(&group_version, plural)?;
		if !resource.namespaced && namespace.is_some() {
			return None;
		}
		Some(Self {
			group_version,
			plural: plural.to_string(),
			namespaced: resource.namespaced,
			namespace,
			name,
		})
	}

	fn key(&self, name: &str) -> Key {
		(
			self.group_version.clone(),
			self.plural.clone(),
			self.namespace.clone().unwrap_or_default(),
			name.to_string(),
		)
	}

	fn contains(&self, key: &Key) -> bool {
		let (group_version, plural, namespace, _) = key;
		*group_version == self.group_version
			&& *plural == self.plural
			&& self.namespace.as_ref().is_none_or(|ns| ns == namespace)
	}
}

/// group version, plural, namespace ("" when cluster scoped), name
type Key = (String, String, String, String);

#[derive(Debug)]
pub(crate) enum StoreError {
	NotFound(String),
	AlreadyExists(String),
	BadRequest(String),
}

#[derive(Default, Debug)]
pub(crate) struct Store {
	objects: BTreeMap<Key, Value>,
	resource_version: u64,
}

impl Store {
	fn stamp(&mut self, object: &mut Value) {
		self.resource_version += 1;
		let version = self.resource_version.to_string();
		if let Some(metadata) = metadata_mut(object) {
			metadata.insert("resourceVersion".into(), Value::from(version));
			metadata
				.entry("uid")
				.or_insert_with(|| Value::from(format!("mock-uid-{}", self.resource_version)));
		}
	}

	pub fn resource_version(&self) -> String {
		self.resource_version.to_string()
	}

	pub fn insert(&mut self, location: &Location, mut object: Value) -> Result<Value, StoreError> {
		let name = object
			.pointer("/metadata/name")
			.and_then(Value::as_str)
			.map(ToOwned::to_owned)
			.ok_or_else(|| StoreError::BadRequest("metadata.name is required".into()))?;
		if location.namespaced {
			let namespace = location
				.namespace
				.clone()
				.ok_or_else(|| StoreError::BadRequest("namespace is required".into()))?;
			if let Some(metadata) = metadata_mut(&mut object) {
				metadata.insert("namespace".into(), Value::from(namespace));
			}
		}

		let key = location.key(&name);
		if self.objects.contains_key(&key) {
			return Err(StoreError::AlreadyExists(name));
		}
		self.stamp(&mut object);
		self.objects.insert(key, object.clone());
		Ok(object)
	}

	pub fn get(&self, location: &Location, name: &str) -> Result<Value, StoreError> {
		self.objects
			.get(&location.key(name))
			.cloned()
			.ok_or_else(|| StoreError::NotFound(name.to_string()))
	}

	pub fn list(&self, location: &Location, label_selector: Option<&str>, field_selector: Option<&str>) -> Vec<Value> {
		self.objects
			.iter()
			.filter(|(key, _)| location.contains(key))
			.map(|(_, object)| object)
			.filter(|object| label_selector.is_none_or(|s| matches_labels(object, s)))
			.filter(|object| field_selector.is_none_or(|s| matches_fields(object, s)))
			.cloned()
			.collect()
	}

	pub fn replace(&mut self, location: &Location, name: &str, mut object: Value) -> Result<Value, StoreError> {
		let key = location.key(name);
		if !self.objects.contains_key(&key) {
			return Err(StoreError::NotFound(name.to_string()));
		}
		if let (Some(namespace), Some(metadata)) = (&location.namespace, metadata_mut(&mut object)) {
			metadata.insert("namespace".into(), Value::from(namespace.as_str()));
		}
		self.stamp(&mut object);
		self.objects.insert(key, object.clone());
		Ok(object)
	}

	pub fn patch(&mut self, location: &Location, name: &str, patch: Value) -> Result<Value, StoreError> {
		let existing = self.get(location, name)?;
		let merged = strip_directives(merge_json(existing, patch));
		self.replace(location, name, merged)
	}

	pub fn remove(&mut self, location: &Location, name: &str) -> Result<Value, StoreError> {
		self.objects
			.remove(&location.key(name))
			.ok_or_else(|| StoreError::NotFound(name.to_string()))
	}

	pub fn remove_matching(&mut self, location: &Location, label_selector: Option<&str>) -> Vec<Value> {
		let keys: Vec<Key> = self
			.objects
			.iter()
			.filter(|(key, object)| {
				location.contains(key) && label_selector.is_none_or(|s| matches_labels(object, s))
			})
			.map(|(key, _)| key.clone())
			.collect();
		keys.into_iter()
			.filter_map(|key| self.objects.remove(&key))
			.collect()
	}
}

fn metadata_mut(object: &mut Value) -> Option<&mut Map<String, Value>> {
	object
		.as_object_mut()?
		.entry("metadata")
		.or_insert_with(|| json!({}))
		.as_object_mut()
}

/// JSON merge patch (RFC 7386): `null` removes a key.
pub(crate) fn merge_json(base: Value, patch: Value) -> Value {
	match (base, patch) {
		(Value::Object(mut base), Value::Object(patch)) => {
			for (key, value) in patch {
				if value.is_null() {
					base.remove(&key);
					continue;
				}
				let existing = base.remove(&key).unwrap_or(Value::Null);
				base.insert(key, merge_json(existing, value));
			}
			Value::Object(base)
		}
		(_, patch) => patch,
	}
}

/// Strategic merge patch directives (`$patch`, `$retainKeys`, ...) are
/// instructions, not content.
fn strip_directives(value: Value) -> Value {
	match value {
		Value::Object(map) => Value::Object(
			map.into_iter()
				.filter(|(key, _)| !key.starts_with('$'))
				.map(|(key, value)| (key, strip_directives(value)))
				.collect(),
		),
		Value::Array(items) => Value::Array(items.into_iter().map(strip_directives).collect()),
		other => other,
	}
}

/// Equality-based label selectors: `k=v`, `k==v`, `k!=v`, `k`, `!k`.
pub(crate) fn matches_labels(object: &Value, selector: &str) -> bool {
	let labels = object.pointer("/metadata/labels").and_then(Value::as_object);
	let label = |key: &str| labels.and_then(|l| l.get(key)).and_then(Value::as_str);

	selector
		.split(',')
		.map(str::trim)
		.filter(|term| !term.is_empty())
		.all(|term| {
			if let Some((key, value)) = term.split_once("!=") {
				label(key.trim()) != Some(value.trim())
			} else if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
				label(key.trim()) == Some(value.trim())
			} else if let Some(key) = term.strip_prefix('!') {
				label(key.trim()).is_none()
			} else {
				label(term).is_some()
			}
		})
}

/// Field selectors on `metadata.name` and `metadata.namespace`.
///
/// Other fields are accepted and not filtered on.
pub(crate) fn matches_fields(object: &Value, selector: &str) -> bool {
	selector
		.split(',')
		.filter_map(|term| {
			let (field, value, negate) = match term.split_once("!=") {
				Some((field, value)) => (field, value, true),
				None => {
					let (field, value) = term.split_once("==").or_else(|| term.split_once('='))?;
					(field, value, false)
				}
			};
			let pointer = match field.trim() {
				"metadata.name" => "/metadata/name",
				"metadata.namespace" => "/metadata/namespace",
				_ => return None,
			};
			let actual = object.pointer(pointer).and_then(Value::as_str);
			Some((actual == Some(value.trim())) != negate)
		})
		.all(|matched| matched)
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn pod(name: &str, app: &str) -> Value {
		json!({
			"apiVersion": "v1",
			"kind": "Pod",
			"metadata": {"name": name, "labels": {"app": app, "tier": "web"}}
		})
	}

	#[test]
	fn test_parse_locations() {
		let discovery = MockDiscovery::default();
		let location = Location::parse("/api/v1/namespaces/default/pods/web-0", &discovery).unwrap();
		assert_eq!(location.namespace.as_deref(), Some("default"));
		assert_eq!(location.name.as_deref(), Some("web-0"));

		let location = Location::parse("/api/v1/namespaces/kube-system", &discovery).unwrap();
		assert_eq!(location.plural, "namespaces");
		assert_eq!(location.name.as_deref(), Some("kube-system"));

		let location = Location::parse("/apis/apps/v1/deployments", &discovery).unwrap();
		assert_eq!(location.namespace, None);
		assert!(location.namespaced);

		assert!(Location::parse("/api/v1/namespaces/default/pods/web-0/exec", &discovery).is_none());
		assert!(Location::parse("/apis/example.com/v1/widgets", &discovery).is_none());
	}

	#[test]
	fn test_label_selectors() {
		let object = pod("a", "x");
		assert!(matches_labels(&object, "app=x"));
		assert!(matches_labels(&object, "app==x,tier"));
		assert!(!matches_labels(&object, "app!=x"));
		assert!(matches_labels(&object, "!missing"));
		assert!(!matches_labels(&object, "app=y"));
	}

	#[test]
	fn test_list_filters_namespace_and_labels() {
		let discovery = MockDiscovery::default();
		let default = Location::parse("/api/v1/namespaces/default/pods", &discovery).unwrap();
		let other = Location::parse("/api/v1/namespaces/other/pods", &discovery).unwrap();
		let all = Location::parse("/api/v1/pods", &discovery).unwrap();

		let mut store = Store::default();
		store.insert(&default, pod("a", "x")).unwrap();
		store.insert(&default, pod("b", "y")).unwrap();
		store.insert(&other, pod("c", "x")).unwrap();

		assert_eq!(store.list(&default, None, None).len(), 2);
		assert_eq!(store.list(&default, Some("app=x"), None).len(), 1);
		assert_eq!(store.list(&all, Some("app=x"), None).len(), 2);
		assert_eq!(store.list(&all, None, Some("metadata.name=b")).len(), 1);
	}

	#[test]
	fn test_merge_patch_removes_null_keys() {
		let merged = merge_json(
			json!({"data": {"a": "1", "b": "2"}}),
			json!({"data": {"a": null, "c": "3"}, "$patch": "merge"}),
		);
		assert_eq!(
			strip_directives(merged),
			json!({"data": {"b": "2", "c": "3"}})
		);
	}
}
