//! Change-event streams for dynamic resources.

use std::{
	collections::{HashMap, HashSet, VecDeque},
	time::Duration,
};

use futures::{
	stream::{self, BoxStream},
	StreamExt,
};
use kube::{
	api::DynamicObject,
	runtime::{
		watcher::{self, watcher},
		WatchStreamExt,
	},
	ResourceExt,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{DynamicError, ResourceHandle, Target};

/// Bounds for a watch stream.
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
	/// Stop after this long.
	pub timeout: Option<Duration>,
	/// Stop when cancelled.
	pub cancel: CancellationToken,
}

/// A change to a watched object.
#[derive(Debug, Clone)]
pub enum ResourceEvent {
	Added(DynamicObject),
	Modified(DynamicObject),
	Deleted(DynamicObject),
}

impl ResourceEvent {
	pub fn object(&self) -> &DynamicObject {
		match self {
			ResourceEvent::Added(o) | ResourceEvent::Modified(o) | ResourceEvent::Deleted(o) => o,
		}
	}
}

impl ResourceHandle {
	/// Watch the targeted objects.
	///
	/// The stream restarts its server-side watch transparently, relisting
	/// with backoff after expired resource versions and other API errors.
	/// It ends on the first transport error, on cancellation, or when the
	/// timeout elapses. A namespaced kind without a namespace is watched
	/// across all namespaces.
	pub fn watch(
		&self,
		target: &Target,
		options: WatchOptions,
	) -> BoxStream<'static, Result<ResourceEvent, DynamicError>> {
		let api = self.api(target.namespace.as_deref());
		let config = watcher_config(target);
		debug!(kind = %self.descriptor().kind(), ?target, "starting watch");

		let events = watcher(api, config).default_backoff().boxed();
		let state = Some((events, Tracker::default(), VecDeque::new()));
		let events = stream::unfold(state, |state| async move {
			let (mut events, mut tracker, mut pending) = state?;
			loop {
				if let Some(event) = pending.pop_front() {
					return Some((Ok(event), Some((events, tracker, pending))));
				}
				match events.next().await? {
					Ok(event) => pending.extend(tracker.classify(event)),
					Err(e) if is_transport_failure(&e) => {
						return Some((Err(DynamicError::from(e)), None));
					}
					Err(e) => warn!(error = %e, "watch interrupted, relisting"),
				}
			}
		});

		let WatchOptions { timeout, cancel } = options;
		let stop = async move {
			match timeout {
				Some(timeout) => {
					tokio::select! {
						() = cancel.cancelled() => {}
						() = tokio::time::sleep(timeout) => {}
					}
				}
				None => cancel.cancelled().await,
			}
		};
		events.take_until(stop).boxed()
	}
}

fn watcher_config(target: &Target) -> watcher::Config {
	let mut config = watcher::Config::default();
	if let Some(labels) = &target.label_selector {
		config = config.labels(labels);
	}
	let fields = match (&target.name, &target.field_selector) {
		(Some(name), Some(fields)) => Some(format!("metadata.name={name},{fields}")),
		(Some(name), None) => Some(format!("metadata.name={name}")),
		(None, Some(fields)) => Some(fields.clone()),
		(None, None) => None,
	};
	if let Some(fields) = &fields {
		config = config.fields(fields);
	}
	config
}

fn object_key(object: &DynamicObject) -> String {
	format!(
		"{}/{}",
		object.namespace().unwrap_or_default(),
		object.name_any()
	)
}

/// Whether the watcher lost its connection to the apiserver, as opposed to
/// an API-level error it recovers from by relisting.
fn is_transport_failure(error: &watcher::Error) -> bool {
	match error {
		watcher::Error::InitialListFailed(e)
		| watcher::Error::WatchStartFailed(e)
		| watcher::Error::WatchFailed(e) => {
			matches!(e, kube::Error::HyperError(_) | kube::Error::Service(_))
		}
		_ => false,
	}
}

/// Objects seen so far, keyed by `namespace/name`.
#[derive(Default)]
struct Tracker {
	seen: HashMap<String, DynamicObject>,
	/// Keys applied since the last `Init`, while a relist is in progress.
	relisted: Option<HashSet<String>>,
}

impl Tracker {
	/// Map a watcher event to add/modify/delete events.
	///
	/// Objects missing from a completed relist were deleted while the watch
	/// was down and are reported as such.
	fn classify(&mut self, event: watcher::Event<DynamicObject>) -> Vec<ResourceEvent> {
		match event {
			watcher::Event::Init => {
				self.relisted = Some(HashSet::new());
				Vec::new()
			}
			watcher::Event::InitApply(object) => {
				let key = object_key(&object);
				if let Some(relisted) = &mut self.relisted {
					relisted.insert(key.clone());
				}
				vec![self.apply(key, object)]
			}
			watcher::Event::InitDone => {
				let Some(relisted) = self.relisted.take() else {
					return Vec::new();
				};
				let gone: Vec<String> = self
					.seen
					.keys()
					.filter(|key| !relisted.contains(*key))
					.cloned()
					.collect();
				gone.into_iter()
					.filter_map(|key| self.seen.remove(&key))
					.map(ResourceEvent::Deleted)
					.collect()
			}
			watcher::Event::Apply(object) => {
				let key = object_key(&object);
				vec![self.apply(key, object)]
			}
			watcher::Event::Delete(object) => {
				self.seen.remove(&object_key(&object));
				vec![ResourceEvent::Deleted(object)]
			}
		}
	}

	fn apply(&mut self, key: String, object: DynamicObject) -> ResourceEvent {
		if self.seen.insert(key, object.clone()).is_some() {
			ResourceEvent::Modified(object)
		} else {
			ResourceEvent::Added(object)
		}
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use serde_json::json;

	use super::*;

	fn object(name: &str) -> DynamicObject {
		serde_json::from_value(json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {"name": name, "namespace": "default"}
		}))
		.unwrap()
	}

	fn single(tracker: &mut Tracker, event: watcher::Event<DynamicObject>) -> ResourceEvent {
		let mut events = tracker.classify(event);
		assert_eq!(events.len(), 1);
		events.remove(0)
	}

	#[test]
	fn test_classify_sequence() {
		let mut tracker = Tracker::default();

		assert!(tracker.classify(watcher::Event::Init).is_empty());
		assert_matches!(
			single(&mut tracker, watcher::Event::InitApply(object("a"))),
			ResourceEvent::Added(_)
		);
		assert!(tracker.classify(watcher::Event::InitDone).is_empty());
		assert_matches!(
			single(&mut tracker, watcher::Event::Apply(object("a"))),
			ResourceEvent::Modified(_)
		);
		assert_matches!(
			single(&mut tracker, watcher::Event::Apply(object("b"))),
			ResourceEvent::Added(_)
		);
		assert_matches!(
			single(&mut tracker, watcher::Event::Delete(object("a"))),
			ResourceEvent::Deleted(o) if o.name_any() == "a"
		);
		// Recreated after deletion
		assert_matches!(
			single(&mut tracker, watcher::Event::Apply(object("a"))),
			ResourceEvent::Added(_)
		);
	}

	#[test]
	fn test_relist_reports_objects_deleted_meanwhile() {
		let mut tracker = Tracker::default();
		tracker.classify(watcher::Event::Init);
		tracker.classify(watcher::Event::InitApply(object("a")));
		tracker.classify(watcher::Event::InitApply(object("b")));
		tracker.classify(watcher::Event::InitDone);

		// "a" disappeared while the watch was down
		assert!(tracker.classify(watcher::Event::Init).is_empty());
		assert_matches!(
			single(&mut tracker, watcher::Event::InitApply(object("b"))),
			ResourceEvent::Modified(_)
		);
		assert_matches!(
			tracker.classify(watcher::Event::InitDone).as_slice(),
			[ResourceEvent::Deleted(o)] if o.name_any() == "a"
		);

		assert_matches!(
			single(&mut tracker, watcher::Event::Apply(object("a"))),
			ResourceEvent::Added(_)
		);
	}

	#[test]
	fn test_watcher_config_combines_name_and_fields() {
		let target = Target::builder()
			.name("web")
			.field_selector("status.phase=Running")
			.label_selector("app=web")
			.build();
		let config = watcher_config(&target);
		assert_eq!(
			config.field_selector.as_deref(),
			Some("metadata.name=web,status.phase=Running")
		);
		assert_eq!(config.label_selector.as_deref(), Some("app=web"));
	}
}
