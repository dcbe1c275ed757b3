use std::{sync::Arc, time::Duration};

use assert_matches::assert_matches;
use futures::StreamExt;
use k8s_mock::{write_kubeconfig, MockApiResource, MockCluster, MockDiscovery, RunningMockCluster};
use kube::{api::Patch, ResourceExt};
use kubelib::{
	ConfigureOptions, DynamicError, HostEnvironment, PodPhase, PollSettings, ResourceEvent,
	ResourceOrList, ResourceScope, Session, Target, WatchOptions,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::{
	matchers::{method, path, query_param},
	Mock, ResponseTemplate,
};

struct Fixture {
	cluster: RunningMockCluster,
	session: Session,
	dir: TempDir,
}

async fn fixture_with(cluster: MockCluster) -> Fixture {
	let cluster = cluster.start().await;
	let dir = tempfile::tempdir().unwrap();
	let path = write_kubeconfig(&cluster.kubeconfig(), dir.path()).unwrap();
	let mut session = Session::new();
	session
		.configure_with_env(
			&ConfigureOptions::builder().kube_config(path).build(),
			&HostEnvironment::isolated(),
		)
		.await
		.unwrap();
	Fixture {
		cluster,
		session,
		dir,
	}
}

async fn fixture() -> Fixture {
	fixture_with(MockCluster::default()).await
}

fn pod(name: &str, app: &str, phase: &str) -> Value {
	json!({
		"apiVersion": "v1",
		"kind": "Pod",
		"metadata": {"name": name, "namespace": "default", "labels": {"app": app}},
		"spec": {"containers": [{"name": "main", "image": "busybox"}]},
		"status": {"phase": phase}
	})
}

fn configmap(name: &str, app: &str) -> Value {
	json!({
		"apiVersion": "v1",
		"kind": "ConfigMap",
		"metadata": {"name": name, "namespace": "default", "labels": {"app": app}},
		"data": {"key": "value"}
	})
}

#[tokio::test]
async fn test_resolve_is_cached() {
	let f = fixture().await;
	let resolver = f.session.resolver().unwrap();

	let first = resolver.descriptor("apps/v1", "Deployment").await.unwrap();
	let second = resolver.descriptor("apps/v1", "Deployment").await.unwrap();

	assert!(Arc::ptr_eq(&first, &second));
	assert_eq!(first.plural(), "deployments");
	assert_eq!(first.scope, ResourceScope::Namespaced);
	assert_eq!(f.cluster.discovery_request_count().await, 1);
	assert_eq!(f.cluster.request_count("GET", "/apis/apps/v1").await, 1);
	assert_eq!(resolver.cached_kinds().await, 1);
}

#[tokio::test]
async fn test_resolve_core_and_cluster_scoped() {
	let f = fixture().await;
	let resolver = f.session.resolver().unwrap();

	let namespaces = resolver.resolve("v1", "Namespace").await.unwrap();
	assert_eq!(namespaces.descriptor().scope, ResourceScope::ClusterWide);
	let pods = resolver.resolve("v1", "Pod").await.unwrap();
	assert_eq!(pods.descriptor().plural(), "pods");

	// One request per kind, even within the same group version
	assert_eq!(f.cluster.request_count("GET", "/api/v1").await, 2);
}

#[tokio::test]
async fn test_resolve_custom_resource() {
	let mut discovery = MockDiscovery::default();
	discovery.add(
		"stable.example.com/v1",
		[MockApiResource::namespaced("crontabs", "CronTab")],
	);
	let f = fixture_with(MockCluster::builder().discovery(discovery).build()).await;

	let crontabs = f
		.session
		.resolver()
		.unwrap()
		.resolve("stable.example.com/v1", "CronTab")
		.await
		.unwrap();
	let created = crontabs
		.create(
			&Target::builder().namespace("default").build(),
			json!({"metadata": {"name": "nightly"}, "spec": {"cronSpec": "* * * * */5"}}),
		)
		.await
		.unwrap();
	assert_eq!(created.name_any(), "nightly");
	assert_eq!(created.data["spec"]["cronSpec"], "* * * * */5");
}

#[tokio::test]
async fn test_unknown_kind_in_known_group() {
	let f = fixture().await;
	let result = f.session.resolver().unwrap().resolve("apps/v1", "Widget").await;
	assert_matches!(
		result,
		Err(DynamicError::ResourceNotFound { api_version, kind }) if api_version == "apps/v1" && kind == "Widget"
	);
}

#[tokio::test]
async fn test_unknown_group_version() {
	let f = fixture().await;
	let result = f
		.session
		.resolver()
		.unwrap()
		.resolve("example.com/v1alpha1", "Widget")
		.await;
	assert_matches!(result, Err(DynamicError::ResourceNotFound { .. }));
}

#[tokio::test]
async fn test_subresource_kinds_are_not_resolved() {
	let f = fixture().await;
	let result = f.session.resolver().unwrap().resolve("v1", "PodExecOptions").await;
	assert_matches!(result, Err(DynamicError::ResourceNotFound { .. }));
}

#[tokio::test]
async fn test_create_get_delete() {
	let f = fixture().await;
	let configmaps = f.session.resolver().unwrap().resolve("v1", "ConfigMap").await.unwrap();
	let target = Target::builder().namespace("default").name("settings").build();

	configmaps
		.create(&target, json!({"data": {"mode": "fast"}}))
		.await
		.unwrap();
	let stored = f
		.cluster
		.object("v1", "ConfigMap", Some("default"), "settings")
		.unwrap();
	assert_eq!(stored["data"]["mode"], "fast");
	assert_eq!(stored["kind"], "ConfigMap");

	let fetched = configmaps.get(&target).await.unwrap();
	assert_matches!(fetched, ResourceOrList::Object(o) if o.data["data"]["mode"] == "fast");

	configmaps.delete(&target).await.unwrap();
	assert!(f.cluster.object("v1", "ConfigMap", Some("default"), "settings").is_none());

	let missing = configmaps.get(&target).await;
	assert_matches!(missing, Err(DynamicError::Kube(kube::Error::Api(e))) if e.code == 404);
}

#[tokio::test]
async fn test_create_conflict_is_passed_through() {
	let f = fixture_with(MockCluster::builder().objects(vec![configmap("a", "x")]).build()).await;
	let configmaps = f.session.resolver().unwrap().resolve("v1", "ConfigMap").await.unwrap();
	let result = configmaps
		.create(&Target::default(), configmap("a", "x"))
		.await;
	assert_matches!(result, Err(DynamicError::Kube(kube::Error::Api(e))) if e.code == 409);
}

#[tokio::test]
async fn test_create_rejects_malformed_known_kind() {
	let f = fixture().await;
	let pods = f.session.resolver().unwrap().resolve("v1", "Pod").await.unwrap();
	let before = f.cluster.request_count("POST", "/api/v1/namespaces/default/pods").await;

	let result = pods
		.create(
			&Target::builder().namespace("default").name("broken").build(),
			json!({"spec": {"containers": {"name": "not-a-list"}}}),
		)
		.await;
	assert_matches!(result, Err(DynamicError::Registry(_)));
	assert_eq!(
		f.cluster.request_count("POST", "/api/v1/namespaces/default/pods").await,
		before
	);
}

#[tokio::test]
async fn test_list_by_label_selector() {
	let f = fixture_with(
		MockCluster::builder()
			.objects(vec![configmap("a", "x"), configmap("b", "x"), configmap("c", "y")])
			.build(),
	)
	.await;
	let configmaps = f.session.resolver().unwrap().resolve("v1", "ConfigMap").await.unwrap();

	let listed = configmaps
		.get(&Target::builder().namespace("default").label_selector("app=x").build())
		.await
		.unwrap();
	let mut names: Vec<_> = listed.into_items().iter().map(ResourceExt::name_any).collect();
	names.sort();
	assert_eq!(names, ["a", "b"]);
}

#[tokio::test]
async fn test_get_without_namespace_is_invalid() {
	let f = fixture().await;
	let configmaps = f.session.resolver().unwrap().resolve("v1", "ConfigMap").await.unwrap();
	let result = configmaps.get(&Target::builder().name("a").build()).await;
	assert_matches!(result, Err(DynamicError::InvalidSelector { .. }));
}

#[tokio::test]
async fn test_patch_by_selector() {
	let f = fixture_with(
		MockCluster::builder()
			.objects(vec![configmap("a", "x"), configmap("b", "x"), configmap("c", "y")])
			.build(),
	)
	.await;
	let configmaps = f.session.resolver().unwrap().resolve("v1", "ConfigMap").await.unwrap();

	let patched = configmaps
		.patch(
			&Target::builder().namespace("default").label_selector("app=x").build(),
			&Patch::Merge(json!({"data": {"key": "patched"}})),
		)
		.await
		.unwrap();
	assert_eq!(patched.len(), 2);

	for (name, expected) in [("a", "patched"), ("b", "patched"), ("c", "value")] {
		let stored = f.cluster.object("v1", "ConfigMap", Some("default"), name).unwrap();
		assert_eq!(stored["data"]["key"], expected, "{name}");
	}
}

#[tokio::test]
async fn test_replace_by_name() {
	let f = fixture_with(MockCluster::builder().objects(vec![configmap("a", "x")]).build()).await;
	let configmaps = f.session.resolver().unwrap().resolve("v1", "ConfigMap").await.unwrap();

	let replaced = configmaps
		.replace(
			&Target::builder().namespace("default").name("a").build(),
			json!({"data": {"other": "1"}}),
		)
		.await
		.unwrap();
	assert_eq!(replaced.len(), 1);

	let stored = f.cluster.object("v1", "ConfigMap", Some("default"), "a").unwrap();
	assert_eq!(stored["data"], json!({"other": "1"}));
}

#[tokio::test]
async fn test_replace_by_selector_ignores_manifest_name() {
	let f = fixture_with(
		MockCluster::builder()
			.objects(vec![configmap("a", "x"), configmap("b", "x"), configmap("c", "y")])
			.build(),
	)
	.await;
	let configmaps = f.session.resolver().unwrap().resolve("v1", "ConfigMap").await.unwrap();

	let mut body = configmap("a", "x");
	body["data"] = json!({"key": "replaced"});
	let replaced = configmaps
		.replace(&Target::builder().namespace("default").label_selector("app=x").build(), body)
		.await
		.unwrap();

	assert_eq!(replaced.len(), 2);
	for (name, expected) in [("a", "replaced"), ("b", "replaced"), ("c", "value")] {
		let stored = f.cluster.object("v1", "ConfigMap", Some("default"), name).unwrap();
		assert_eq!(stored["data"]["key"], expected, "{name}");
	}
}

#[tokio::test]
async fn test_delete_by_selector() {
	let f = fixture_with(
		MockCluster::builder()
			.objects(vec![configmap("a", "x"), configmap("b", "x"), configmap("c", "y")])
			.build(),
	)
	.await;
	let configmaps = f.session.resolver().unwrap().resolve("v1", "ConfigMap").await.unwrap();

	configmaps
		.delete(&Target::builder().namespace("default").label_selector("app=x").build())
		.await
		.unwrap();

	assert!(f.cluster.object("v1", "ConfigMap", Some("default"), "a").is_none());
	assert!(f.cluster.object("v1", "ConfigMap", Some("default"), "b").is_none());
	assert!(f.cluster.object("v1", "ConfigMap", Some("default"), "c").is_some());
}

#[tokio::test]
async fn test_delete_without_selector_is_invalid() {
	let f = fixture().await;
	let configmaps = f.session.resolver().unwrap().resolve("v1", "ConfigMap").await.unwrap();
	let result = configmaps
		.delete(&Target::builder().namespace("default").build())
		.await;
	assert_matches!(result, Err(DynamicError::InvalidSelector { .. }));
}

#[tokio::test]
async fn test_cluster_scoped_create() {
	let f = fixture().await;
	let namespaces = f.session.resolver().unwrap().resolve("v1", "Namespace").await.unwrap();
	namespaces
		.create(&Target::builder().name("team-a").build(), json!({}))
		.await
		.unwrap();
	assert!(f.cluster.object("v1", "Namespace", None, "team-a").is_some());
}

#[tokio::test]
async fn test_reconfigure_drops_discovery_cache() {
	let mut f = fixture().await;
	f.session
		.resolver()
		.unwrap()
		.resolve("apps/v1", "Deployment")
		.await
		.unwrap();

	let path = f.dir.path().join("config");
	f.session
		.configure_with_env(
			&ConfigureOptions::builder().kube_config(path).build(),
			&HostEnvironment::isolated(),
		)
		.await
		.unwrap();
	assert_eq!(f.session.resolver().unwrap().cached_kinds().await, 0);
}

fn pod_list(phase: &str) -> Value {
	json!({
		"kind": "PodList",
		"apiVersion": "v1",
		"metadata": {"resourceVersion": "1"},
		"items": [pod("job-1", "x", phase)]
	})
}

async fn mount_phases(cluster: &RunningMockCluster, pending_polls: u64) {
	Mock::given(method("GET"))
		.and(path("/api/v1/namespaces/default/pods"))
		.respond_with(ResponseTemplate::new(200).set_body_json(pod_list("Pending")))
		.up_to_n_times(pending_polls)
		.with_priority(1)
		.mount(cluster.inner())
		.await;
	Mock::given(method("GET"))
		.and(path("/api/v1/namespaces/default/pods"))
		.respond_with(ResponseTemplate::new(200).set_body_json(pod_list("Succeeded")))
		.with_priority(2)
		.mount(cluster.inner())
		.await;
}

#[tokio::test]
async fn test_wait_for_pod_phase() {
	let f = fixture().await;
	mount_phases(&f.cluster, 2).await;

	let settings = PollSettings::new(Duration::from_millis(10), Duration::from_secs(5));
	let phase = f
		.session
		.resolver()
		.unwrap()
		.wait_for_pod_phase("default", "app=x", &settings)
		.await
		.unwrap();

	assert_eq!(phase, PodPhase::Succeeded);
	assert_eq!(
		f.cluster.request_count("GET", "/api/v1/namespaces/default/pods").await,
		3
	);
}

#[tokio::test]
async fn test_wait_for_pod_phase_times_out() {
	let f = fixture_with(
		MockCluster::builder()
			.objects(vec![pod("job-1", "x", "Running")])
			.build(),
	)
	.await;

	let settings = PollSettings::new(Duration::from_millis(10), Duration::from_millis(100));
	let result = f
		.session
		.resolver()
		.unwrap()
		.wait_for_pod_phase("default", "app=x", &settings)
		.await;
	assert_matches!(result, Err(DynamicError::Timeout { .. }));
}

#[tokio::test]
async fn test_wait_for_pod_phase_without_pods() {
	let f = fixture_with(
		MockCluster::builder()
			.objects(vec![pod("job-1", "x", "Running")])
			.build(),
	)
	.await;

	let settings = PollSettings::new(Duration::from_millis(10), Duration::from_secs(5));
	let result = f
		.session
		.resolver()
		.unwrap()
		.wait_for_pod_phase("default", "app=missing", &settings)
		.await;
	assert_matches!(result, Err(DynamicError::PodsNotFound { selector, .. }) if selector == "app=missing");
}

#[tokio::test]
async fn test_watch_reports_existing_objects_then_cancels() {
	let f = fixture_with(
		MockCluster::builder()
			.objects(vec![configmap("a", "x"), configmap("b", "x"), configmap("c", "y")])
			.build(),
	)
	.await;
	let configmaps = f.session.resolver().unwrap().resolve("v1", "ConfigMap").await.unwrap();

	let cancel = CancellationToken::new();
	let mut events = configmaps.watch(
		&Target::builder().namespace("default").label_selector("app=x").build(),
		WatchOptions {
			timeout: None,
			cancel: cancel.clone(),
		},
	);

	let mut added = Vec::new();
	for _ in 0..2 {
		let event = events.next().await.unwrap().unwrap();
		assert_matches!(&event, ResourceEvent::Added(_));
		added.push(event.object().name_any());
	}
	added.sort();
	assert_eq!(added, ["a", "b"]);

	cancel.cancel();
	let rest = tokio::time::timeout(Duration::from_secs(5), async {
		while let Some(event) = events.next().await {
			assert_matches!(event, Ok(ResourceEvent::Modified(_)));
		}
	})
	.await;
	assert!(rest.is_ok(), "stream should end once cancelled");
}

#[tokio::test]
async fn test_watch_timeout_ends_stream() {
	let f = fixture().await;
	let configmaps = f.session.resolver().unwrap().resolve("v1", "ConfigMap").await.unwrap();
	let events = configmaps.watch(
		&Target::builder().namespace("default").build(),
		WatchOptions {
			timeout: Some(Duration::from_millis(200)),
			..WatchOptions::default()
		},
	);
	let collected = tokio::time::timeout(Duration::from_secs(5), events.collect::<Vec<_>>())
		.await
		.unwrap();
	assert!(collected.iter().all(Result::is_ok));
}

#[tokio::test]
async fn test_watch_survives_expired_resource_version() {
	let f = fixture_with(
		MockCluster::builder()
			.objects(vec![configmap("a", "x")])
			.build(),
	)
	.await;
	let expired = json!({
		"type": "ERROR",
		"object": {
			"kind": "Status",
			"apiVersion": "v1",
			"metadata": {},
			"status": "Failure",
			"message": "too old resource version: 1 (2)",
			"reason": "Expired",
			"code": 410
		}
	});
	Mock::given(method("GET"))
		.and(path("/api/v1/namespaces/default/configmaps"))
		.and(query_param("watch", "true"))
		.respond_with(ResponseTemplate::new(200).set_body_string(format!("{expired}\n")))
		.with_priority(1)
		.mount(f.cluster.inner())
		.await;
	let configmaps = f.session.resolver().unwrap().resolve("v1", "ConfigMap").await.unwrap();

	let timeout = Duration::from_millis(1500);
	let started = std::time::Instant::now();
	let events = configmaps.watch(
		&Target::builder().namespace("default").build(),
		WatchOptions {
			timeout: Some(timeout),
			..WatchOptions::default()
		},
	);
	let collected = tokio::time::timeout(Duration::from_secs(10), events.collect::<Vec<_>>())
		.await
		.unwrap();

	assert!(started.elapsed() >= timeout, "stream ended early: {collected:?}");
	assert!(collected.iter().all(Result::is_ok), "{collected:?}");
	assert_matches!(collected.first(), Some(Ok(ResourceEvent::Added(o))) if o.name_any() == "a");
	assert!(
		f.cluster
			.request_count("GET", "/api/v1/namespaces/default/configmaps")
			.await >= 2
	);
}
