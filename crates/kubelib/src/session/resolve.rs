//! Auth mode precedence and transport configuration.

use std::{fmt, fs, path::PathBuf};

use kube::{
	config::{
		AuthInfo, Cluster, Context, KubeConfigOptions, Kubeconfig, NamedAuthInfo, NamedCluster,
		NamedContext,
	},
	Config,
};
use tracing::{debug, error, instrument};

use no_proxy::NoProxy;

use super::SessionError;
use crate::{env::bypasses_proxy, ConfigureOptions, HostEnvironment};

const BEARER_PREFIX: &str = "Bearer ";
const SYNTHETIC_CLUSTER: &str = "kubelib-cluster";
const SYNTHETIC_USER: &str = "kubelib-user";
const SYNTHETIC_CONTEXT: &str = "kubelib";

/// The auth mode chosen for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
	/// Mounted service account token and CA bundle.
	InCluster { service_account_dir: PathBuf },
	/// Explicit API URL with a bearer token.
	BearerToken {
		api_url: String,
		ca_cert: Option<PathBuf>,
	},
	/// Kubeconfig file(s) with the selected context.
	KubeconfigFile { paths: Vec<PathBuf>, context: String },
}

/// Resolved transport settings shared by every client of a session.
///
/// Built once per [`Session::configure`](super::Session::configure) call and
/// never mutated afterwards.
pub struct ClientConfiguration {
	auth_mode: AuthMode,
	kube: Config,
	/// Proxy taken from the host environment, before no-proxy filtering.
	proxy_url: Option<http::Uri>,
	no_proxy: NoProxy,
}

impl fmt::Debug for ClientConfiguration {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ClientConfiguration")
			.field("auth_mode", &self.auth_mode)
			.field("cluster_url", &self.kube.cluster_url)
			.field("accept_invalid_certs", &self.kube.accept_invalid_certs)
			.field("proxy_url", &self.proxy_url)
			.field("no_proxy", &self.no_proxy)
			.finish_non_exhaustive()
	}
}

impl ClientConfiguration {
	pub fn auth_mode(&self) -> &AuthMode {
		&self.auth_mode
	}

	/// The underlying kube configuration.
	pub fn kube_config(&self) -> &Config {
		&self.kube
	}

	pub fn cluster_url(&self) -> &http::Uri {
		&self.kube.cluster_url
	}

	pub fn host(&self) -> Option<&str> {
		self.kube.cluster_url.host()
	}

	pub fn default_namespace(&self) -> &str {
		&self.kube.default_namespace
	}

	/// Whether certificate verification is disabled for this configuration.
	pub fn accepts_invalid_certs(&self) -> bool {
		self.kube.accept_invalid_certs
	}

	/// Whether a CA bundle was loaded.
	pub fn has_root_cert(&self) -> bool {
		self.kube.root_cert.as_ref().is_some_and(|certs| !certs.is_empty())
	}

	/// Proxy derived from the host environment.
	pub fn proxy_url(&self) -> Option<&http::Uri> {
		self.proxy_url.as_ref()
	}

	/// Proxy actually installed on the transport.
	pub fn effective_proxy_url(&self) -> Option<&http::Uri> {
		self.kube.proxy_url.as_ref()
	}

	pub fn no_proxy(&self) -> &NoProxy {
		&self.no_proxy
	}
}

/// Resolve one configuration from the options, by precedence.
#[instrument(skip_all, fields(in_cluster = options.in_cluster, cert_validation = options.cert_validation))]
pub(crate) async fn resolve_configuration(
	options: &ConfigureOptions,
	env: &HostEnvironment,
) -> Result<ClientConfiguration, SessionError> {
	if let Some(token) = &options.bearer_token {
		validate_token(token)?;
	}

	let mut resolved = if options.in_cluster {
		in_cluster(env).await.inspect_err(|e| {
			error!(error = %e, "are you sure tests are executed from within a k8s cluster?");
		})?
	} else if let (Some(api_url), Some(token)) = (&options.api_url, &options.bearer_token) {
		bearer_token(api_url, token, options.ca_cert.clone()).await?
	} else {
		kubeconfig_file(options, env).await?
	};

	if !matches!(resolved.auth_mode, AuthMode::BearerToken { .. }) {
		apply_proxy(&mut resolved, env)?;
	}

	if !options.cert_validation {
		debug!("disabling certificate validation");
		resolved.kube.accept_invalid_certs = true;
	}

	debug!(
		auth_mode = ?resolved.auth_mode,
		cluster_url = %resolved.kube.cluster_url,
		"resolved client configuration"
	);

	Ok(resolved)
}

fn validate_token(token: &str) -> Result<(), SessionError> {
	if token.starts_with(BEARER_PREFIX) {
		return Err(SessionError::BearerTokenWithPrefix);
	}
	Ok(())
}

async fn in_cluster(env: &HostEnvironment) -> Result<ClientConfiguration, SessionError> {
	let host = env
		.var("KUBERNETES_SERVICE_HOST")
		.ok_or_else(|| SessionError::ClusterContext("KUBERNETES_SERVICE_HOST is not set".into()))?;
	let port = env
		.var("KUBERNETES_SERVICE_PORT")
		.ok_or_else(|| SessionError::ClusterContext("KUBERNETES_SERVICE_PORT is not set".into()))?;

	let dir = env.service_account_dir();
	let token_path = dir.join("token");
	let ca_path = dir.join("ca.crt");
	for path in [&token_path, &ca_path] {
		if !path.is_file() {
			return Err(SessionError::ClusterContext(format!(
				"service account file {} is missing",
				path.display()
			)));
		}
	}
	let namespace = fs::read_to_string(dir.join("namespace"))
		.ok()
		.map(|ns| ns.trim().to_string())
		.filter(|ns| !ns.is_empty());

	let server = if host.contains(':') {
		format!("https://[{host}]:{port}")
	} else {
		format!("https://{host}:{port}")
	};
	debug!(server = %server, "using in-cluster service account");

	let kubeconfig = synthetic_kubeconfig(
		Cluster {
			server: Some(server),
			certificate_authority: Some(ca_path.display().to_string()),
			..Default::default()
		},
		AuthInfo {
			token_file: Some(token_path.display().to_string()),
			..Default::default()
		},
		namespace,
	);

	let kube = Config::from_custom_kubeconfig(kubeconfig, &synthetic_options())
		.await
		.map_err(|e| SessionError::ClusterContext(e.to_string()))?;

	Ok(ClientConfiguration {
		auth_mode: AuthMode::InCluster {
			service_account_dir: dir.to_path_buf(),
		},
		kube,
		proxy_url: None,
		no_proxy: NoProxy::default(),
	})
}

async fn bearer_token(
	api_url: &str,
	token: &str,
	ca_cert: Option<PathBuf>,
) -> Result<ClientConfiguration, SessionError> {
	let uri: http::Uri = api_url
		.parse()
		.map_err(|_| SessionError::InvalidApiUrl(api_url.to_string()))?;
	if uri.scheme().is_none() || uri.authority().is_none() {
		return Err(SessionError::InvalidApiUrl(api_url.to_string()));
	}
	debug!(api_url = %api_url, ca_cert = ?ca_cert, "using bearer token");

	let kubeconfig = synthetic_kubeconfig(
		Cluster {
			server: Some(api_url.to_string()),
			certificate_authority: ca_cert.as_ref().map(|p| p.display().to_string()),
			..Default::default()
		},
		AuthInfo {
			token: Some(token.to_string().into()),
			..Default::default()
		},
		None,
	);

	let kube = Config::from_custom_kubeconfig(kubeconfig, &synthetic_options()).await?;

	Ok(ClientConfiguration {
		auth_mode: AuthMode::BearerToken {
			api_url: api_url.to_string(),
			ca_cert,
		},
		kube,
		proxy_url: None,
		no_proxy: NoProxy::default(),
	})
}

async fn kubeconfig_file(
	options: &ConfigureOptions,
	env: &HostEnvironment,
) -> Result<ClientConfiguration, SessionError> {
	let (kubeconfig, paths) = load_kubeconfig(options, env)?;

	let context = match &options.context {
		Some(name) => name.clone(),
		None => kubeconfig
			.current_context
			.clone()
			.ok_or(SessionError::CurrentContextNotSet)?,
	};
	if !kubeconfig.contexts.iter().any(|c| c.name == context) {
		return Err(SessionError::ContextNotFound(context));
	}
	debug!(context = %context, paths = ?paths, "using kubeconfig");

	let kube = Config::from_custom_kubeconfig(
		kubeconfig,
		&KubeConfigOptions {
			context: Some(context.clone()),
			..Default::default()
		},
	)
	.await?;

	Ok(ClientConfiguration {
		auth_mode: AuthMode::KubeconfigFile { paths, context },
		kube,
		proxy_url: None,
		no_proxy: NoProxy::default(),
	})
}

/// Read the kubeconfig from the explicit path, `$KUBECONFIG`, or `~/.kube/config`.
///
/// Files listed in `$KUBECONFIG` are merged in order.
fn load_kubeconfig(
	options: &ConfigureOptions,
	env: &HostEnvironment,
) -> Result<(Kubeconfig, Vec<PathBuf>), SessionError> {
	let paths = match &options.kube_config {
		Some(path) => vec![path.clone()],
		None => {
			let from_env = env.kubeconfig_paths();
			if from_env.is_empty() {
				let default = env
					.default_kubeconfig_path()
					.ok_or(SessionError::ConfigNotFound {
						path: None,
						source: None,
					})?;
				vec![default]
			} else {
				from_env
			}
		}
	};

	let mut merged: Option<Kubeconfig> = None;
	for path in &paths {
		let config = Kubeconfig::read_from(path).map_err(|source| SessionError::ConfigNotFound {
			path: Some(path.clone()),
			source: Some(source),
		})?;
		merged = Some(match merged {
			Some(acc) => acc.merge(config)?,
			None => config,
		});
	}

	let kubeconfig = merged.ok_or(SessionError::ConfigNotFound {
		path: None,
		source: None,
	})?;
	Ok((kubeconfig, paths))
}

fn apply_proxy(
	resolved: &mut ClientConfiguration,
	env: &HostEnvironment,
) -> Result<(), SessionError> {
	resolved.no_proxy = env.no_proxy();
	let Some(proxy) = env.proxy() else {
		return Ok(());
	};
	let proxy: http::Uri = proxy
		.parse()
		.map_err(|_| SessionError::InvalidProxyUrl(proxy.to_string()))?;

	let host = resolved.kube.cluster_url.host().unwrap_or_default();
	let port = resolved.kube.cluster_url.port_u16();
	if bypasses_proxy(&resolved.no_proxy, host, port) {
		debug!(host = %host, "cluster host matches no_proxy, not proxying");
	} else {
		debug!(proxy = %proxy, "using proxy from environment");
		resolved.kube.proxy_url = Some(proxy.clone());
	}
	resolved.proxy_url = Some(proxy);
	Ok(())
}

fn synthetic_kubeconfig(cluster: Cluster, user: AuthInfo, namespace: Option<String>) -> Kubeconfig {
	Kubeconfig {
		clusters: vec![NamedCluster {
			name: SYNTHETIC_CLUSTER.to_string(),
			cluster: Some(cluster),
		}],
		auth_infos: vec![NamedAuthInfo {
			name: SYNTHETIC_USER.to_string(),
			auth_info: Some(user),
		}],
		contexts: vec![NamedContext {
			name: SYNTHETIC_CONTEXT.to_string(),
			context: Some(Context {
				cluster: SYNTHETIC_CLUSTER.to_string(),
				user: Some(SYNTHETIC_USER.to_string()),
				namespace,
				..Default::default()
			}),
		}],
		current_context: Some(SYNTHETIC_CONTEXT.to_string()),
		..Default::default()
	}
}

fn synthetic_options() -> KubeConfigOptions {
	KubeConfigOptions {
		context: Some(SYNTHETIC_CONTEXT.to_string()),
		..Default::default()
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;

	#[test]
	fn test_validate_token() {
		assert_matches!(validate_token("abc"), Ok(()));
		assert_matches!(
			validate_token("Bearer abc"),
			Err(SessionError::BearerTokenWithPrefix)
		);
		// Only the exact prefix is rejected
		assert_matches!(validate_token("bearer abc"), Ok(()));
	}

	#[tokio::test]
	async fn test_prefixed_token_rejected_without_api_url() {
		let options = ConfigureOptions::builder().bearer_token("Bearer abc").build();
		let result = resolve_configuration(&options, &HostEnvironment::isolated()).await;
		assert_matches!(result, Err(SessionError::BearerTokenWithPrefix));
	}

	#[tokio::test]
	async fn test_prefixed_token_rejected_in_cluster() {
		let options = ConfigureOptions::builder()
			.in_cluster(true)
			.bearer_token("Bearer abc")
			.build();
		let result = resolve_configuration(&options, &HostEnvironment::isolated()).await;
		assert_matches!(result, Err(SessionError::BearerTokenWithPrefix));
	}

	#[tokio::test]
	async fn test_invalid_api_url() {
		let options = ConfigureOptions::builder()
			.api_url("not a url")
			.bearer_token("abc")
			.build();
		let result = resolve_configuration(&options, &HostEnvironment::isolated()).await;
		assert_matches!(result, Err(SessionError::InvalidApiUrl(url)) if url == "not a url");
	}

	#[tokio::test]
	async fn test_no_kubeconfig_anywhere() {
		let result =
			resolve_configuration(&ConfigureOptions::default(), &HostEnvironment::isolated()).await;
		assert_matches!(
			result,
			Err(SessionError::ConfigNotFound {
				path: None,
				source: None
			})
		);
	}

	#[tokio::test]
	async fn test_in_cluster_without_service_host() {
		let options = ConfigureOptions::builder().in_cluster(true).build();
		let result = resolve_configuration(&options, &HostEnvironment::isolated()).await;
		assert_matches!(result, Err(SessionError::ClusterContext(_)));
	}

	#[tokio::test]
	async fn test_in_cluster_without_token_file() {
		let dir = tempfile::tempdir().unwrap();
		let env = HostEnvironment::isolated()
			.with_var("KUBERNETES_SERVICE_HOST", "10.0.0.1")
			.with_var("KUBERNETES_SERVICE_PORT", "443")
			.with_service_account_dir(dir.path());

		let options = ConfigureOptions::builder().in_cluster(true).build();
		let result = resolve_configuration(&options, &env).await;
		assert_matches!(result, Err(SessionError::ClusterContext(reason)) if reason.contains("token"));
	}
}
