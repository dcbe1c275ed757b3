//! Session configuration: auth resolution and client fan-out.
//!
//! [`Session::configure`] resolves a single [`ClientConfiguration`] from
//! precedence-ordered inputs, builds one transport from it, and hands a clone
//! of that transport to every typed client and to the session's
//! [`DynamicResourceResolver`]. Reconfiguration replaces all of them at once.

mod clients;
mod resolve;

use std::{path::PathBuf, sync::Arc};

use k8s_openapi::api::core::v1::Pod;
use kube::{
	api::{Api, AttachParams},
	config::KubeconfigError,
	Client,
};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

pub use self::{
	clients::{ApiClients, ApiGroup, TypedApiClient},
	resolve::{AuthMode, ClientConfiguration},
};
use crate::{ConfigureOptions, DynamicResourceResolver, HostEnvironment};

/// Errors raised while configuring or using a session.
#[derive(Debug, Error)]
pub enum SessionError {
	#[error("kubeconfig not found: {}", display_path(.path))]
	ConfigNotFound {
		path: Option<PathBuf>,
		#[source]
		source: Option<KubeconfigError>,
	},

	#[error("no context named `{0}` was found in kubeconfig")]
	ContextNotFound(String),

	#[error("kubeconfig has no current-context and no context was requested")]
	CurrentContextNotSet,

	#[error("in-cluster configuration unavailable: {0}")]
	ClusterContext(String),

	#[error("unnecessary 'Bearer ' prefix in token")]
	BearerTokenWithPrefix,

	#[error("invalid API url `{0}`")]
	InvalidApiUrl(String),

	#[error("invalid proxy url `{0}`")]
	InvalidProxyUrl(String),

	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	#[error("session is not configured")]
	NotConfigured,

	#[error("exec failed: {0}")]
	Exec(String),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),

	#[error(transparent)]
	Http(#[from] http::Error),
}

fn display_path(path: &Option<PathBuf>) -> String {
	path.as_ref().map_or_else(
		|| "neither KUBECONFIG nor ~/.kube/config available".to_string(),
		|p| p.display().to_string(),
	)
}

/// Everything derived from one successful `configure` call.
struct SessionState {
	config: Arc<ClientConfiguration>,
	client: Client,
	clients: ApiClients,
	resolver: DynamicResourceResolver,
}

/// A configured connection to one cluster.
///
/// A session is meant to be driven by one sequential test context. Requests
/// still in flight through clients obtained before a reconfiguration keep
/// using the old transport.
#[derive(Default)]
pub struct Session {
	state: Option<SessionState>,
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("config", &self.state.as_ref().map(|s| &s.config))
			.finish_non_exhaustive()
	}
}

impl Session {
	/// An unconfigured session.
	pub fn new() -> Self {
		Self::default()
	}

	/// Create and configure a session from the process environment.
	pub async fn connect(options: &ConfigureOptions) -> Result<Self, SessionError> {
		let mut session = Self::new();
		session.configure(options).await?;
		Ok(session)
	}

	/// (Re)configure the session using the process environment.
	pub async fn configure(&mut self, options: &ConfigureOptions) -> Result<(), SessionError> {
		self.configure_with_env(options, &HostEnvironment::from_process())
			.await
	}

	/// (Re)configure the session against an explicit environment snapshot.
	///
	/// On error the previous configuration, clients and discovery cache are
	/// left untouched.
	#[instrument(skip_all)]
	pub async fn configure_with_env(
		&mut self,
		options: &ConfigureOptions,
		env: &HostEnvironment,
	) -> Result<(), SessionError> {
		let config = Arc::new(resolve::resolve_configuration(options, env).await?);
		let client = Client::try_from(config.kube_config().clone())?;

		let clients = ApiClients::new(&client, &config);
		let resolver = DynamicResourceResolver::new(client.clone(), Arc::clone(&config));

		if self.state.is_some() {
			debug!("replacing previous session configuration");
		}
		self.state = Some(SessionState {
			config,
			client,
			clients,
			resolver,
		});
		Ok(())
	}

	pub fn is_configured(&self) -> bool {
		self.state.is_some()
	}

	fn state(&self) -> Result<&SessionState, SessionError> {
		self.state.as_ref().ok_or(SessionError::NotConfigured)
	}

	/// The shared configuration of the current clients.
	pub fn configuration(&self) -> Result<&Arc<ClientConfiguration>, SessionError> {
		Ok(&self.state()?.config)
	}

	/// The shared transport.
	pub fn client(&self) -> Result<&Client, SessionError> {
		Ok(&self.state()?.client)
	}

	/// The typed API-group clients.
	pub fn clients(&self) -> Result<&ApiClients, SessionError> {
		Ok(&self.state()?.clients)
	}

	/// The dynamic resolver bound to this configuration.
	pub fn resolver(&self) -> Result<&DynamicResourceResolver, SessionError> {
		Ok(&self.state()?.resolver)
	}

	/// `GET /api/v1/`, a cheap availability probe.
	#[instrument(skip(self))]
	pub async fn ping(&self) -> Result<String, SessionError> {
		self.get_text("/api/v1/").await
	}

	/// `GET` a health endpoint (`/readyz`, `/livez` or one of their
	/// sub-checks such as `/livez/etcd`).
	#[instrument(skip(self))]
	pub async fn healthcheck(&self, endpoint: &str, verbose: bool) -> Result<String, SessionError> {
		if !(endpoint.starts_with("/readyz") || endpoint.starts_with("/livez")) {
			return Err(SessionError::InvalidArgument(format!(
				"{endpoint} does not start with \"/readyz\" or \"/livez\""
			)));
		}
		let path = if verbose {
			format!("{endpoint}?verbose")
		} else {
			endpoint.to_string()
		};
		self.get_text(&path).await
	}

	async fn get_text(&self, path: &str) -> Result<String, SessionError> {
		let client = self.client()?;
		let request = http::Request::get(path).body(Vec::new())?;
		Ok(client.request_text(request).await?)
	}

	/// Run an argv-style command in a pod container.
	///
	/// No shell is involved; pass `["/bin/sh", "-c", "..."]` for one.
	/// Returns stdout followed by stderr, trimmed.
	#[instrument(skip(self, argv), fields(argv = ?argv))]
	pub async fn exec<S>(
		&self,
		name: &str,
		namespace: &str,
		argv: &[S],
		container: Option<&str>,
	) -> Result<String, SessionError>
	where
		S: AsRef<str> + std::fmt::Debug,
	{
		let command = validate_argv(argv)?;
		let pods: Api<Pod> = self.clients()?.core.namespaced(namespace);

		let params = AttachParams {
			container: container.map(ToOwned::to_owned),
			..AttachParams::default().stdin(false).stdout(true).stderr(true).tty(false)
		};
		let mut attached = pods.exec(name, command, &params).await?;

		let read_stdout = read_all(attached.stdout());
		let read_stderr = read_all(attached.stderr());
		let (stdout, stderr) = tokio::join!(read_stdout, read_stderr);

		let mut output = stdout?;
		output.push_str(&stderr?);
		Ok(output.trim().to_string())
	}
}

fn validate_argv<S: AsRef<str>>(argv: &[S]) -> Result<Vec<String>, SessionError> {
	if argv.is_empty() {
		return Err(SessionError::InvalidArgument(
			"argv should be a non-empty list like [\"/bin/bash\", \"-c\", \"ls\"]".into(),
		));
	}
	Ok(argv.iter().map(|s| s.as_ref().to_string()).collect())
}

async fn read_all<R>(reader: Option<R>) -> Result<String, SessionError>
where
	R: tokio::io::AsyncRead + Unpin,
{
	let mut buf = Vec::new();
	if let Some(mut reader) = reader {
		reader
			.read_to_end(&mut buf)
			.await
			.map_err(|e| SessionError::Exec(e.to_string()))?;
	}
	Ok(String::from_utf8_lossy(&buf).into_owned())
}
