//! Snapshot of the host environment consulted during session resolution.

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
};

use no_proxy::NoProxy;

/// Conventional service account mount inside a pod.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Lowercase variants are checked first.
const PROXY_VARS: [&str; 4] = ["https_proxy", "HTTPS_PROXY", "http_proxy", "HTTP_PROXY"];
const NO_PROXY_VARS: [&str; 2] = ["no_proxy", "NO_PROXY"];

/// Environment variables and well-known paths read while configuring a session.
///
/// [`HostEnvironment::from_process`] captures the running process; tests build
/// an isolated snapshot instead of mutating global state.
#[derive(Debug, Clone)]
pub struct HostEnvironment {
	vars: HashMap<String, String>,
	service_account_dir: PathBuf,
}

impl Default for HostEnvironment {
	fn default() -> Self {
		Self::isolated()
	}
}

impl HostEnvironment {
	/// Capture the current process environment.
	pub fn from_process() -> Self {
		Self {
			vars: std::env::vars().collect(),
			service_account_dir: PathBuf::from(SERVICE_ACCOUNT_DIR),
		}
	}

	/// An environment with no variables set.
	pub fn isolated() -> Self {
		Self {
			vars: HashMap::new(),
			service_account_dir: PathBuf::from(SERVICE_ACCOUNT_DIR),
		}
	}

	#[must_use]
	pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.vars.insert(key.into(), value.into());
		self
	}

	#[must_use]
	pub fn with_service_account_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.service_account_dir = dir.into();
		self
	}

	/// Look up a variable. Empty values count as unset.
	pub fn var(&self, key: &str) -> Option<&str> {
		self.vars
			.get(key)
			.map(String::as_str)
			.filter(|v| !v.is_empty())
	}

	pub fn service_account_dir(&self) -> &Path {
		&self.service_account_dir
	}

	/// Kubeconfig files listed in `$KUBECONFIG`, in order.
	pub fn kubeconfig_paths(&self) -> Vec<PathBuf> {
		self.var("KUBECONFIG")
			.map(|v| std::env::split_paths(v).filter(|p| !p.as_os_str().is_empty()).collect())
			.unwrap_or_default()
	}

	/// `~/.kube/config`, if a home directory is known.
	pub fn default_kubeconfig_path(&self) -> Option<PathBuf> {
		self.var("HOME")
			.or_else(|| self.var("USERPROFILE"))
			.map(|home| Path::new(home).join(".kube").join("config"))
	}

	/// First proxy URL found in the proxy variables.
	pub fn proxy(&self) -> Option<&str> {
		PROXY_VARS.iter().find_map(|key| self.var(key))
	}

	/// The no-proxy list, parsed. Entries may be hosts, `.domain` suffixes,
	/// IP addresses, CIDR ranges or `*`.
	pub fn no_proxy(&self) -> NoProxy {
		NO_PROXY_VARS
			.iter()
			.find_map(|key| self.var(key))
			.map(NoProxy::from)
			.unwrap_or_default()
	}
}

/// Check whether a cluster endpoint is excluded from proxying.
///
/// Both the bare host and `host:port` are tried against the list.
pub fn bypasses_proxy(no_proxy: &NoProxy, host: &str, port: Option<u16>) -> bool {
	let host = host.trim_start_matches('[').trim_end_matches(']');
	no_proxy.matches(host) || port.is_some_and(|port| no_proxy.matches(&format!("{host}:{port}")))
}
