//! Inputs accepted by [`Session::configure`](crate::Session::configure).

use std::{
	fmt, fs,
	path::{Path, PathBuf},
};

use bon::Builder;
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading options from disk.
#[derive(Debug, Error)]
pub enum OptionsError {
	#[error("failed to read options file {}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse options file {}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_yaml::Error,
	},
}

/// Connection settings for a session.
///
/// Every field is optional; the resolver picks the auth mode by precedence:
/// `in_cluster`, then `api_url` + `bearer_token`, then the kubeconfig.
#[derive(Clone, Builder, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigureOptions {
	/// Kubeconfig path. Falls back to `$KUBECONFIG`, then `~/.kube/config`.
	#[builder(into)]
	pub kube_config: Option<PathBuf>,

	/// Kubeconfig context. Falls back to `current-context`.
	#[builder(into)]
	pub context: Option<String>,

	/// API server URL for bearer token authentication.
	#[builder(into)]
	pub api_url: Option<String>,

	/// Bearer token, without the `Bearer ` prefix.
	#[builder(into)]
	pub bearer_token: Option<String>,

	/// CA bundle used with bearer token authentication.
	#[builder(into)]
	pub ca_cert: Option<PathBuf>,

	/// Use the mounted service account. Overrides every other auth input.
	#[builder(default)]
	pub in_cluster: bool,

	/// Set to `false` for clusters with self-signed certificates.
	#[builder(default = true)]
	pub cert_validation: bool,
}

impl Default for ConfigureOptions {
	fn default() -> Self {
		Self {
			kube_config: None,
			context: None,
			api_url: None,
			bearer_token: None,
			ca_cert: None,
			in_cluster: false,
			cert_validation: true,
		}
	}
}

impl fmt::Debug for ConfigureOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConfigureOptions")
			.field("kube_config", &self.kube_config)
			.field("context", &self.context)
			.field("api_url", &self.api_url)
			.field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
			.field("ca_cert", &self.ca_cert)
			.field("in_cluster", &self.in_cluster)
			.field("cert_validation", &self.cert_validation)
			.finish()
	}
}

impl ConfigureOptions {
	/// Load options from a YAML document such as:
	///
	/// ```yaml
	/// kubeConfig: ./kubeconfig
	/// context: k3d-k3d-cluster2
	/// certValidation: false
	/// ```
	pub fn from_yaml_file(path: &Path) -> Result<Self, OptionsError> {
		let content = fs::read_to_string(path).map_err(|source| OptionsError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		serde_yaml::from_str(&content).map_err(|source| OptionsError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}
}
