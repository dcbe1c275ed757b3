//! Subcommand handlers.

pub mod create;
pub mod delete;
pub mod exec;
pub mod get;
pub mod health;
pub mod wait;
pub mod watch;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use kubelib::{ConfigureOptions, Session, Target};

/// Connection flags shared by every subcommand.
#[derive(Args, Debug, Default)]
pub struct ConnectArgs {
	/// YAML file with connection options; flags override its values
	#[arg(long, global = true)]
	pub config: Option<PathBuf>,

	/// Path to the kubeconfig file
	#[arg(long, global = true)]
	pub kubeconfig: Option<PathBuf>,

	/// Kubeconfig context to use
	#[arg(long, global = true)]
	pub context: Option<String>,

	/// API server URL, used together with --token
	#[arg(long, global = true)]
	pub api_url: Option<String>,

	/// Bearer token, without the "Bearer " prefix
	#[arg(long, global = true)]
	pub token: Option<String>,

	/// CA bundle for --api-url
	#[arg(long, global = true)]
	pub ca_cert: Option<PathBuf>,

	/// Use the mounted service account
	#[arg(long, global = true)]
	pub in_cluster: bool,

	/// Do not verify the server certificate
	#[arg(long, global = true)]
	pub insecure_skip_tls_verify: bool,
}

impl ConnectArgs {
	pub fn options(&self) -> Result<ConfigureOptions> {
		let mut options = match &self.config {
			Some(path) => ConfigureOptions::from_yaml_file(path)?,
			None => ConfigureOptions::default(),
		};
		if let Some(path) = &self.kubeconfig {
			options.kube_config = Some(path.clone());
		}
		if let Some(context) = &self.context {
			options.context = Some(context.clone());
		}
		if let Some(url) = &self.api_url {
			options.api_url = Some(url.clone());
		}
		if let Some(token) = &self.token {
			options.bearer_token = Some(token.clone());
		}
		if let Some(path) = &self.ca_cert {
			options.ca_cert = Some(path.clone());
		}
		options.in_cluster |= self.in_cluster;
		options.cert_validation &= !self.insecure_skip_tls_verify;
		Ok(options)
	}

	pub async fn session(&self) -> Result<Session> {
		let options = self.options()?;
		Session::connect(&options)
			.await
			.context("configuring session")
	}
}

/// Flags addressing objects of one kind.
#[derive(Args, Debug)]
pub struct ObjectArgs {
	/// Object kind, e.g. Deployment
	pub kind: String,

	/// Object name
	pub name: Option<String>,

	/// apiVersion of the kind
	#[arg(long, default_value = "v1")]
	pub api_version: String,

	#[arg(short, long)]
	pub namespace: Option<String>,

	/// Label selector, e.g. app=web
	#[arg(short = 'l', long)]
	pub selector: Option<String>,

	/// Field selector, e.g. status.phase=Running
	#[arg(long)]
	pub field_selector: Option<String>,
}

impl ObjectArgs {
	pub fn target(&self) -> Target {
		Target {
			namespace: self.namespace.clone(),
			name: self.name.clone(),
			label_selector: self.selector.clone(),
			field_selector: self.field_selector.clone(),
		}
	}
}
