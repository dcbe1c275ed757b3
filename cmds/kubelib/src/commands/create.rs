use std::{io::Write, path::PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;
use kubelib::{Session, Target};
use serde_json::Value;
use tracing::info;

#[derive(Args, Debug)]
pub struct CreateArgs {
	/// Manifest file (JSON or YAML)
	#[arg(short, long)]
	pub filename: PathBuf,

	/// Namespace for namespaced kinds, when the manifest has none
	#[arg(short, long)]
	pub namespace: Option<String>,
}

pub async fn run<W: Write>(session: &Session, args: CreateArgs, writer: &mut W) -> Result<()> {
	let source = std::fs::read_to_string(&args.filename)
		.with_context(|| format!("reading {}", args.filename.display()))?;
	// YAML is a superset of JSON
	let manifest: Value = serde_yaml::from_str(&source)
		.with_context(|| format!("parsing {}", args.filename.display()))?;

	let field = |name: &str| {
		manifest
			.get(name)
			.and_then(Value::as_str)
			.map(ToOwned::to_owned)
			.with_context(|| format!("manifest has no {name}"))
	};
	let api_version = field("apiVersion")?;
	let kind = field("kind")?;

	let handle = session.resolver()?.resolve(&api_version, &kind).await?;
	let target = Target {
		namespace: args.namespace,
		..Target::default()
	};
	let created = handle.create(&target, manifest).await?;
	info!(kind = %kind, name = ?created.metadata.name, "created");

	writeln!(
		writer,
		"{}/{} created",
		handle.descriptor().plural(),
		created.metadata.name.unwrap_or_default()
	)?;
	Ok(())
}
