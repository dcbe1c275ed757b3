use std::io::Write;

use anyhow::Result;
use clap::Args;
use kubelib::Session;

#[derive(Args, Debug)]
pub struct HealthzArgs {
	/// /readyz, /livez or one of their individual checks
	#[arg(default_value = "/readyz")]
	pub endpoint: String,

	/// Ask for the per-check breakdown
	#[arg(short, long)]
	pub verbose: bool,
}

pub async fn ping<W: Write>(session: &Session, writer: &mut W) -> Result<()> {
	let body = session.ping().await?;
	writeln!(writer, "{body}")?;
	Ok(())
}

pub async fn healthz<W: Write>(session: &Session, args: HealthzArgs, writer: &mut W) -> Result<()> {
	let body = session.healthcheck(&args.endpoint, args.verbose).await?;
	writeln!(writer, "{}", body.trim_end())?;
	Ok(())
}
