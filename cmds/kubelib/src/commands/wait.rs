use std::{io::Write, time::Duration};

use anyhow::Result;
use clap::Args;
use kubelib::{PollSettings, Session};

#[derive(Args, Debug)]
pub struct WaitPodArgs {
	#[arg(short, long, default_value = "default")]
	pub namespace: String,

	/// Label selector matching the pods
	#[arg(short = 'l', long)]
	pub selector: String,

	#[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
	pub interval: Duration,

	#[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
	pub timeout: Duration,
}

pub async fn run<W: Write>(session: &Session, args: WaitPodArgs, writer: &mut W) -> Result<()> {
	let settings = PollSettings::new(args.interval, args.timeout);
	let phase = session
		.resolver()?
		.wait_for_pod_phase(&args.namespace, &args.selector, &settings)
		.await?;
	writeln!(writer, "{phase}")?;
	Ok(())
}
