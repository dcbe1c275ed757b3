use std::io::Write;

use anyhow::Result;
use clap::Args;
use kubelib::Session;

#[derive(Args, Debug)]
pub struct ExecArgs {
	pub pod: String,

	#[arg(short, long, default_value = "default")]
	pub namespace: String,

	#[arg(short, long)]
	pub container: Option<String>,

	/// Command and arguments, after `--`
	#[arg(last = true, required = true)]
	pub argv: Vec<String>,
}

pub async fn run<W: Write>(session: &Session, args: ExecArgs, writer: &mut W) -> Result<()> {
	let output = session
		.exec(&args.pod, &args.namespace, &args.argv, args.container.as_deref())
		.await?;
	writeln!(writer, "{output}")?;
	Ok(())
}
