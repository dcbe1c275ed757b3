use std::io::Write;

use anyhow::Result;
use clap::{Args, ValueEnum};
use kubelib::{ResourceOrList, Session};

use super::ObjectArgs;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum Output {
	#[default]
	Json,
	Yaml,
	/// One object name per line
	Name,
}

#[derive(Args, Debug)]
pub struct GetArgs {
	#[command(flatten)]
	pub object: ObjectArgs,

	#[arg(short, long, value_enum, default_value_t)]
	pub output: Output,
}

pub async fn run<W: Write>(session: &Session, args: GetArgs, writer: &mut W) -> Result<()> {
	let handle = session
		.resolver()?
		.resolve(&args.object.api_version, &args.object.kind)
		.await?;
	let result = handle.get(&args.object.target()).await?;

	match args.output {
		Output::Json => match &result {
			ResourceOrList::Object(object) => serde_json::to_writer_pretty(&mut *writer, object)?,
			ResourceOrList::List(list) => serde_json::to_writer_pretty(&mut *writer, &list.items)?,
		},
		Output::Yaml => match &result {
			ResourceOrList::Object(object) => serde_yaml::to_writer(&mut *writer, object)?,
			ResourceOrList::List(list) => serde_yaml::to_writer(&mut *writer, &list.items)?,
		},
		Output::Name => {
			for object in result.into_items() {
				writeln!(
					writer,
					"{}/{}",
					handle.descriptor().plural(),
					object.metadata.name.unwrap_or_default()
				)?;
			}
			return Ok(());
		}
	}
	writeln!(writer)?;
	Ok(())
}
