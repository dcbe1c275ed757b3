use std::{io::Write, time::Duration};

use anyhow::Result;
use clap::Args;
use futures::StreamExt;
use kubelib::{ResourceEvent, Session, WatchOptions};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ObjectArgs;

#[derive(Args, Debug)]
pub struct WatchArgs {
	#[command(flatten)]
	pub object: ObjectArgs,

	/// Stop after this long, e.g. 30s
	#[arg(long, value_parser = humantime::parse_duration)]
	pub timeout: Option<Duration>,
}

pub async fn run<W: Write>(session: &Session, args: WatchArgs, writer: &mut W) -> Result<()> {
	let handle = session
		.resolver()?
		.resolve(&args.object.api_version, &args.object.kind)
		.await?;

	let cancel = CancellationToken::new();
	let on_interrupt = cancel.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!("interrupted, stopping watch");
			on_interrupt.cancel();
		}
	});

	let mut events = handle.watch(
		&args.object.target(),
		WatchOptions {
			timeout: args.timeout,
			cancel,
		},
	);
	while let Some(event) = events.next().await {
		let event = match event {
			Ok(event) => event,
			Err(e) => {
				warn!(error = %e, "watch ended");
				return Err(e.into());
			}
		};
		let kind = match &event {
			ResourceEvent::Added(_) => "ADDED",
			ResourceEvent::Modified(_) => "MODIFIED",
			ResourceEvent::Deleted(_) => "DELETED",
		};
		serde_json::to_writer(&mut *writer, &json!({"type": kind, "object": event.object()}))?;
		writeln!(writer)?;
		writer.flush()?;
	}
	Ok(())
}
