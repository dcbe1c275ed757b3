use anyhow::Result;
use clap::Args;
use kubelib::Session;
use tracing::info;

use super::ObjectArgs;

#[derive(Args, Debug)]
pub struct DeleteArgs {
	#[command(flatten)]
	pub object: ObjectArgs,
}

pub async fn run(session: &Session, args: DeleteArgs) -> Result<()> {
	let handle = session
		.resolver()?
		.resolve(&args.object.api_version, &args.object.kind)
		.await?;
	let target = args.object.target();
	handle.delete(&target).await?;
	info!(kind = %args.object.kind, ?target, "deleted");
	Ok(())
}
