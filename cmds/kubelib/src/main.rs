use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;

mod commands;
mod telemetry;

#[derive(Parser)]
#[command(name = "kubelib")]
#[command(about = "Drive a kubelib session from the shell", long_about = None)]
#[command(version)]
struct Cli {
	/// Log level (overrides RUST_LOG)
	#[arg(long, global = true)]
	log_level: Option<Level>,

	#[command(flatten)]
	connect: commands::ConnectArgs,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Check that the API server answers
	Ping,

	/// Query /readyz or /livez
	Healthz(commands::health::HealthzArgs),

	/// Get one object or list objects of any kind
	Get(commands::get::GetArgs),

	/// Create an object from a JSON or YAML manifest
	Create(commands::create::CreateArgs),

	/// Delete objects by name or selector
	Delete(commands::delete::DeleteArgs),

	/// Run a command in a pod container
	Exec(commands::exec::ExecArgs),

	/// Stream change events of any kind
	Watch(commands::watch::WatchArgs),

	/// Wait until pods reach a terminal phase
	WaitPod(commands::wait::WaitPodArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	telemetry::init(cli.log_level);

	let session = cli.connect.session().await?;
	let mut stdout = std::io::stdout().lock();

	match cli.command {
		Commands::Ping => commands::health::ping(&session, &mut stdout).await,
		Commands::Healthz(args) => commands::health::healthz(&session, args, &mut stdout).await,
		Commands::Get(args) => commands::get::run(&session, args, &mut stdout).await,
		Commands::Create(args) => commands::create::run(&session, args, &mut stdout).await,
		Commands::Delete(args) => commands::delete::run(&session, args).await,
		Commands::Exec(args) => commands::exec::run(&session, args, &mut stdout).await,
		Commands::Watch(args) => commands::watch::run(&session, args, &mut stdout).await,
		Commands::WaitPod(args) => commands::wait::run(&session, args, &mut stdout).await,
	}
}
