use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    Layer as _, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

mod cmd;

#[derive(Parser)]
#[command(
    name = "refab",
    about = "Rebuild released packages from source and attest equivalence",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Subcommand)]
enum Command {
    /// Read out a stored attestation bundle.
    Get(cmd::get::Options),
    /// Enumerate stored attestation bundles by prefix.
    List(cmd::list::Options),
    /// Run the rebuild pipeline for a target.
    Run(cmd::run::Options),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Get(options) => cmd::get::exec(options).await,
        Command::List(options) => cmd::list::exec(options).await,
        Command::Run(options) => cmd::run::exec(options).await,
    }
}
