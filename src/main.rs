mod cli;
mod error;
mod helper;
mod idle;
mod lifecycle;
mod model;
mod orchestrator;
mod server;
mod store;
mod trust;

use anyhow::Result;
use clap::Parser;

fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("pay_service=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    setup_tracing(args.verbose);

    if let Err(e) = cli::run(args).await {
        tracing::error!("{e:#}");
        return Err(e);
    }
    Ok(())
}
