use anyhow::Context as _;
use clap::Parser as _;
use split_dns::{setup_logging, App, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    setup_logging(args.log_file()).context("failed to set up logging")?;

    App::run_until_completion(args).await
}
