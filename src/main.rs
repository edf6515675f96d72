use std::{panic::AssertUnwindSafe, process};

use clap::Parser;
use color_eyre::Result;
use release_ledger::{
    cli::Cli,
    config::Config,
    errors, logging,
    process::{Process, ProcessOutput},
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse cli arguments
    let args = Cli::parse();

    // Initialize the config
    let config = Config::init(args.config.clone())?;

    // Initialize logging
    let (log_path, log_filter) = logging::resolve_path_and_filter(&config);
    let logs_enabled = log_filter.is_some();
    logging::init(log_path.clone(), log_filter)?;
    tracing::info!("release-ledger v{}", env!("CARGO_PKG_VERSION"));

    // Run the process, handling errors and panics
    errors::init(logs_enabled.then_some(log_path), AssertUnwindSafe(run(args, config))).await
}

async fn run(args: Cli, config: Config) -> Result<()> {
    // Cancel everything on ctrl+c
    let cancellation_token = CancellationToken::new();
    let ctrl_c_token = cancellation_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received ctrl+c, cancelling");
            ctrl_c_token.cancel();
        }
    });

    let ProcessOutput {
        failed,
        stdout,
        stderr,
    } = args.process.execute(config, cancellation_token).await?;

    if let Some(stderr) = stderr {
        eprintln!("{stderr}");
    }
    if let Some(stdout) = stdout {
        print!("{stdout}");
    }
    if failed {
        process::exit(1);
    }
    Ok(())
}
