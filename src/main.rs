mod cli;
mod engine;
mod logging;
mod model;
mod orchestrator;
mod storage;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_non_tui = !args.uses_tui();
    logging::init(&args)?;

    match cli::run(args).await {
        Ok(code) => {
            // Headless runs hand the build tool's outcome back to the caller.
            if is_non_tui || code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "migrator exited with error");
            Err(e)
        }
    }
}
