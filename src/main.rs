mod cli;
mod commands;
mod engine;
mod error;
mod model;
mod orchestrator;
mod printer;
mod style;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    // The local offset can only be read reliably while the process is single-threaded.
    let offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = cli::Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("mlti: failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(cli::run(args, offset)) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::debug!(error = ?e, "run failed");
            eprintln!("mlti: {e:#}");
            std::process::exit(1);
        }
    }
}
