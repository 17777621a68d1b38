//! # uprpc CLI Entry Point
//!
//! The main executable for the uprpc tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and installs the
//!    log subscriber (stderr, filtered by `RUST_LOG`).
//! 2. **Execution**: Delegates to the selected command, which drives `uprpc_core::Engine`.
//! 3. **Presentation**: Events are written to standard output as JSON lines; failures that
//!    happen before any call is made are printed to standard error.
mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use commands::call::CallArgs;
use std::process;
use tracing_subscriber::EnvFilter;
use uprpc_core::EngineConfig;

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    init_tracing();

    let config = EngineConfig::from(args.engine);

    let result = match args.command {
        Commands::Catalog {
            protos,
            include_dirs,
        } => commands::catalog::run(&protos, &include_dirs),
        Commands::Call {
            host,
            endpoint,
            proto,
            include_dirs,
            body,
            headers,
        } => {
            let (service, method) = endpoint;
            let args = CallArgs {
                host,
                service,
                method,
                proto,
                include_dirs,
                body,
                headers,
            };
            commands::call::run(config, args).await
        }
        Commands::Serve => commands::serve::run(config).await,
    };

    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

/// Logs go to stderr so stdout stays a clean event stream.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
