//! ferry CLI: serve a remote context, call its modules and watch its state.
//!
//! `ferry serve` hosts the remote context over TCP. `call` and `watch` attach
//! a short-lived client context to it. `demo` runs everything in-process.

mod cli;
mod cmd;
mod modules;
mod ui;

use crate::cli::*;
use clap::Parser;
use ferry_kernel::config::load_with_profiles;

fn init_tracing_stderr(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let config = load_with_profiles(cli.config.as_deref(), &cli.profiles);
    init_tracing_stderr(&config.log_level);

    match cli.command {
        Commands::Serve { listen } => {
            let addr = listen.unwrap_or_else(|| config.listen_addr.clone());
            cmd::serve::cmd_serve(config, &addr)
        }
        Commands::Call {
            module,
            method,
            params,
            connect,
        } => {
            let addr = connect.unwrap_or_else(|| config.listen_addr.clone());
            cmd::call::cmd_call(config, &module, &method, &params, &addr)
        }
        Commands::Watch { slice, connect } => {
            let addr = connect.unwrap_or_else(|| config.listen_addr.clone());
            cmd::watch::cmd_watch(config, &slice, &addr)
        }
        Commands::Demo { clients } => cmd::demo::cmd_demo(config, clients),
        Commands::Config => cmd::config::cmd_config(&config, cli.config.as_deref(), &cli.profiles),
    }
}
