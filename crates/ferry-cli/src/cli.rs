//! Clap CLI definitions for ferry.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  ferry serve                          Serve the demo remote context over TCP
  ferry call settings get              Call settings.get on the running remote
  ferry call settings set theme '\"dark\"'
  ferry watch settings                 Print every change to the settings slice
  ferry demo --clients 3               Run remote and clients in one process
  ferry serve --profile ./staging.toml Serve with a profile over the config";

/// ferry: call modules living in another execution context.
#[derive(Parser)]
#[command(name = "ferry", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Profile file layered over the config file. Repeatable; later profiles
    /// win.
    #[arg(long = "profile", global = true, value_name = "PATH")]
    pub profiles: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the demo remote context on a TCP address.
    Serve {
        /// Address to listen on (defaults to `listen_addr` from config).
        #[arg(long)]
        listen: Option<String>,
    },
    /// Call a module method on a running remote context.
    Call {
        /// Module key, e.g. `settings`.
        module: String,
        /// Method name, e.g. `get`.
        method: String,
        /// Positional parameters. Each is parsed as JSON, falling back to a
        /// plain string.
        params: Vec<String>,
        /// Address of the remote context (defaults to `listen_addr`).
        #[arg(long)]
        connect: Option<String>,
    },
    /// Print a state slice and every later change to it.
    Watch {
        /// Slice name, e.g. `settings`.
        slice: String,
        /// Address of the remote context (defaults to `listen_addr`).
        #[arg(long)]
        connect: Option<String>,
    },
    /// Run a remote context and several clients in one process.
    Demo {
        /// Number of client contexts.
        #[arg(long, default_value_t = 2)]
        clients: usize,
    },
    /// Show the resolved configuration.
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call_with_params() {
        let cli = Cli::parse_from([
            "ferry",
            "call",
            "settings",
            "set",
            "theme",
            "\"dark\"",
            "--connect",
            "127.0.0.1:9000",
        ]);
        match cli.command {
            Commands::Call {
                module,
                method,
                params,
                connect,
            } => {
                assert_eq!(module, "settings");
                assert_eq!(method, "set");
                assert_eq!(params, vec!["theme", "\"dark\""]);
                assert_eq!(connect.as_deref(), Some("127.0.0.1:9000"));
            }
            _ => panic!("Expected call"),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["ferry", "demo", "--config", "/tmp/ferry.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/ferry.toml")));
        assert!(matches!(cli.command, Commands::Demo { clients: 2 }));
    }

    #[test]
    fn test_profiles_repeat_in_order() {
        let cli = Cli::parse_from([
            "ferry",
            "serve",
            "--profile",
            "base-extra.toml",
            "--profile",
            "local.toml",
        ]);
        assert_eq!(
            cli.profiles,
            vec![PathBuf::from("base-extra.toml"), PathBuf::from("local.toml")]
        );
        assert!(matches!(cli.command, Commands::Serve { listen: None }));
    }
}
