//! CLI command definitions and dispatch for the `backplane` binary.
//!
//! Uses clap derive macros for argument parsing. Commands either run a live
//! session (`listen`, `channel reset`) or inspect the persisted client state
//! (`channel show`, `cache show`, `status`).

pub mod cache;
pub mod channel;
pub mod listen;
pub mod status;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use backplane_types::config::BackplaneConfig;

/// Listen to a Backplane bus from the terminal.
#[derive(Parser)]
#[command(name = "backplane", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for client events, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Keep client state in memory instead of the data directory.
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Poll a bus and print every delivered message until Ctrl+C.
    Listen(listen::ListenArgs),

    /// Inspect or replace persisted channel identities.
    Channel {
        #[command(subcommand)]
        action: channel::ChannelCommand,
    },

    /// Inspect or clear the persisted message cache.
    Cache {
        #[command(subcommand)]
        action: cache::CacheCommand,
    },

    /// Data directory, storage, and configuration summary.
    Status,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Connection flags shared by every command that opens a session.
///
/// Each flag overrides the matching `config.toml` field.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// Backplane server base URL.
    #[arg(long, env = "BACKPLANE_SERVER")]
    pub server: Option<String>,

    /// Bus name to listen on.
    #[arg(long, env = "BACKPLANE_BUS")]
    pub bus: Option<String>,

    /// Synthesize the channel name locally instead of asking the server.
    #[arg(long)]
    pub self_assigned: bool,

    /// Messages kept for late subscribers (0 disables caching).
    #[arg(long)]
    pub cache_max: Option<usize>,
}

impl ConnectArgs {
    /// Apply the flags on top of the file config.
    pub fn apply(&self, file_config: &BackplaneConfig) -> BackplaneConfig {
        let mut config = file_config.clone();
        if let Some(server) = &self.server {
            config.server_base_url = server.clone();
        }
        if let Some(bus) = &self.bus {
            config.bus_name = bus.clone();
        }
        if self.self_assigned {
            config.server_channel = false;
        }
        if let Some(cache_max) = self.cache_max {
            config.cache_max = cache_max;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn connect_args_override_file_config() {
        let file_config = BackplaneConfig {
            cache_max: 3,
            ..BackplaneConfig::new("https://file.example.com", "file-bus")
        };
        let args = ConnectArgs {
            server: None,
            bus: Some("flag-bus".to_string()),
            self_assigned: true,
            cache_max: Some(0),
        };

        let config = args.apply(&file_config);
        assert_eq!(config.server_base_url, "https://file.example.com");
        assert_eq!(config.bus_name, "flag-bus");
        assert!(!config.server_channel);
        assert_eq!(config.cache_max, 0);
    }

    #[test]
    fn connect_args_without_flags_keep_file_config() {
        let file_config = BackplaneConfig::new("https://bp", "bus");
        assert_eq!(ConnectArgs::default().apply(&file_config), file_config);
    }

    #[test]
    fn parse_listen_with_expectations() {
        let cli = Cli::try_parse_from([
            "backplane",
            "--json",
            "listen",
            "--bus",
            "example.com",
            "--expect",
            "identity/login,identity/logout",
            "--within",
            "30",
        ])
        .unwrap();

        assert!(cli.json);
        let Commands::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(args.connect.bus.as_deref(), Some("example.com"));
        assert_eq!(args.expect, vec!["identity/login", "identity/logout"]);
        assert_eq!(args.within, Some(30));
    }
}
