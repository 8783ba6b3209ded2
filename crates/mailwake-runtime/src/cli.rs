//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mailwake", version, about = "IMAP IDLE push listener with webhook notifications")]
pub struct Cli {
    /// Control socket path (default: $XDG_RUNTIME_DIR/mailwake/mailwaked.sock)
    #[arg(long, short = 's', global = true, env = "MAILWAKE_SOCKET")]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the listener in the foreground
    Run(ConfigOpts),
    /// Show per-account connection status from a running listener
    Status,
    /// Ask a running listener to shut down
    Stop,
    /// Validate the config file and print what would be monitored
    CheckConfig(ConfigOpts),
}

#[derive(clap::Args, Default)]
pub struct ConfigOpts {
    /// Config file (default: $XDG_CONFIG_HOME/mailwake/config.json)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
}

/// Default socket path, per-user.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR")
        && !dir.is_empty()
    {
        return format!("{dir}/mailwake/mailwaked.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/mailwake-{user}/mailwaked.sock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_config_and_global_socket() {
        let args = ["mailwake", "run", "--config", "/etc/mw.json", "-s", "/tmp/x.sock"];
        let cli = Cli::try_parse_from(args).expect("parse");
        assert_eq!(cli.socket_path.as_deref(), Some("/tmp/x.sock"));
        match cli.command {
            Command::Run(opts) => assert_eq!(opts.config, Some(PathBuf::from("/etc/mw.json"))),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn check_config_without_path() {
        let cli = Cli::try_parse_from(["mailwake", "check-config"]).expect("parse");
        assert!(matches!(cli.command, Command::CheckConfig(ConfigOpts { config: None })));
    }
}
