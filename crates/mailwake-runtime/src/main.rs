//! mailwake: IMAP IDLE push listener.
//! Watches every configured mailbox, debounces new-mail events and posts one
//! notification per window to a webhook.

use std::path::Path;

use clap::Parser;

use mailwake_core::Config;

mod aggregator;
mod cli;
mod client;
mod daemon;
mod server;
mod sink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Run(opts) => {
            let config = load_config(opts.config.as_deref())?;
            init_logging(config.log_file.as_deref())?;

            tracing::info!(version = env!("CARGO_PKG_VERSION"), "mailwake starting");
            daemon::run(config, &socket_path).await?;
        }
        cli::Command::Status => client::cmd_status(&socket_path).await?,
        cli::Command::Stop => client::cmd_stop(&socket_path).await?,
        cli::Command::CheckConfig(opts) => {
            let config = load_config(opts.config.as_deref())?;
            print!("{}", daemon::describe_config(&config));
        }
    }

    Ok(())
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let path = mailwake_core::config::locate(explicit)?;
    let config = Config::load(&path)
        .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
    Ok(config)
}

/// Filter from MAILWAKE_LOG, then RUST_LOG, default "info". With a log file,
/// output is appended there without ANSI colors.
fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = std::env::var("MAILWAKE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    let builder =
        tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::new(filter));

    match log_file {
        Some(path) => {
            if let Some(dir) = path.parent()
                && !dir.as_os_str().is_empty()
            {
                std::fs::create_dir_all(dir)?;
            }
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
