//! Listener wiring: one session manager task per account, the shared
//! aggregator, the control socket, and ordered shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use mailwake_core::{Config, DedupTracker};
use mailwake_imap::{
    AccountContext, EventSink, ImapConnector, StatusBoard, WatchSettings, run_session_manager,
};

use crate::aggregator::Aggregator;
use crate::server::{self, ControlState};
use crate::sink::WebhookSink;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Run until ctrl-c, SIGTERM, or a `stop` request on the control socket.
pub async fn run(config: Config, socket_path: &str) -> anyhow::Result<()> {
    for reject in &config.rejected {
        tracing::warn!("skipping account: {reject}");
    }

    let dedup = match &config.dedup_state_file {
        Some(path) => DedupTracker::with_store(path)?,
        None => DedupTracker::new(),
    };
    let dedup = Arc::new(Mutex::new(dedup));

    let sink = WebhookSink::new(&config.webhook_url, &config.webhook_token)?;
    let aggregator = Aggregator::new(sink, config.debounce, config.delivery_mode);
    let status = StatusBoard::new();
    let cancel = CancellationToken::new();
    let connector = ImapConnector::new()?;

    let listener = server::bind(socket_path).await?;
    let control = Arc::new(ControlState {
        status: status.clone(),
        aggregator: aggregator.clone(),
        cancel: cancel.clone(),
        started_at: Utc::now(),
    });
    let server_handle = tokio::spawn(server::serve(listener, control));

    let settings = WatchSettings {
        idle_timeout: config.idle_timeout,
        reconnect_interval: config.reconnect_interval,
        ..WatchSettings::default()
    };
    let event_sink: Arc<dyn EventSink> = Arc::new(aggregator.clone());
    let managers = TaskTracker::new();
    for account in config.accounts {
        status.register(&account.id);
        managers.spawn(run_session_manager(AccountContext {
            account,
            connector: connector.clone(),
            settings,
            dedup: Arc::clone(&dedup),
            sink: Arc::clone(&event_sink),
            status: status.clone(),
            cancel: cancel.clone(),
        }));
    }
    managers.close();
    tracing::info!(
        accounts = managers.len(),
        debounce_secs = config.debounce.as_secs(),
        mode = %config.delivery_mode,
        "listener started"
    );

    tokio::select! {
        result = wait_for_signal() => result?,
        () = cancel.cancelled() => {}
    }
    cancel.cancel();

    if tokio::time::timeout(config.idle_timeout, managers.wait()).await.is_err() {
        tracing::warn!("session managers did not stop within {}s", config.idle_timeout.as_secs());
    }
    if tokio::time::timeout(FLUSH_TIMEOUT, aggregator.flush()).await.is_err() {
        tracing::warn!("pending notification flush timed out");
    }
    if let Err(e) = server_handle.await {
        tracing::debug!("control server task ended abnormally: {e}");
    }

    if let Err(e) = std::fs::remove_file(socket_path) {
        tracing::debug!("failed to remove socket {socket_path}: {e}");
    }
    tracing::info!("listener stopped");
    Ok(())
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("received ctrl-c, shutting down");
            }
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("received ctrl-c, shutting down");
    }

    Ok(())
}

/// `mailwake check-config`: human-readable validation report.
pub fn describe_config(config: &Config) -> String {
    let mut out = String::new();
    for account in &config.accounts {
        let env_note = match &account.credential {
            mailwake_core::Credential::Env(var) if account.credential.resolve().is_none() => {
                format!("  (warning: ${var} is not set)")
            }
            _ => String::new(),
        };
        out.push_str(&format!(
            "ok    {}  {}@{}:{}  {}  tls={}{env_note}\n",
            account.id,
            account.username,
            account.host,
            account.port,
            account.mailbox,
            account.use_tls
        ));
    }
    for reject in &config.rejected {
        out.push_str(&format!("skip  {reject}\n"));
    }
    out.push_str(&format!(
        "webhook {}  mode {}  debounce {}s  idle {}s  reconnect {}s\n",
        config.webhook_url,
        config.delivery_mode,
        config.debounce.as_secs(),
        config.idle_timeout.as_secs(),
        config.reconnect_interval.as_secs()
    ));
    if let Some(path) = &config.dedup_state_file {
        out.push_str(&format!("dedup state {}\n", path.display()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_lists_accounts_and_rejects() {
        let config = Config::from_json_str(
            r#"{
                "accounts": [
                    {"id": "work", "host": "imap.example.com", "username": "me", "password": "pw"},
                    {"host": "imap.example.org", "password": "pw"}
                ],
                "webhook_url": "https://hooks.example.com/wake",
                "webhook_token": "t",
                "delivery_mode": "next-heartbeat"
            }"#,
        )
        .expect("config");

        let text = describe_config(&config);
        assert!(text.contains("ok    work  me@imap.example.com:993  INBOX  tls=true"));
        assert!(text.contains("skip  account #1: missing username"));
        assert!(text.contains("mode next-heartbeat  debounce 10s  idle 300s  reconnect 900s"));
        assert!(!text.contains("pw"), "password must not be printed");
    }

    #[test]
    fn describe_warns_on_unset_password_env() {
        let config = Config::from_json_str(
            r#"{
                "accounts": [
                    {"host": "h", "username": "u", "password_env": "MAILWAKE_TEST_UNSET_VAR_81F2"}
                ],
                "webhook_url": "https://x",
                "webhook_token": "t"
            }"#,
        )
        .expect("config");
        assert!(describe_config(&config).contains("$MAILWAKE_TEST_UNSET_VAR_81F2 is not set"));
    }
}
