//! UDS JSON-RPC client for the `status` and `stop` subcommands.

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use mailwake_core::AccountStatus;

pub(crate) async fn rpc_call(socket_path: &str, method: &str) -> anyhow::Result<serde_json::Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to listener at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": {},
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: serde_json::Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("RPC error: {error}");
    }

    Ok(response["result"].clone())
}

/// `mailwake status`: one line per account.
pub async fn cmd_status(socket_path: &str) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "status").await?;
    print!("{}", format_status(&result, Utc::now())?);
    Ok(())
}

/// `mailwake stop`
pub async fn cmd_stop(socket_path: &str) -> anyhow::Result<()> {
    rpc_call(socket_path, "stop").await?;
    println!("stop requested");
    Ok(())
}

pub(crate) fn format_status(
    result: &serde_json::Value,
    now: DateTime<Utc>,
) -> anyhow::Result<String> {
    let accounts: Vec<AccountStatus> = serde_json::from_value(result["accounts"].clone())?;
    let pending = result["pending_events"].as_u64().unwrap_or(0);
    let uptime = result["uptime_secs"].as_i64().unwrap_or(0);

    let mut out = format!(
        "up {}  accounts {}  pending {}\n",
        format_age(uptime),
        accounts.len(),
        pending
    );
    let width = accounts.iter().map(|a| a.account_id.len()).max().unwrap_or(0);

    for account in &accounts {
        let last_fetch = account.last_fetch_at.map_or_else(
            || "never".to_string(),
            |t| format!("{} ago", format_age((now - t).num_seconds())),
        );
        out.push_str(&format!(
            "{:<width$}  {:<13}  fetch {last_fetch}",
            account.account_id,
            account.state.as_str(),
        ));
        if account.consecutive_failures > 0 {
            out.push_str(&format!(
                "  failures {} (retry in {}s)",
                account.consecutive_failures, account.backoff_delay_secs
            ));
        }
        if let Some(err) = &account.last_error {
            out.push_str(&format!("  error: {err}"));
        }
        out.push('\n');
    }
    Ok(out)
}

fn format_age(secs: i64) -> String {
    let secs = secs.max(0);
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m", secs / 60),
        _ => format!("{}h{}m", secs / 3600, (secs % 3600) / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailwake_core::SessionState;

    #[test]
    fn formats_accounts() {
        let now = Utc::now();
        let mut healthy = AccountStatus::new("work");
        healthy.state = SessionState::Watching;
        healthy.last_fetch_at = Some(now - chrono::Duration::seconds(125));

        let mut failing = AccountStatus::new("personal");
        failing.consecutive_failures = 3;
        failing.backoff_delay_secs = 20;
        failing.last_error = Some("authentication failed: bad password".to_string());

        let result = serde_json::json!({
            "uptime_secs": 3720,
            "pending_events": 2,
            "accounts": [failing, healthy],
        });
        let out = format_status(&result, now).expect("format");
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines[0], "up 1h2m  accounts 2  pending 2");
        assert_eq!(
            lines[1],
            concat!(
                "personal  disconnected   fetch never  failures 3 (retry in 20s)  ",
                "error: authentication failed: bad password"
            )
        );
        assert_eq!(lines[2], "work      watching       fetch 2m ago");
    }

    #[test]
    fn rejects_malformed_accounts() {
        let result = serde_json::json!({ "accounts": "nope" });
        assert!(format_status(&result, Utc::now()).is_err());
    }

    #[test]
    fn age_units() {
        assert_eq!(format_age(-5), "0s");
        assert_eq!(format_age(59), "59s");
        assert_eq!(format_age(60), "1m");
        assert_eq!(format_age(7260), "2h1m");
    }
}
