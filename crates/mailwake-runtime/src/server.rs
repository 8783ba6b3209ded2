//! UDS JSON-RPC control server.
//! Connection-per-request, newline-delimited JSON. Methods: `status`, `stop`.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use mailwake_imap::StatusBoard;

use crate::aggregator::Aggregator;
use crate::sink::NotificationSink;

/// What the control socket can see and do.
pub struct ControlState<S> {
    pub status: StatusBoard,
    pub aggregator: Aggregator<S>,
    pub cancel: CancellationToken,
    pub started_at: DateTime<Utc>,
}

/// Bind the socket: directory 0700, socket 0600, stale socket replaced.
/// Fails if another listener is already serving this path.
pub async fn bind(socket_path: &str) -> anyhow::Result<UnixListener> {
    let socket_dir = Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    if Path::new(socket_path).exists() {
        if UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another listener is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("control socket listening on {socket_path}");
    Ok(listener)
}

/// Accept until the state's cancellation token fires.
pub async fn serve<S: NotificationSink>(listener: UnixListener, state: Arc<ControlState<S>>) {
    loop {
        let accepted = tokio::select! {
            () = state.cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, _)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &state).await {
                        tracing::debug!("connection error: {e}");
                    }
                });
            }
            Err(e) => tracing::warn!("accept failed: {e}"),
        }
    }
    tracing::debug!("control socket closed");
}

async fn handle_connection<S: NotificationSink>(
    stream: UnixStream,
    state: &ControlState<S>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response = handle_request(line.trim(), state);
    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;
    Ok(())
}

fn handle_request<S: NotificationSink>(line: &str, state: &ControlState<S>) -> serde_json::Value {
    let request: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return rpc_error(serde_json::Value::Null, -32700, "parse error"),
    };
    let method = request["method"].as_str().unwrap_or("");
    let id = request["id"].clone();

    let result = match method {
        "status" => build_status(state),
        "stop" => {
            tracing::info!("stop requested over control socket");
            state.cancel.cancel();
            serde_json::json!({ "stopping": true })
        }
        _ => return rpc_error(id, -32601, "method not found"),
    };

    serde_json::json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn rpc_error(id: serde_json::Value, code: i64, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "error": {"code": code, "message": message},
        "id": id,
    })
}

pub(crate) fn build_status<S: NotificationSink>(state: &ControlState<S>) -> serde_json::Value {
    let now = Utc::now();
    serde_json::json!({
        "started_at": state.started_at,
        "uptime_secs": (now - state.started_at).num_seconds().max(0),
        "pending_events": state.aggregator.pending_len(),
        "stopping": state.cancel.is_cancelled(),
        "accounts": state.status.snapshot(),
    })
}
