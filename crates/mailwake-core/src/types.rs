use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned message UID, ascending within one UIDVALIDITY epoch.
pub type Uid = u32;

// ─── Events ───────────────────────────────────────────────────────

/// One newly arrived message as seen by a session manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub account_id: String,
    pub uid: Uid,
    pub sender: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
}

// ─── Notification ─────────────────────────────────────────────────

/// Delivery hint forwarded to the receiver alongside the text.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    #[default]
    Now,
    NextHeartbeat,
}

impl DeliveryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Now => "now",
            Self::NextHeartbeat => "next-heartbeat",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire payload for the notification sink: `{"text": ..., "mode": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub text: String,
    pub mode: DeliveryMode,
    /// Number of messages this notification covers. Not sent on the wire.
    #[serde(skip)]
    pub event_count: usize,
}

// ─── Session state ────────────────────────────────────────────────

/// Lifecycle state of one account's session manager.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticated,
    Watching,
    Fetching,
    Stopped,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Watching => "watching",
            Self::Fetching => "fetching",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one account, published for status inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatus {
    pub account_id: String,
    pub state: SessionState,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub last_keepalive_at: Option<DateTime<Utc>>,
    pub connected_since: Option<DateTime<Utc>>,
    /// Delay before the next reconnect attempt; zero while connected.
    pub backoff_delay_secs: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_seen_uid: Option<Uid>,
}

impl AccountStatus {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            state: SessionState::Disconnected,
            last_fetch_at: None,
            last_keepalive_at: None,
            connected_since: None,
            backoff_delay_secs: 0,
            consecutive_failures: 0,
            last_error: None,
            last_seen_uid: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_mode_wire_names() {
        assert_eq!(
            serde_json::to_string(&DeliveryMode::NextHeartbeat).expect("serialize"),
            "\"next-heartbeat\""
        );
        let mode: DeliveryMode = serde_json::from_str("\"now\"").expect("deserialize");
        assert_eq!(mode, DeliveryMode::Now);
    }

    #[test]
    fn notification_payload_omits_event_count() {
        let n = Notification {
            text: "hi".to_string(),
            mode: DeliveryMode::Now,
            event_count: 3,
        };
        let json = serde_json::to_value(&n).expect("serialize");
        assert_eq!(json, serde_json::json!({"text": "hi", "mode": "now"}));
    }

    #[test]
    fn new_status_is_disconnected() {
        let st = AccountStatus::new("alice@example.com");
        assert_eq!(st.state, SessionState::Disconnected);
        assert_eq!(st.state.to_string(), "disconnected");
        assert!(st.last_seen_uid.is_none());
    }
}
