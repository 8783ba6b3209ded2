//! Per-account session manager.
//!
//! ```text
//! Disconnected -> Connecting -> Authenticated -> Watching <-> Fetching
//!       ^                                           |
//!       +------------- error / scheduled reconnect --+      (stop -> Stopped)
//! ```
//!
//! The push wait is the only long suspension point. It is bounded by the
//! idle timeout (keep-alive on expiry) and by the scheduled full reconnect,
//! and raced against the cancellation token.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use mailwake_core::config::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_RECONNECT_INTERVAL_SECS};
use mailwake_core::{
    AccountConfig, BackoffPolicy, BackoffState, DedupTracker, RawEvent, SessionState, Uid,
};

use crate::error::{ErrorClass, SessionError};
use crate::session::{MailConnector, MailSession, MailboxInfo, WaitOutcome};
use crate::status::StatusBoard;

/// Receiver of deduplicated new-message events.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: RawEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    pub idle_timeout: Duration,
    pub reconnect_interval: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            reconnect_interval: Duration::from_secs(DEFAULT_RECONNECT_INTERVAL_SECS),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Everything one manager needs, handed over at spawn time.
pub struct AccountContext<C> {
    pub account: AccountConfig,
    pub connector: C,
    pub settings: WatchSettings,
    pub dedup: Arc<Mutex<DedupTracker>>,
    pub sink: Arc<dyn EventSink>,
    pub status: StatusBoard,
    pub cancel: CancellationToken,
}

/// How a healthy session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Stopped,
    ReconnectDue,
}

impl<C: MailConnector> AccountContext<C> {
    fn id(&self) -> &str {
        &self.account.id
    }

    fn set_state(&self, state: SessionState) {
        self.status.update(self.id(), |s| s.state = state);
    }

    fn dedup(&self) -> std::sync::MutexGuard<'_, DedupTracker> {
        self.dedup.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run one account until cancelled. Never returns an error: failures are
/// logged, recorded in the status board, and retried with backoff.
pub async fn run_session_manager<C: MailConnector>(ctx: AccountContext<C>) {
    let mut backoff = BackoffState::default();
    ctx.status.register(ctx.id());
    tracing::info!(
        account = %ctx.id(),
        host = %ctx.account.host,
        port = ctx.account.port,
        tls = ctx.account.use_tls,
        mailbox = %ctx.account.mailbox,
        "session manager started"
    );

    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }

        match run_session(&ctx, &mut backoff).await {
            Ok(SessionEnd::Stopped) => break,
            Ok(SessionEnd::ReconnectDue) => {
                tracing::info!(account = %ctx.id(), "scheduled reconnect");
                ctx.set_state(SessionState::Disconnected);
            }
            Err(e) => {
                let (delay, next) = ctx.settings.backoff.on_failure(backoff);
                backoff = next;
                record_failure(&ctx, &e, backoff, delay);

                tokio::select! {
                    () = ctx.cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    ctx.status.update(ctx.id(), |s| {
        s.state = SessionState::Stopped;
        s.backoff_delay_secs = 0;
        s.connected_since = None;
    });
    tracing::info!(account = %ctx.id(), "session manager stopped");
}

fn record_failure<C: MailConnector>(
    ctx: &AccountContext<C>,
    err: &SessionError,
    backoff: BackoffState,
    delay: Duration,
) {
    match err.class() {
        ErrorClass::Authentication => tracing::error!(
            account = %ctx.id(),
            attempt = backoff.attempt,
            retry_in_secs = delay.as_secs(),
            "login failed, check credentials: {err}"
        ),
        class => tracing::warn!(
            account = %ctx.id(),
            class = class.as_str(),
            attempt = backoff.attempt,
            retry_in_secs = delay.as_secs(),
            "connection error: {err}"
        ),
    }

    ctx.status.update(ctx.id(), |s| {
        s.state = SessionState::Disconnected;
        s.connected_since = None;
        s.consecutive_failures = backoff.attempt;
        s.backoff_delay_secs = delay.as_secs();
        s.last_error = Some(err.to_string());
    });
}

/// One connection from connect to teardown.
async fn run_session<C: MailConnector>(
    ctx: &AccountContext<C>,
    backoff: &mut BackoffState,
) -> Result<SessionEnd, SessionError> {
    ctx.set_state(SessionState::Connecting);
    let mut session = tokio::select! {
        () = ctx.cancel.cancelled() => return Ok(SessionEnd::Stopped),
        session = ctx.connector.connect(&ctx.account) => session?,
    };

    let info = session.select(&ctx.account.mailbox).await?;
    *backoff = ctx.settings.backoff.on_success();
    let mut last_uid = derive_last_seen(ctx, info);

    let now = Utc::now();
    ctx.status.update(ctx.id(), |s| {
        s.state = SessionState::Authenticated;
        s.connected_since = Some(now);
        s.consecutive_failures = 0;
        s.backoff_delay_secs = 0;
        s.last_error = None;
        s.last_seen_uid = Some(last_uid);
    });
    tracing::info!(account = %ctx.id(), last_uid, "push monitoring active");

    // Mail that arrived while we were disconnected.
    last_uid = fetch_new(ctx, &mut session, last_uid).await?;

    let reconnect_at = Instant::now() + ctx.settings.reconnect_interval;

    loop {
        ctx.set_state(SessionState::Watching);
        let remaining = reconnect_at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            close(ctx, session).await;
            return Ok(SessionEnd::ReconnectDue);
        }

        let wait = ctx.settings.idle_timeout.min(remaining);
        match session.wait_for_change(wait, &ctx.cancel).await? {
            WaitOutcome::Stopped => {
                close(ctx, session).await;
                return Ok(SessionEnd::Stopped);
            }
            WaitOutcome::Changed => {
                tracing::debug!(account = %ctx.id(), "mailbox change signaled");
                last_uid = fetch_new(ctx, &mut session, last_uid).await?;
            }
            WaitOutcome::TimedOut if Instant::now() >= reconnect_at => {}
            WaitOutcome::TimedOut => {
                session.keep_alive().await?;
                let now = Utc::now();
                ctx.status.update(ctx.id(), |s| s.last_keepalive_at = Some(now));
                tracing::debug!(account = %ctx.id(), "keep-alive sent");
            }
        }
    }
}

/// Starting UID after SELECT: the tracker's record when it is still valid,
/// otherwise the mailbox's current top (existing mail is never announced).
fn derive_last_seen<C: MailConnector>(ctx: &AccountContext<C>, info: MailboxInfo) -> Uid {
    let mut dedup = ctx.dedup();
    if dedup.observe_validity(ctx.id(), info.uid_validity) {
        tracing::warn!(
            account = %ctx.id(),
            uid_validity = ?info.uid_validity,
            "UIDVALIDITY changed, re-deriving baseline"
        );
    }
    dedup.seed(ctx.id(), info.highest_uid, info.uid_validity)
}

/// Fetch everything above `last_uid`, hand accepted messages to the sink in
/// ascending UID order, and return the new high-water mark.
async fn fetch_new<C: MailConnector>(
    ctx: &AccountContext<C>,
    session: &mut C::Session,
    last_uid: Uid,
) -> Result<Uid, SessionError> {
    ctx.set_state(SessionState::Fetching);
    let mut messages = session.fetch_after(last_uid).await?;
    messages.retain(|m| m.uid > last_uid);
    messages.sort_by_key(|m| m.uid);

    let mut high = last_uid;
    for message in messages {
        high = high.max(message.uid);
        if !ctx.dedup().should_notify(ctx.id(), message.uid) {
            tracing::debug!(account = %ctx.id(), uid = message.uid, "already notified, skipping");
            continue;
        }
        tracing::info!(
            account = %ctx.id(),
            uid = message.uid,
            from = %message.sender,
            "new message"
        );
        ctx.sink.deliver(RawEvent {
            account_id: ctx.account.id.clone(),
            uid: message.uid,
            sender: message.sender,
            subject: message.subject,
            received_at: message.received_at,
        });
    }

    let now = Utc::now();
    ctx.status.update(ctx.id(), |s| {
        s.last_fetch_at = Some(now);
        s.last_seen_uid = Some(high);
    });
    Ok(high)
}

async fn close<C: MailConnector>(ctx: &AccountContext<C>, session: C::Session) {
    if let Err(e) = session.logout().await {
        tracing::debug!(account = %ctx.id(), "logout failed: {e}");
    }
    ctx.set_state(SessionState::Disconnected);
}
