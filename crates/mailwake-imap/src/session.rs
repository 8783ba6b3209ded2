//! Mail session traits and the async-imap implementation.
//!
//! The manager loop only talks to [`MailConnector`] / [`MailSession`], so
//! tests can drive it with a scripted fake.

use std::future::Future;
use std::time::Duration;

use async_imap::extensions::idle::IdleResponse;
use async_imap::types::Fetch;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use mailwake_core::{AccountConfig, Uid};

use crate::error::SessionError;
use crate::headers::parse_sender_subject;
use crate::stream::{MailStream, tls_connector};

/// Mailbox state right after SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxInfo {
    pub uid_validity: Option<u32>,
    /// Highest UID currently in the mailbox, 0 when empty.
    pub highest_uid: Uid,
}

/// Why the push wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Server reported a mailbox change.
    Changed,
    /// Bounded wait elapsed without a change.
    TimedOut,
    /// Cancellation was requested while waiting.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub uid: Uid,
    pub sender: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
}

/// Opens authenticated sessions for an account.
pub trait MailConnector: Send + Sync {
    type Session: MailSession;

    fn connect(
        &self,
        account: &AccountConfig,
    ) -> impl Future<Output = Result<Self::Session, SessionError>> + Send;
}

/// One authenticated connection. Exactly one owner (its session manager).
pub trait MailSession: Send {
    fn select(
        &mut self,
        mailbox: &str,
    ) -> impl Future<Output = Result<MailboxInfo, SessionError>> + Send;

    /// Enter push-wait mode for at most `timeout`, leaving it before returning.
    fn wait_for_change(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<WaitOutcome, SessionError>> + Send;

    /// Lightweight no-op to reset idle timers along the path.
    fn keep_alive(&mut self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Headers of every message with UID > `after`, in any order.
    fn fetch_after(
        &mut self,
        after: Uid,
    ) -> impl Future<Output = Result<Vec<FetchedMessage>, SessionError>> + Send;

    fn logout(self) -> impl Future<Output = Result<(), SessionError>> + Send;
}

// ─── async-imap backend ───────────────────────────────────────────

const FETCH_QUERY: &str = "(UID INTERNALDATE BODY.PEEK[HEADER])";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound for leaving IDLE and logging out once a stop was requested.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Run one IMAP exchange with a deadline. A silent peer surfaces as
/// `Transient` so the manager tears the connection down and retries.
async fn bounded<T, E>(
    limit: Duration,
    what: &str,
    op: impl Future<Output = Result<T, E>>,
) -> Result<T, SessionError>
where
    SessionError: From<E>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result.map_err(SessionError::from),
        Err(_) => Err(SessionError::Transient(format!(
            "{what} timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

/// Only a tagged NO/BAD to LOGIN means the credentials were refused.
fn login_error(err: async_imap::error::Error) -> SessionError {
    use async_imap::error::Error;
    match err {
        Error::No(msg) | Error::Bad(msg) => SessionError::Auth(msg),
        other => SessionError::from(other),
    }
}

/// Cheap to clone: the rustls config is shared.
#[derive(Clone)]
pub struct ImapConnector {
    tls: TlsConnector,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl ImapConnector {
    pub fn new() -> Result<Self, SessionError> {
        Ok(Self {
            tls: tls_connector()?,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    /// Bound on TCP/TLS setup, greeting, login and the capability check.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound on every command issued on an open session.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn open(&self, account: &AccountConfig) -> Result<ImapSession, SessionError> {
        let password = account.credential.resolve().ok_or_else(|| {
            SessionError::Auth(format!("no credential available for {}", account.id))
        })?;

        let stream =
            MailStream::connect(&self.tls, &account.host, account.port, account.use_tls).await?;
        let mut client = async_imap::Client::new(stream);
        match client.read_response().await {
            Some(Ok(_greeting)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(SessionError::Transient(
                    "connection closed before greeting".to_string(),
                ));
            }
        }

        let mut session = client
            .login(&account.username, &password)
            .await
            .map_err(|(e, _client)| login_error(e))?;

        let capabilities = session.capabilities().await?;
        if !capabilities.has_str("IDLE") {
            if let Err(e) = session.logout().await {
                tracing::debug!("logout after capability check failed: {e}");
            }
            return Err(SessionError::Protocol(
                "server does not advertise IDLE".to_string(),
            ));
        }

        Ok(ImapSession {
            inner: Some(session),
            command_timeout: self.command_timeout,
        })
    }
}

impl MailConnector for ImapConnector {
    type Session = ImapSession;

    async fn connect(&self, account: &AccountConfig) -> Result<ImapSession, SessionError> {
        tokio::time::timeout(self.connect_timeout, self.open(account))
            .await
            .map_err(|_| {
                SessionError::Transient(format!("connect to {} timed out", account.host))
            })?
    }
}

pub struct ImapSession {
    /// `None` only transiently while IDLE owns the session, or after a failed
    /// IDLE left it unusable.
    inner: Option<async_imap::Session<MailStream>>,
    command_timeout: Duration,
}

impl ImapSession {
    fn session(&mut self) -> Result<&mut async_imap::Session<MailStream>, SessionError> {
        self.inner
            .as_mut()
            .ok_or_else(|| SessionError::Transient("session lost during IDLE".to_string()))
    }

    fn stop_grace(&self) -> Duration {
        self.command_timeout.min(STOP_GRACE)
    }
}

impl MailSession for ImapSession {
    async fn select(&mut self, mailbox: &str) -> Result<MailboxInfo, SessionError> {
        let limit = self.command_timeout;
        let session = self.session()?;
        let selected = bounded(limit, "SELECT", session.select(mailbox)).await?;

        let highest_uid = match selected.uid_next {
            Some(next) => next.saturating_sub(1),
            None if selected.exists == 0 => 0,
            None => bounded(limit, "UID SEARCH", session.uid_search("ALL"))
                .await?
                .into_iter()
                .max()
                .unwrap_or(0),
        };

        Ok(MailboxInfo {
            uid_validity: selected.uid_validity,
            highest_uid,
        })
    }

    async fn wait_for_change(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, SessionError> {
        let session = self
            .inner
            .take()
            .ok_or_else(|| SessionError::Transient("session lost during IDLE".to_string()))?;

        let mut handle = session.idle();
        bounded(self.command_timeout, "IDLE", handle.init()).await?;

        let outcome = {
            // The library timer restarts on every untagged keep-alive from the
            // server, so the overall bound is enforced here as well.
            let (wait, stop) = handle.wait_with_timeout(timeout);
            let outcome = tokio::select! {
                response = wait => match response? {
                    IdleResponse::NewData(_) => WaitOutcome::Changed,
                    IdleResponse::Timeout | IdleResponse::ManualInterrupt => WaitOutcome::TimedOut,
                },
                () = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
                () = cancel.cancelled() => WaitOutcome::Stopped,
            };
            drop(stop);
            outcome
        };

        let limit = match outcome {
            WaitOutcome::Stopped => self.stop_grace(),
            _ => self.command_timeout,
        };
        match bounded(limit, "IDLE DONE", handle.done()).await {
            Ok(session) => {
                self.inner = Some(session);
                Ok(outcome)
            }
            Err(e) if outcome == WaitOutcome::Stopped => {
                tracing::debug!("leaving IDLE on stop failed: {e}");
                Ok(outcome)
            }
            Err(e) => Err(e),
        }
    }

    async fn keep_alive(&mut self) -> Result<(), SessionError> {
        let limit = self.command_timeout;
        bounded(limit, "NOOP", self.session()?.noop()).await
    }

    async fn fetch_after(&mut self, after: Uid) -> Result<Vec<FetchedMessage>, SessionError> {
        let limit = self.command_timeout;
        let session = self.session()?;
        let range = format!("{}:*", after.saturating_add(1));
        let fetches = bounded(limit, "UID FETCH", async {
            let stream = session.uid_fetch(range, FETCH_QUERY).await?;
            stream.try_collect::<Vec<Fetch>>().await
        })
        .await?;

        // `N:*` always matches the newest message, even when its UID < N.
        Ok(fetches
            .iter()
            .filter_map(|fetch| {
                let uid = fetch.uid.filter(|&uid| uid > after)?;
                let (sender, subject) = parse_sender_subject(fetch.header().unwrap_or_default());
                let received_at = fetch
                    .internal_date()
                    .map_or_else(Utc::now, |d| d.with_timezone(&Utc));
                Some(FetchedMessage {
                    uid,
                    sender,
                    subject,
                    received_at,
                })
            })
            .collect())
    }

    async fn logout(mut self) -> Result<(), SessionError> {
        let limit = self.stop_grace();
        if let Some(mut session) = self.inner.take() {
            bounded(limit, "LOGOUT", session.logout()).await?;
        }
        Ok(())
    }
}
