//! mailwake-imap: IMAP IO boundary and the per-account session manager.
//! The connector/session traits keep the manager loop testable without a
//! server; `ImapConnector` is the real async-imap backed implementation.

pub mod error;
pub mod headers;
pub mod manager;
pub mod session;
pub mod status;
pub mod stream;

pub use error::{ErrorClass, SessionError};
pub use manager::{AccountContext, EventSink, WatchSettings, run_session_manager};
pub use session::{
    FetchedMessage, ImapConnector, ImapSession, MailConnector, MailSession, MailboxInfo,
    WaitOutcome,
};
pub use status::StatusBoard;
