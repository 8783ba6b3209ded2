//! Session error taxonomy. Every class is retried with backoff; the class
//! only decides how loudly it is logged.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Authentication,
    Protocol,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Authentication => "authentication",
            Self::Protocol => "protocol",
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// Network reset, timeout, DNS failure, connection lost.
    #[error("transient: {0}")]
    Transient(String),

    /// Login rejected or credential unavailable.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Unexpected or unparseable server response.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transient(_) => ErrorClass::Transient,
            Self::Auth(_) => ErrorClass::Authentication,
            Self::Protocol(_) => ErrorClass::Protocol,
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        Self::Transient(e.to_string())
    }
}

impl From<async_imap::error::Error> for SessionError {
    fn from(e: async_imap::error::Error) -> Self {
        use async_imap::error::Error;
        match e {
            Error::Io(io) => Self::Transient(io.to_string()),
            Error::ConnectionLost => Self::Transient("connection lost".to_string()),
            other => Self::Protocol(other.to_string()),
        }
    }
}
