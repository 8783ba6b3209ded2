//! mailwake-core: pure types and state machines for the mail push listener.
//! Config model, reconnect backoff, UID dedup, notification batching.
//! No network IO and no async runtime.

pub mod backoff;
pub mod batch;
pub mod config;
pub mod dedup;
pub mod error;
pub mod types;

pub use backoff::{BackoffPolicy, BackoffState};
pub use batch::{NotificationBatch, format_batch};
pub use config::{AccountConfig, Config, Credential};
pub use dedup::DedupTracker;
pub use error::{ConfigError, DedupStoreError};
pub use types::{AccountStatus, DeliveryMode, Notification, RawEvent, SessionState, Uid};
