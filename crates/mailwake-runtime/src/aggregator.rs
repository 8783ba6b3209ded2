//! Debounce aggregator shared by every session manager.
//!
//! The first event after idle opens a batch and arms a fixed window timer;
//! later events only append. When the window closes the batch is taken out
//! under the lock and dispatched after the lock is released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use mailwake_core::{DeliveryMode, NotificationBatch, RawEvent};
use mailwake_imap::EventSink;

use crate::sink::NotificationSink;

#[derive(Default)]
struct Pending {
    /// Incremented per opened batch so a stale timer cannot close a newer one.
    generation: u64,
    batch: Option<NotificationBatch>,
}

struct Inner<S> {
    sink: S,
    window: Duration,
    mode: DeliveryMode,
    pending: Mutex<Pending>,
    timers: TaskTracker,
    shutdown: CancellationToken,
}

pub struct Aggregator<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Aggregator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: NotificationSink> Aggregator<S> {
    pub fn new(sink: S, window: Duration, mode: DeliveryMode) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                window,
                mode,
                pending: Mutex::new(Pending::default()),
                timers: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add one event. Must be called from within a tokio runtime.
    pub fn ingest(&self, event: RawEvent) {
        let opened = {
            let mut pending = self.pending();
            match pending.batch.as_mut() {
                Some(batch) => {
                    batch.push(event);
                    None
                }
                None => {
                    pending.generation += 1;
                    pending.batch = Some(NotificationBatch::open(event, Utc::now()));
                    Some(pending.generation)
                }
            }
        };

        if let Some(generation) = opened {
            tracing::debug!(generation, window_secs = self.inner.window.as_secs(), "batch opened");
            let this = self.clone();
            self.inner.timers.spawn(async move {
                tokio::select! {
                    () = this.inner.shutdown.cancelled() => {}
                    () = tokio::time::sleep(this.inner.window) => {
                        this.close_window(generation).await;
                    }
                }
            });
        }
    }

    /// Number of events waiting in the open window.
    pub fn pending_len(&self) -> usize {
        self.pending().batch.as_ref().map_or(0, NotificationBatch::len)
    }

    async fn close_window(&self, generation: u64) {
        let batch = {
            let mut pending = self.pending();
            if pending.generation != generation {
                return;
            }
            pending.batch.take()
        };
        if let Some(batch) = batch {
            self.dispatch(batch).await;
        }
    }

    async fn dispatch(&self, batch: NotificationBatch) {
        let window_start = batch.window_start();
        let Some(notification) = batch.into_notification(self.inner.mode) else {
            return;
        };
        let count = notification.event_count;
        match self.inner.sink.send(&notification).await {
            Ok(()) => tracing::info!(
                events = count,
                mode = %notification.mode,
                window_start = %window_start,
                "notification sent"
            ),
            Err(e) => tracing::warn!(events = count, "notification dropped: {e}"),
        }
    }

    /// Close the open window now and wait for in-flight dispatches.
    /// Used at shutdown; events arriving afterwards are not delivered.
    pub async fn flush(&self) {
        self.inner.shutdown.cancel();
        let batch = self.pending().batch.take();
        if let Some(batch) = batch {
            tracing::info!(events = batch.len(), "flushing pending batch");
            self.dispatch(batch).await;
        }
        self.inner.timers.close();
        self.inner.timers.wait().await;
    }
}

impl<S: NotificationSink> EventSink for Aggregator<S> {
    fn deliver(&self, event: RawEvent) {
        self.ingest(event);
    }
}
