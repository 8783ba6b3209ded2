//! Debounce batch and notification text.
//!
//! A batch is opened by the first event of a window and closed once by the
//! aggregator. One event renders as a detailed message; more render as a
//! summary grouped by account in arrival order.

use chrono::{DateTime, Utc};

use crate::types::{DeliveryMode, Notification, RawEvent};

/// Upper bound on notification text, in characters.
pub const MAX_TEXT_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationBatch {
    events: Vec<RawEvent>,
    window_start: DateTime<Utc>,
}

impl NotificationBatch {
    pub fn open(first: RawEvent, window_start: DateTime<Utc>) -> Self {
        Self {
            events: vec![first],
            window_start,
        }
    }

    pub fn push(&mut self, event: RawEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    pub fn events(&self) -> &[RawEvent] {
        &self.events
    }

    /// Render the closed batch. `None` only for an empty batch.
    pub fn into_notification(self, mode: DeliveryMode) -> Option<Notification> {
        format_batch(&self.events, mode)
    }
}

/// Render events as a single notification.
pub fn format_batch(events: &[RawEvent], mode: DeliveryMode) -> Option<Notification> {
    let text = match events {
        [] => return None,
        [single] => format_single(single),
        many => format_summary(many),
    };
    Some(Notification {
        text: truncate_chars(&text, MAX_TEXT_CHARS),
        mode,
        event_count: events.len(),
    })
}

fn format_single(event: &RawEvent) -> String {
    format!(
        "📧 New email in {}:\nFrom: {}\nSubject: {}",
        event.account_id, event.sender, event.subject
    )
}

fn format_summary(events: &[RawEvent]) -> String {
    // Group by account, keeping first-seen account order and arrival order within.
    let mut groups: Vec<(&str, Vec<&RawEvent>)> = Vec::new();
    for event in events {
        match groups.iter_mut().find(|(id, _)| *id == event.account_id) {
            Some((_, list)) => list.push(event),
            None => groups.push((event.account_id.as_str(), vec![event])),
        }
    }

    let mut out = if let [(account, _)] = groups.as_slice() {
        format!("📧 {} new emails in {account}:", events.len())
    } else {
        format!("📧 {} new emails in {} accounts:", events.len(), groups.len())
    };

    let grouped = groups.len() > 1;
    for (account, list) in &groups {
        if grouped {
            out.push_str(&format!("\n{account} ({}):", list.len()));
        }
        for event in list {
            out.push_str(&format!("\n- {}: {}", event.sender, event.subject));
        }
    }
    out
}

/// Cut to at most `max` chars, ending with an ellipsis when shortened.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('\u{2026}');
    out
}
