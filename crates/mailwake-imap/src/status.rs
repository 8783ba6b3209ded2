//! Shared per-account status snapshots for the inspection endpoint.
//! Each manager writes only its own entry.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use mailwake_core::AccountStatus;

#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<BTreeMap<String, AccountStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account with a fresh `Disconnected` entry.
    pub fn register(&self, account_id: &str) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(account_id.to_string())
            .or_insert_with(|| AccountStatus::new(account_id));
    }

    /// Mutate one account's entry, creating it if needed.
    pub fn update(&self, account_id: &str, f: impl FnOnce(&mut AccountStatus)) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let entry = map
            .entry(account_id.to_string())
            .or_insert_with(|| AccountStatus::new(account_id));
        f(entry);
    }

    pub fn get(&self, account_id: &str) -> Option<AccountStatus> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(account_id).cloned()
    }

    /// All accounts, ordered by id.
    pub fn snapshot(&self) -> Vec<AccountStatus> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailwake_core::SessionState;

    #[test]
    fn update_creates_and_mutates() {
        let board = StatusBoard::new();
        board.register("b");
        board.update("a", |s| s.state = SessionState::Watching);

        let snap = board.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].account_id, "a");
        assert_eq!(snap[0].state, SessionState::Watching);
        assert_eq!(snap[1].state, SessionState::Disconnected);
    }

    #[test]
    fn clones_share_state() {
        let board = StatusBoard::new();
        let other = board.clone();
        other.update("x", |s| s.consecutive_failures = 3);
        assert_eq!(board.get("x").map(|s| s.consecutive_failures), Some(3));
    }
}
