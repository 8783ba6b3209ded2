//! Per-account last-seen UID tracking.
//!
//! A UID is accepted only if it is strictly greater than the one recorded for
//! its account. Session managers read their starting point back from here
//! after every (re)connect, so a reconnect that re-delivers a message cannot
//! announce it twice.
//!
//! Persistence is optional. With a store path, the tracker loads it on
//! construction and rewrites it (temp file + rename) after every change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DedupStoreError;
use crate::types::Uid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupEntry {
    /// UIDVALIDITY the recorded UID belongs to, when the server reported one.
    pub uid_validity: Option<u32>,
    pub last_uid: Uid,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    accounts: BTreeMap<String, DedupEntry>,
}

#[derive(Debug, Default)]
pub struct DedupTracker {
    entries: BTreeMap<String, DedupEntry>,
    store: Option<PathBuf>,
}

impl DedupTracker {
    /// Memory-only tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker backed by a JSON file. A missing file starts empty.
    pub fn with_store(path: impl Into<PathBuf>) -> Result<Self, DedupStoreError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str::<StoreFile>(&content)?.accounts,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), accounts = entries.len(), "loaded dedup store");
        Ok(Self {
            entries,
            store: Some(path),
        })
    }

    /// Accept `uid` iff it is newer than the recorded one; accepting records it.
    pub fn should_notify(&mut self, account_id: &str, uid: Uid) -> bool {
        match self.entries.get_mut(account_id) {
            Some(entry) if uid <= entry.last_uid => return false,
            Some(entry) => entry.last_uid = uid,
            None => {
                self.entries.insert(
                    account_id.to_string(),
                    DedupEntry {
                        uid_validity: None,
                        last_uid: uid,
                    },
                );
            }
        }
        self.persist();
        true
    }

    pub fn last_seen(&self, account_id: &str) -> Option<Uid> {
        self.entries.get(account_id).map(|e| e.last_uid)
    }

    pub fn entry(&self, account_id: &str) -> Option<DedupEntry> {
        self.entries.get(account_id).copied()
    }

    /// Record a baseline only if the account has none yet. Returns the UID
    /// now in effect for the account.
    pub fn seed(&mut self, account_id: &str, uid: Uid, uid_validity: Option<u32>) -> Uid {
        if let Some(entry) = self.entries.get(account_id) {
            return entry.last_uid;
        }
        self.entries.insert(
            account_id.to_string(),
            DedupEntry {
                uid_validity,
                last_uid: uid,
            },
        );
        self.persist();
        uid
    }

    /// Compare the mailbox's current UIDVALIDITY against the recorded one.
    /// On mismatch the record is dropped (old UIDs mean nothing any more)
    /// and `true` is returned. An entry without a validity adopts this one.
    pub fn observe_validity(&mut self, account_id: &str, uid_validity: Option<u32>) -> bool {
        let Some(current) = uid_validity else {
            return false;
        };
        let Some(entry) = self.entries.get_mut(account_id) else {
            return false;
        };
        let recorded = entry.uid_validity;
        match recorded {
            Some(recorded) if recorded != current => {
                self.entries.remove(account_id);
                self.persist();
                true
            }
            Some(_) => false,
            None => {
                entry.uid_validity = Some(current);
                self.persist();
                false
            }
        }
    }

    pub fn store_path(&self) -> Option<&Path> {
        self.store.as_deref()
    }

    fn persist(&self) {
        let Some(path) = self.store.as_deref() else {
            return;
        };
        if let Err(e) = write_store(path, &self.entries) {
            tracing::warn!(path = %path.display(), "failed to persist dedup state: {e}");
        }
    }
}

fn write_store(path: &Path, entries: &BTreeMap<String, DedupEntry>) -> Result<(), DedupStoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let file = StoreFile {
        accounts: entries.clone(),
    };
    let content = serde_json::to_string_pretty(&file)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
