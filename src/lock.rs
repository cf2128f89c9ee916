//! Password gating for individual notes.
//!
//! A locked note stores only a digest remotely; whether the content may be
//! shown in *this* session is tracked in an ephemeral session store that
//! never leaves the device. The digest is a single fast unsalted hash: the
//! contract is equality gating as a light deterrent, not a security boundary.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::model::{Note, NoteId, NotePatch};
use crate::store::{RemoteStore, StoreResult};

const UNLOCKED_NOTES_KEY: &str = "scribe.unlocked-notes";

/// Device-scoped ephemeral key/value storage, cleared at session end.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

#[derive(Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.lock().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values.lock().remove(key);
    }
}

/// One-way transform applied identically when setting and verifying.
pub fn digest(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No password set; content is freely visible.
    Unprotected,
    /// Password set and not yet verified this session: content hidden,
    /// editing refused.
    Locked,
    /// Password set and verified this session.
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("incorrect password")]
    IncorrectPassword,
}

/// Session-scoped set of unlocked note ids, backed by the session store.
struct UnlockCache {
    session: Arc<dyn SessionStore>,
}

impl UnlockCache {
    fn ids(&self) -> Vec<NoteId> {
        let Some(raw) = self.session.get(UNLOCKED_NOTES_KEY) else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(?err, "resetting unreadable unlock cache entry");
                self.session.remove(UNLOCKED_NOTES_KEY);
                Vec::new()
            }
        }
    }

    fn write(&self, ids: &[NoteId]) {
        if ids.is_empty() {
            self.session.remove(UNLOCKED_NOTES_KEY);
            return;
        }
        match serde_json::to_string(ids) {
            Ok(raw) => self.session.set(UNLOCKED_NOTES_KEY, &raw),
            Err(err) => tracing::warn!(?err, "failed to serialize unlock cache"),
        }
    }

    fn contains(&self, note_id: NoteId) -> bool {
        self.ids().contains(&note_id)
    }

    fn insert(&self, note_id: NoteId) {
        let mut ids = self.ids();
        if !ids.contains(&note_id) {
            ids.push(note_id);
            self.write(&ids);
        }
    }

    fn remove(&self, note_id: NoteId) {
        let mut ids = self.ids();
        ids.retain(|id| *id != note_id);
        self.write(&ids);
    }
}

pub struct LockGate {
    cache: UnlockCache,
}

impl LockGate {
    pub fn new(session: Arc<dyn SessionStore>) -> Self {
        Self {
            cache: UnlockCache { session },
        }
    }

    pub fn state_for(&self, note: &Note) -> LockState {
        match &note.password_digest {
            None => LockState::Unprotected,
            Some(_) if self.cache.contains(note.id) => LockState::Unlocked,
            Some(_) => LockState::Locked,
        }
    }

    /// Whether the content may be rendered and edited right now.
    pub fn can_access(&self, note: &Note) -> bool {
        self.state_for(note) != LockState::Locked
    }

    /// Set a password on the note.
    ///
    /// Only the digest leaves the device. The setter already knows the
    /// plaintext, so the note is unlocked for this session immediately.
    pub fn set_password(
        &self,
        store: &dyn RemoteStore,
        note_id: NoteId,
        plaintext: &str,
    ) -> StoreResult<Note> {
        let note = store.save_note(note_id, &NotePatch::password_digest(Some(digest(plaintext))))?;
        self.cache.insert(note_id);
        Ok(note)
    }

    /// Clear the password, returning the note to `Unprotected`.
    pub fn remove_password(&self, store: &dyn RemoteStore, note_id: NoteId) -> StoreResult<Note> {
        let note = store.save_note(note_id, &NotePatch::password_digest(None))?;
        self.cache.remove(note_id);
        Ok(note)
    }

    /// Verify an unlock attempt against the stored digest.
    ///
    /// A match unlocks the note for the rest of the session; a mismatch
    /// leaves it locked and is not rate limited at this layer.
    pub fn unlock(&self, note: &Note, attempt: &str) -> Result<LockState, LockError> {
        let Some(stored) = &note.password_digest else {
            return Ok(LockState::Unprotected);
        };
        if digest(attempt) == *stored {
            self.cache.insert(note.id);
            Ok(LockState::Unlocked)
        } else {
            Err(LockError::IncorrectPassword)
        }
    }

    /// Drop the session's unlock for this note without touching the store.
    pub fn relock(&self, note_id: NoteId) {
        self.cache.remove(note_id);
    }
}
