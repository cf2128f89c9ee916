//! The remote store contract.
//!
//! Everything the engine knows about the backend goes through [`RemoteStore`]:
//! synchronous-looking calls that may fail with a typed [`StoreError`], plus a
//! change feed delivered over a channel. The wire protocol is the store
//! implementation's business.

use crossbeam_channel::Receiver;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    Folder, FolderId, Note, NoteDraft, NoteFilter, NoteId, NotePatch, Profile, Tag, TagId,
};

pub mod memory;

pub use memory::MemoryStore;

/// Quota-limited resource classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ResourceKind {
    Notes,
    Folders,
    Favorites,
    Tags,
}

/// Entity classes covered by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum EntityKind {
    Note,
    Folder,
    Tag,
}

bitflags::bitflags! {
    /// Subscription mask for [`RemoteStore::subscribe`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntityKinds: u8 {
        const NOTES = 1 << 0;
        const FOLDERS = 1 << 1;
        const TAGS = 1 << 2;
    }
}

impl EntityKinds {
    pub fn covers(self, entity: EntityKind) -> bool {
        match entity {
            EntityKind::Note => self.contains(EntityKinds::NOTES),
            EntityKind::Folder => self.contains(EntityKinds::FOLDERS),
            EntityKind::Tag => self.contains(EntityKinds::TAGS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A change-feed notification.
///
/// The id identifies which row changed but carries no row data; consumers
/// reload rather than patch, so a lying or lagging payload cannot corrupt
/// local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub entity: EntityKind,
    pub op: ChangeOp,
    pub id: Uuid,
}

/// Failure classes every store call can produce.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Transient(String),

    #[error("{resource} limit reached ({limit})")]
    QuotaExceeded { resource: ResourceKind, limit: u32 },

    #[error("{0} not found")]
    NotFound(EntityKind),

    #[error("session expired")]
    Unauthorized,

    #[error("conflicting update: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Abstract backend consumed by the engine.
///
/// Calls follow FIFO-per-entity ordering at the store; concurrent writers to
/// the same note are last-write-wins. Implementations must enforce quotas and
/// the (note, tag) pair uniqueness authoritatively even though callers check
/// first.
pub trait RemoteStore: Send + Sync {
    fn load_profile(&self) -> StoreResult<Profile>;

    fn load_notes(&self, filter: &NoteFilter) -> StoreResult<Vec<Note>>;

    fn load_folders(&self) -> StoreResult<Vec<Folder>>;

    fn load_tags(&self) -> StoreResult<Vec<Tag>>;

    /// Tags currently associated with one note.
    fn load_note_tags(&self, note_id: NoteId) -> StoreResult<Vec<Tag>>;

    fn save_note(&self, id: NoteId, patch: &NotePatch) -> StoreResult<Note>;

    fn insert_note(&self, draft: &NoteDraft) -> StoreResult<Note>;

    fn soft_delete_note(&self, id: NoteId) -> StoreResult<()>;

    fn restore_note(&self, id: NoteId) -> StoreResult<()>;

    fn hard_delete_note(&self, id: NoteId) -> StoreResult<()>;

    fn insert_folder(&self, name: &str) -> StoreResult<Folder>;

    fn delete_folder(&self, id: FolderId) -> StoreResult<()>;

    fn insert_tag(&self, name: &str, color: &str) -> StoreResult<Tag>;

    fn add_note_tag(&self, note_id: NoteId, tag_id: TagId) -> StoreResult<()>;

    fn remove_note_tag(&self, note_id: NoteId, tag_id: TagId) -> StoreResult<()>;

    /// Ask the backend to recount the account's storage usage.
    ///
    /// Best-effort bookkeeping after content writes; backends without the
    /// hook accept and ignore it.
    fn recalculate_storage(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Subscribe to change notifications for the given entity classes.
    ///
    /// Events arrive on the returned channel until the store is dropped.
    fn subscribe(&self, kinds: EntityKinds) -> Receiver<ChangeEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_error_names_resource_and_limit() {
        let err = StoreError::QuotaExceeded {
            resource: ResourceKind::Folders,
            limit: 10,
        };
        assert_eq!(err.to_string(), "folders limit reached (10)");
    }

    #[test]
    fn subscription_mask_covers_selected_kinds() {
        let kinds = EntityKinds::NOTES | EntityKinds::TAGS;
        assert!(kinds.covers(EntityKind::Note));
        assert!(kinds.covers(EntityKind::Tag));
        assert!(!kinds.covers(EntityKind::Folder));
    }
}
