//! Tag and folder associations for the open note.
//!
//! [`NoteTagSet`] holds its own copy of one note's tag list and mutates it
//! optimistically: apply locally, issue the remote call, roll back on
//! failure. The reconciler's lists are never touched from here; the next
//! change-feed reload converges them.

use crate::model::{FolderId, Note, NoteId, NotePatch, Tag, TagId};
use crate::quota::QuotaSnapshot;
use crate::store::{RemoteStore, ResourceKind, StoreError, StoreResult};

/// Result of creating a tag from within a note's tag context.
#[derive(Debug)]
pub enum CreateTagOutcome {
    /// Tag created and attached to the note.
    Created(Tag),
    /// Tag created, but attaching it failed. The tag exists untagged on the
    /// account; recoverable by attaching again later.
    CreatedDetached { tag: Tag, attach_error: StoreError },
}

impl CreateTagOutcome {
    pub fn tag(&self) -> &Tag {
        match self {
            CreateTagOutcome::Created(tag) => tag,
            CreateTagOutcome::CreatedDetached { tag, .. } => tag,
        }
    }
}

/// Optimistic view of one note's tags.
#[derive(Debug, Clone)]
pub struct NoteTagSet {
    note_id: NoteId,
    tags: Vec<Tag>,
}

impl NoteTagSet {
    pub fn load(store: &dyn RemoteStore, note_id: NoteId) -> StoreResult<Self> {
        let tags = store.load_note_tags(note_id)?;
        Ok(Self { note_id, tags })
    }

    pub fn empty(note_id: NoteId) -> Self {
        Self {
            note_id,
            tags: Vec::new(),
        }
    }

    pub fn note_id(&self) -> NoteId {
        self.note_id
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn contains(&self, tag_id: TagId) -> bool {
        self.tags.iter().any(|tag| tag.id == tag_id)
    }

    /// Attach `tag`, optimistically first.
    pub fn add_tag(&mut self, store: &dyn RemoteStore, tag: &Tag) -> StoreResult<()> {
        if self.contains(tag.id) {
            return Ok(());
        }
        self.tags.push(tag.clone());
        if let Err(err) = store.add_note_tag(self.note_id, tag.id) {
            self.tags.retain(|t| t.id != tag.id);
            return Err(err);
        }
        Ok(())
    }

    /// Detach the tag, optimistically first; a failure restores it in place.
    pub fn remove_tag(&mut self, store: &dyn RemoteStore, tag_id: TagId) -> StoreResult<()> {
        let Some(position) = self.tags.iter().position(|tag| tag.id == tag_id) else {
            return Ok(());
        };
        let removed = self.tags.remove(position);
        if let Err(err) = store.remove_note_tag(self.note_id, tag_id) {
            self.tags.insert(position, removed);
            return Err(err);
        }
        Ok(())
    }

    /// Create a tag and chain an attach for this note.
    ///
    /// The creation is quota-checked against `snapshot` before any remote
    /// write, and must complete before the attach is attempted. The two are
    /// not atomic at the store: an attach failure leaves the new tag on the
    /// account, reported as [`CreateTagOutcome::CreatedDetached`].
    pub fn create_and_attach(
        &mut self,
        store: &dyn RemoteStore,
        snapshot: &QuotaSnapshot,
        name: &str,
        color: &str,
    ) -> StoreResult<CreateTagOutcome> {
        let tag = create_tag(store, snapshot, name, color)?;
        match self.add_tag(store, &tag) {
            Ok(()) => Ok(CreateTagOutcome::Created(tag)),
            Err(attach_error) => {
                tracing::warn!(
                    tag = %tag.name,
                    note_id = %self.note_id,
                    %attach_error,
                    "tag created but could not be attached"
                );
                Ok(CreateTagOutcome::CreatedDetached { tag, attach_error })
            }
        }
    }
}

/// Create a standalone tag after a local quota check.
pub fn create_tag(
    store: &dyn RemoteStore,
    snapshot: &QuotaSnapshot,
    name: &str,
    color: &str,
) -> StoreResult<Tag> {
    snapshot.check(ResourceKind::Tags)?;
    store.insert_tag(name, color)
}

/// Move the note into `folder_id`, or out of any folder with `None`.
pub fn move_to_folder(
    store: &dyn RemoteStore,
    note_id: NoteId,
    folder_id: Option<FolderId>,
) -> StoreResult<Note> {
    store.save_note(note_id, &NotePatch::folder(folder_id))
}
