//! The composition root: one account's live view of the note space.
//!
//! A [`Workspace`] wires the reconciler, autosave runtime, lock gate and
//! association state to a remote store, and drives them from a cooperative
//! tick the host calls from its event loop. UI events come in as method
//! calls; every failure is returned at the call site that triggered it and
//! leaves prior state intact.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::autosave::{AutosaveEvent, AutosaveRuntime, AutosaveStatus, EditField, FlushOutcome, FlushRequest};
use crate::config::EngineConfig;
use crate::feed::Reconciler;
use crate::lock::{LockError, LockGate, LockState, SessionStore};
use crate::model::{
    Folder, FolderId, Note, NoteDraft, NoteFilter, NoteId, NotePatch, Profile, Tag, TagId,
};
use crate::quota::QuotaSnapshot;
use crate::store::{EntityKind, EntityKinds, RemoteStore, ResourceKind, StoreError, StoreResult};
use crate::tags::{self, CreateTagOutcome, NoteTagSet};

/// Result of `open_note`: either an edit session started, or the note is
/// password-gated and the host must prompt before any content is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    Unlocked,
    /// Attempt rejected; the note stays hidden. Not rate limited here.
    Incorrect,
}

pub struct Workspace {
    store: Arc<dyn RemoteStore>,
    reconciler: Reconciler,
    autosave: AutosaveRuntime,
    autosave_enabled: bool,
    lock: LockGate,
    profile: Profile,
    open_tags: Option<NoteTagSet>,
}

impl Workspace {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        session: Arc<dyn SessionStore>,
        config: &EngineConfig,
    ) -> StoreResult<Self> {
        let events = store.subscribe(EntityKinds::all());
        let mut reconciler = Reconciler::new(events, NoteFilter::active());
        reconciler.pump(store.as_ref())?;
        let profile = store.load_profile()?;
        Ok(Self {
            autosave: AutosaveRuntime::new(config.autosave.debounce_duration()),
            autosave_enabled: config.autosave.enabled,
            lock: LockGate::new(session),
            reconciler,
            profile,
            store,
            open_tags: None,
        })
    }

    /// One turn of the cooperative loop: flush due autosaves, then absorb
    /// remote changes.
    ///
    /// An autosave failure is not an error here; it lands in the status
    /// surface and the dirty flag keeps the edits safe.
    pub fn tick(&mut self) -> StoreResult<()> {
        if self.autosave_enabled {
            if let Some(request) = self.autosave.poll() {
                if let Some(AutosaveEvent::Failed { note_id, error }) = self.send_flush(request) {
                    tracing::warn!(%note_id, %error, "autosave flush failed");
                }
            }
        }
        self.reconciler.pump(self.store.as_ref())?;
        Ok(())
    }

    // ---- lists & selection -------------------------------------------------

    pub fn notes(&self) -> &[Note] {
        self.reconciler.notes()
    }

    pub fn folders(&self) -> &[Folder] {
        self.reconciler.folders()
    }

    pub fn tags(&self) -> &[Tag] {
        self.reconciler.tags()
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn reload_profile(&mut self) -> StoreResult<&Profile> {
        self.profile = self.store.load_profile()?;
        Ok(&self.profile)
    }

    pub fn selected_note_id(&self) -> Option<NoteId> {
        self.reconciler.selected_note()
    }

    pub fn set_filter(&mut self, filter: NoteFilter) -> StoreResult<()> {
        self.reconciler.set_filter(filter);
        self.reconciler.pump(self.store.as_ref())?;
        Ok(())
    }

    pub fn toggle_folder_expanded(&mut self, folder_id: FolderId) {
        self.reconciler.toggle_folder_expanded(folder_id);
    }

    pub fn is_folder_expanded(&self, folder_id: FolderId) -> bool {
        self.reconciler.is_folder_expanded(folder_id)
    }

    pub fn quota(&self) -> StoreResult<QuotaSnapshot> {
        QuotaSnapshot::collect(self.store.as_ref())
    }

    // ---- open document -----------------------------------------------------

    /// Open a note from the current list for viewing and editing.
    ///
    /// Flushes and closes the previous session first; when that final flush
    /// fails the switch is refused and the previous session stays open with
    /// its edits intact.
    pub fn open_note(&mut self, id: NoteId) -> StoreResult<OpenOutcome> {
        let note = self
            .reconciler
            .note(id)
            .cloned()
            .ok_or(StoreError::NotFound(EntityKind::Note))?;
        self.close_note()?;
        self.reconciler.select(Some(id));
        if !self.lock.can_access(&note) {
            return Ok(OpenOutcome::Locked);
        }
        self.begin_session(note)
    }

    /// Flush and destroy the current edit session, if any.
    pub fn close_note(&mut self) -> StoreResult<()> {
        if self.autosave.has_dirty_changes() {
            if let Some(request) = self.autosave.flush_now() {
                if let Some(AutosaveEvent::Failed { error, .. }) = self.send_flush(request) {
                    return Err(error);
                }
            }
        }
        if let Some(request) = self.autosave.close() {
            // Final burst issued while a flush was in flight; send it anyway,
            // its completion has no session left to touch.
            self.send_flush(request);
        }
        self.open_tags = None;
        Ok(())
    }

    /// Submit a password attempt for a locked note and open it on success.
    pub fn unlock_note(&mut self, id: NoteId, attempt: &str) -> StoreResult<UnlockOutcome> {
        let note = self
            .reconciler
            .note(id)
            .cloned()
            .ok_or(StoreError::NotFound(EntityKind::Note))?;
        match self.lock.unlock(&note, attempt) {
            Ok(_) => {
                self.close_note()?;
                self.reconciler.select(Some(id));
                self.begin_session(note)?;
                Ok(UnlockOutcome::Unlocked)
            }
            Err(LockError::IncorrectPassword) => Ok(UnlockOutcome::Incorrect),
        }
    }

    pub fn edit(&mut self, field: EditField, value: &str) -> bool {
        self.autosave.edit(field, value)
    }

    /// Manual save of the open document, bypassing the debounce.
    ///
    /// Returns false when there was nothing to save.
    pub fn save_now(&mut self) -> StoreResult<bool> {
        let Some(request) = self.autosave.flush_now() else {
            return Ok(false);
        };
        match self.send_flush(request) {
            Some(AutosaveEvent::Saved { .. }) => Ok(true),
            Some(AutosaveEvent::Failed { error, .. }) => Err(error),
            None => Ok(false),
        }
    }

    pub fn autosave_status(&self) -> AutosaveStatus {
        self.autosave.status()
    }

    pub fn open_note_id(&self) -> Option<NoteId> {
        self.autosave.open_note_id()
    }

    pub fn working_title(&self) -> Option<&str> {
        self.autosave.working_title()
    }

    pub fn working_body(&self) -> Option<&str> {
        self.autosave.working_body()
    }

    pub fn open_note_tags(&self) -> &[Tag] {
        self.open_tags
            .as_ref()
            .map(|set| set.tags())
            .unwrap_or(&[])
    }

    // ---- note lifecycle ----------------------------------------------------

    /// Create a note after a fresh local quota check.
    ///
    /// The check is best-effort; a concurrent session can still win the last
    /// slot, in which case the store's own `QuotaExceeded` comes back here.
    pub fn create_note(&mut self, draft: &NoteDraft) -> StoreResult<Note> {
        self.quota()?.check(ResourceKind::Notes)?;
        let note = self.store.insert_note(draft)?;
        self.reconciler.pump(self.store.as_ref())?;
        self.reconciler.select(Some(note.id));
        Ok(note)
    }

    pub fn soft_delete_note(&mut self, id: NoteId) -> StoreResult<()> {
        self.drop_session_for(id);
        self.store.soft_delete_note(id)?;
        self.reconciler.clear_selection_if(id);
        self.reconciler.pump(self.store.as_ref())?;
        Ok(())
    }

    pub fn restore_note(&mut self, id: NoteId) -> StoreResult<()> {
        self.store.restore_note(id)?;
        self.reconciler.pump(self.store.as_ref())?;
        Ok(())
    }

    pub fn hard_delete_note(&mut self, id: NoteId) -> StoreResult<()> {
        self.drop_session_for(id);
        self.store.hard_delete_note(id)?;
        self.reconciler.clear_selection_if(id);
        self.reconciler.pump(self.store.as_ref())?;
        Ok(())
    }

    /// Favoriting counts against its own quota; unfavoriting never does.
    pub fn set_favorited(&mut self, id: NoteId, favorited: bool) -> StoreResult<()> {
        if favorited {
            self.quota()?.check(ResourceKind::Favorites)?;
        }
        self.store.save_note(id, &NotePatch::favorited(favorited))?;
        self.reconciler.pump(self.store.as_ref())?;
        Ok(())
    }

    pub fn set_pinned(&mut self, id: NoteId, pinned: bool) -> StoreResult<()> {
        self.store.save_note(id, &NotePatch::pinned(pinned))?;
        self.reconciler.pump(self.store.as_ref())?;
        Ok(())
    }

    pub fn move_note_to_folder(
        &mut self,
        id: NoteId,
        folder_id: Option<FolderId>,
    ) -> StoreResult<()> {
        tags::move_to_folder(self.store.as_ref(), id, folder_id)?;
        self.reconciler.pump(self.store.as_ref())?;
        Ok(())
    }

    // ---- folders -----------------------------------------------------------

    pub fn create_folder(&mut self, name: &str) -> StoreResult<Folder> {
        self.quota()?.check(ResourceKind::Folders)?;
        let folder = self.store.insert_folder(name)?;
        self.reconciler.pump(self.store.as_ref())?;
        Ok(folder)
    }

    pub fn delete_folder(&mut self, id: FolderId) -> StoreResult<()> {
        self.store.delete_folder(id)?;
        self.reconciler.pump(self.store.as_ref())?;
        Ok(())
    }

    // ---- tags --------------------------------------------------------------

    pub fn create_tag(&mut self, name: &str, color: &str) -> StoreResult<Tag> {
        let snapshot = self.quota()?;
        let tag = tags::create_tag(self.store.as_ref(), &snapshot, name, color)?;
        self.reconciler.pump(self.store.as_ref())?;
        Ok(tag)
    }

    /// Create a tag and attach it to the open note in one gesture.
    pub fn create_tag_for_open_note(
        &mut self,
        name: &str,
        color: &str,
    ) -> StoreResult<CreateTagOutcome> {
        let snapshot = self.quota()?;
        let store = Arc::clone(&self.store);
        let Some(set) = self.open_tags.as_mut() else {
            let tag = tags::create_tag(store.as_ref(), &snapshot, name, color)?;
            self.reconciler.pump(store.as_ref())?;
            return Ok(CreateTagOutcome::Created(tag));
        };
        let outcome = set.create_and_attach(store.as_ref(), &snapshot, name, color)?;
        self.reconciler.pump(self.store.as_ref())?;
        Ok(outcome)
    }

    pub fn add_tag_to_open_note(&mut self, tag: &Tag) -> StoreResult<()> {
        let store = Arc::clone(&self.store);
        let Some(set) = self.open_tags.as_mut() else {
            tracing::debug!(tag = %tag.name, "no open note to tag");
            return Ok(());
        };
        set.add_tag(store.as_ref(), tag)
    }

    pub fn remove_tag_from_open_note(&mut self, tag_id: TagId) -> StoreResult<()> {
        let store = Arc::clone(&self.store);
        let Some(set) = self.open_tags.as_mut() else {
            return Ok(());
        };
        set.remove_tag(store.as_ref(), tag_id)
    }

    // ---- lock gate ---------------------------------------------------------

    pub fn lock_state(&self, id: NoteId) -> Option<LockState> {
        self.reconciler.note(id).map(|note| self.lock.state_for(note))
    }

    pub fn set_note_password(&mut self, id: NoteId, plaintext: &str) -> StoreResult<()> {
        self.lock.set_password(self.store.as_ref(), id, plaintext)?;
        self.reconciler.pump(self.store.as_ref())?;
        Ok(())
    }

    pub fn remove_note_password(&mut self, id: NoteId) -> StoreResult<()> {
        self.lock.remove_password(self.store.as_ref(), id)?;
        self.reconciler.pump(self.store.as_ref())?;
        Ok(())
    }

    /// Hide the note again for this session without touching the store.
    ///
    /// If the note is open, it is flushed and closed first; a failed flush
    /// refuses the relock so no edits are lost.
    pub fn relock_note(&mut self, id: NoteId) -> StoreResult<()> {
        if self.autosave.open_note_id() == Some(id) {
            self.close_note()?;
        }
        self.lock.relock(id);
        Ok(())
    }

    // ---- internals ---------------------------------------------------------

    fn begin_session(&mut self, note: Note) -> StoreResult<OpenOutcome> {
        match NoteTagSet::load(self.store.as_ref(), note.id) {
            Ok(set) => self.open_tags = Some(set),
            Err(StoreError::NotFound(_)) => {
                // Vanished remotely between reload and open: drop it.
                self.reconciler.clear_selection_if(note.id);
                return Err(StoreError::NotFound(EntityKind::Note));
            }
            Err(err) => return Err(err),
        }
        if let Some(request) = self.autosave.open(&note) {
            // Leftover final burst from a session the caller did not close;
            // persist it, the completion has no session to touch.
            self.send_flush(request);
        }

        // Bookkeeping only; failure to record the view is not a failure to
        // open the note.
        let viewed = NotePatch {
            last_viewed_at: Some(OffsetDateTime::now_utc()),
            ..NotePatch::default()
        };
        if let Err(err) = self.store.save_note(note.id, &viewed) {
            tracing::debug!(%err, note_id = %note.id, "failed to record last-viewed time");
        }
        Ok(OpenOutcome::Opened)
    }

    fn send_flush(&mut self, request: FlushRequest) -> Option<AutosaveEvent> {
        let outcome = match self.store.save_note(request.note_id, &request.patch()) {
            Ok(note) => {
                if let Err(err) = self.store.recalculate_storage() {
                    tracing::debug!(%err, "storage recount failed");
                }
                FlushOutcome::Saved {
                    at: note.updated_at,
                }
            }
            Err(err) => FlushOutcome::Failed(err),
        };
        self.autosave.complete(&request, outcome)
    }

    /// Tear down the open session without flushing; used when the note's
    /// content is being deleted anyway.
    fn drop_session_for(&mut self, id: NoteId) {
        if self.autosave.open_note_id() == Some(id) {
            let _ = self.autosave.close();
            self.open_tags = None;
        }
    }
}
