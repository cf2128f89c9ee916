//! In-memory [`RemoteStore`] implementation.
//!
//! Behaves like the real backend as far as the engine can observe: quota
//! limits are enforced authoritatively, (note, tag) pairs stay unique, folder
//! deletion clears note references, and every committed write fans out a
//! change event to subscribers. Tests use it as the backend double, with
//! [`MemoryStore::fail_next_write`] for fault injection.

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::model::{
    Folder, FolderId, Note, NoteDraft, NoteFilter, NoteId, NotePatch, PlanTier, Profile, Tag, TagId,
};
use crate::quota::QuotaLimits;
use crate::store::{
    ChangeEvent, ChangeOp, EntityKind, EntityKinds, RemoteStore, ResourceKind, StoreError,
    StoreResult,
};

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    profile: Profile,
    notes: IndexMap<NoteId, Note>,
    folders: IndexMap<FolderId, Folder>,
    tags: IndexMap<TagId, Tag>,
    associations: IndexSet<(NoteId, TagId)>,
    subscribers: Vec<(EntityKinds, Sender<ChangeEvent>)>,
    fail_next_write: VecDeque<StoreError>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                profile: Profile {
                    display_name: "User".into(),
                    plan: PlanTier::Base,
                    storage_used_bytes: 0,
                },
                notes: IndexMap::new(),
                folders: IndexMap::new(),
                tags: IndexMap::new(),
                associations: IndexSet::new(),
                subscribers: Vec::new(),
                fail_next_write: VecDeque::new(),
            })),
        }
    }

    pub fn set_plan(&self, plan: PlanTier) {
        self.inner.lock().profile.plan = plan;
    }

    /// Queue an error to be returned by the next write operation instead of
    /// committing it. Reads are never affected.
    pub fn fail_next_write(&self, err: StoreError) {
        self.inner.lock().fail_next_write.push_back(err);
    }

}

impl Inner {
    fn take_injected(&mut self) -> StoreResult<()> {
        match self.fail_next_write.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn emit(&mut self, entity: EntityKind, op: ChangeOp, id: Uuid) {
        self.subscribers.retain(|(kinds, sender)| {
            if !kinds.covers(entity) {
                return true;
            }
            sender.send(ChangeEvent { entity, op, id }).is_ok()
        });
    }

    fn limits(&self) -> QuotaLimits {
        QuotaLimits::for_plan(self.profile.plan)
    }

    fn live_note_count(&self) -> u32 {
        self.notes.values().filter(|n| !n.is_trashed()).count() as u32
    }

    fn live_favorite_count(&self) -> u32 {
        self.notes
            .values()
            .filter(|n| !n.is_trashed() && n.favorited)
            .count() as u32
    }
}

impl RemoteStore for MemoryStore {
    fn load_profile(&self) -> StoreResult<Profile> {
        Ok(self.inner.lock().profile.clone())
    }

    fn load_notes(&self, filter: &NoteFilter) -> StoreResult<Vec<Note>> {
        let inner = self.inner.lock();
        let mut notes: Vec<Note> = inner
            .notes
            .values()
            .filter(|note| filter.matches(note))
            .cloned()
            .collect();
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(notes)
    }

    fn load_folders(&self) -> StoreResult<Vec<Folder>> {
        let inner = self.inner.lock();
        let mut folders: Vec<Folder> = inner.folders.values().cloned().collect();
        folders.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(folders)
    }

    fn load_tags(&self) -> StoreResult<Vec<Tag>> {
        let inner = self.inner.lock();
        let mut tags: Vec<Tag> = inner.tags.values().cloned().collect();
        tags.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(tags)
    }

    fn load_note_tags(&self, note_id: NoteId) -> StoreResult<Vec<Tag>> {
        let inner = self.inner.lock();
        if !inner.notes.contains_key(&note_id) {
            return Err(StoreError::NotFound(EntityKind::Note));
        }
        let mut tags: Vec<Tag> = inner
            .associations
            .iter()
            .filter(|(nid, _)| *nid == note_id)
            .filter_map(|(_, tid)| inner.tags.get(tid).cloned())
            .collect();
        tags.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(tags)
    }

    fn save_note(&self, id: NoteId, patch: &NotePatch) -> StoreResult<Note> {
        let mut inner = self.inner.lock();
        inner.take_injected()?;

        // Favoriting counts against its own limit, enforced here as well as
        // in the caller's snapshot check.
        if patch.favorited == Some(true) {
            let already = inner.notes.get(&id).map(|n| n.favorited).unwrap_or(false);
            let limit = inner.limits().favorites;
            if !already && inner.live_favorite_count() >= limit {
                return Err(StoreError::QuotaExceeded {
                    resource: ResourceKind::Favorites,
                    limit,
                });
            }
        }

        let touches_content = patch.title.is_some()
            || patch.body.is_some()
            || patch.folder_id.is_some()
            || patch.favorited.is_some()
            || patch.pinned.is_some()
            || patch.password_digest.is_some();

        let note = inner
            .notes
            .get_mut(&id)
            .filter(|note| !note.is_trashed())
            .ok_or(StoreError::NotFound(EntityKind::Note))?;
        patch.apply_to(note);
        if touches_content {
            note.updated_at = OffsetDateTime::now_utc();
        }
        let saved = note.clone();
        inner.emit(EntityKind::Note, ChangeOp::Update, id);
        Ok(saved)
    }

    fn insert_note(&self, draft: &NoteDraft) -> StoreResult<Note> {
        let mut inner = self.inner.lock();
        inner.take_injected()?;
        let limit = inner.limits().notes;
        if inner.live_note_count() >= limit {
            return Err(StoreError::QuotaExceeded {
                resource: ResourceKind::Notes,
                limit,
            });
        }
        if let Some(folder_id) = draft.folder_id {
            if !inner.folders.contains_key(&folder_id) {
                return Err(StoreError::NotFound(EntityKind::Folder));
            }
        }
        let now = OffsetDateTime::now_utc();
        let note = Note {
            id: Uuid::new_v4(),
            title: draft.title.clone(),
            body: draft.body.clone(),
            folder_id: draft.folder_id,
            favorited: false,
            pinned: false,
            deleted_at: None,
            last_viewed_at: None,
            password_digest: None,
            created_at: now,
            updated_at: now,
        };
        inner.notes.insert(note.id, note.clone());
        inner.emit(EntityKind::Note, ChangeOp::Insert, note.id);
        Ok(note)
    }

    fn soft_delete_note(&self, id: NoteId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.take_injected()?;
        let note = inner
            .notes
            .get_mut(&id)
            .filter(|note| !note.is_trashed())
            .ok_or(StoreError::NotFound(EntityKind::Note))?;
        note.deleted_at = Some(OffsetDateTime::now_utc());
        inner.emit(EntityKind::Note, ChangeOp::Update, id);
        Ok(())
    }

    fn restore_note(&self, id: NoteId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.take_injected()?;
        let note = inner
            .notes
            .get_mut(&id)
            .filter(|note| note.is_trashed())
            .ok_or(StoreError::NotFound(EntityKind::Note))?;
        note.deleted_at = None;
        inner.emit(EntityKind::Note, ChangeOp::Update, id);
        Ok(())
    }

    fn hard_delete_note(&self, id: NoteId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.take_injected()?;
        if inner.notes.shift_remove(&id).is_none() {
            return Err(StoreError::NotFound(EntityKind::Note));
        }
        inner.associations.retain(|(nid, _)| *nid != id);
        inner.emit(EntityKind::Note, ChangeOp::Delete, id);
        Ok(())
    }

    fn insert_folder(&self, name: &str) -> StoreResult<Folder> {
        let mut inner = self.inner.lock();
        inner.take_injected()?;
        let limit = inner.limits().folders;
        if inner.folders.len() as u32 >= limit {
            return Err(StoreError::QuotaExceeded {
                resource: ResourceKind::Folders,
                limit,
            });
        }
        let folder = Folder {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        inner.folders.insert(folder.id, folder.clone());
        inner.emit(EntityKind::Folder, ChangeOp::Insert, folder.id);
        Ok(folder)
    }

    fn delete_folder(&self, id: FolderId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.take_injected()?;
        if inner.folders.shift_remove(&id).is_none() {
            return Err(StoreError::NotFound(EntityKind::Folder));
        }
        // Folder references are weak: clear them instead of cascading.
        let orphaned: Vec<NoteId> = inner
            .notes
            .values_mut()
            .filter(|note| note.folder_id == Some(id))
            .map(|note| {
                note.folder_id = None;
                note.id
            })
            .collect();
        inner.emit(EntityKind::Folder, ChangeOp::Delete, id);
        for note_id in orphaned {
            inner.emit(EntityKind::Note, ChangeOp::Update, note_id);
        }
        Ok(())
    }

    fn insert_tag(&self, name: &str, color: &str) -> StoreResult<Tag> {
        let mut inner = self.inner.lock();
        inner.take_injected()?;
        let limit = inner.limits().tags;
        if inner.tags.len() as u32 >= limit {
            return Err(StoreError::QuotaExceeded {
                resource: ResourceKind::Tags,
                limit,
            });
        }
        if inner
            .tags
            .values()
            .any(|tag| tag.name.eq_ignore_ascii_case(name))
        {
            return Err(StoreError::Conflict(format!("tag '{name}' already exists")));
        }
        let tag = Tag {
            id: Uuid::new_v4(),
            name: name.to_string(),
            color: color.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        inner.tags.insert(tag.id, tag.clone());
        inner.emit(EntityKind::Tag, ChangeOp::Insert, tag.id);
        Ok(tag)
    }

    fn add_note_tag(&self, note_id: NoteId, tag_id: TagId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.take_injected()?;
        if !inner.notes.contains_key(&note_id) {
            return Err(StoreError::NotFound(EntityKind::Note));
        }
        if !inner.tags.contains_key(&tag_id) {
            return Err(StoreError::NotFound(EntityKind::Tag));
        }
        // The pair is unique; re-adding is a no-op rather than an error.
        if inner.associations.insert((note_id, tag_id)) {
            inner.emit(EntityKind::Note, ChangeOp::Update, note_id);
        }
        Ok(())
    }

    fn remove_note_tag(&self, note_id: NoteId, tag_id: TagId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.take_injected()?;
        if !inner.associations.shift_remove(&(note_id, tag_id)) {
            return Err(StoreError::NotFound(EntityKind::Tag));
        }
        inner.emit(EntityKind::Note, ChangeOp::Update, note_id);
        Ok(())
    }

    /// Recounts bytes held by live note titles and bodies.
    fn recalculate_storage(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.profile.storage_used_bytes = inner
            .notes
            .values()
            .filter(|note| !note.is_trashed())
            .map(|note| (note.title.len() + note.body.len()) as u64)
            .sum();
        Ok(())
    }

    fn subscribe(&self, kinds: EntityKinds) -> Receiver<ChangeEvent> {
        let (sender, receiver) = unbounded();
        self.inner.lock().subscribers.push((kinds, sender));
        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn store_with_note(title: &str) -> (MemoryStore, Note) {
        let store = MemoryStore::new();
        let note = store
            .insert_note(&NoteDraft::titled(title))
            .expect("insert note");
        (store, note)
    }

    #[test]
    fn soft_delete_moves_note_between_views() {
        let (store, note) = store_with_note("Groceries");
        store.soft_delete_note(note.id).unwrap();

        let active = store.load_notes(&NoteFilter::active()).unwrap();
        assert!(active.is_empty());
        let trash = store.load_notes(&NoteFilter::trash()).unwrap();
        assert_eq!(trash.len(), 1);
        assert_eq!(trash[0].id, note.id);

        store.restore_note(note.id).unwrap();
        assert_eq!(store.load_notes(&NoteFilter::active()).unwrap().len(), 1);
        assert!(store.load_notes(&NoteFilter::trash()).unwrap().is_empty());
    }

    #[test]
    fn hard_delete_removes_note_and_associations() {
        let (store, note) = store_with_note("Disposable");
        let tag = store.insert_tag("alpha", "#ff0000").unwrap();
        store.add_note_tag(note.id, tag.id).unwrap();

        store.hard_delete_note(note.id).unwrap();
        assert!(store.load_notes(&NoteFilter::active()).unwrap().is_empty());
        assert!(store.load_notes(&NoteFilter::trash()).unwrap().is_empty());
        assert_matches!(
            store.load_note_tags(note.id),
            Err(StoreError::NotFound(EntityKind::Note))
        );
    }

    #[test]
    fn saving_trashed_note_reports_not_found() {
        let (store, note) = store_with_note("Gone");
        store.soft_delete_note(note.id).unwrap();
        assert_matches!(
            store.save_note(note.id, &NotePatch::content("x", "y")),
            Err(StoreError::NotFound(EntityKind::Note))
        );
    }

    #[test]
    fn note_quota_enforced_at_store() {
        let store = MemoryStore::new();
        for i in 0..100 {
            store.insert_note(&NoteDraft::titled(format!("n{i}"))).unwrap();
        }
        assert_matches!(
            store.insert_note(&NoteDraft::titled("overflow")),
            Err(StoreError::QuotaExceeded {
                resource: ResourceKind::Notes,
                limit: 100
            })
        );

        store.set_plan(PlanTier::Premium);
        assert!(store.insert_note(&NoteDraft::titled("premium")).is_ok());
    }

    #[test]
    fn favorite_quota_counts_live_notes_only() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for i in 0..11 {
            let note = store.insert_note(&NoteDraft::titled(format!("n{i}"))).unwrap();
            ids.push(note.id);
        }
        for id in ids.iter().take(10) {
            store.save_note(*id, &NotePatch::favorited(true)).unwrap();
        }
        assert_matches!(
            store.save_note(ids[10], &NotePatch::favorited(true)),
            Err(StoreError::QuotaExceeded {
                resource: ResourceKind::Favorites,
                ..
            })
        );

        // Trashing a favorite frees a slot.
        store.soft_delete_note(ids[0]).unwrap();
        assert!(store.save_note(ids[10], &NotePatch::favorited(true)).is_ok());
    }

    #[test]
    fn duplicate_association_is_idempotent() {
        let (store, note) = store_with_note("Tagged");
        let tag = store.insert_tag("work", "#00ff00").unwrap();
        store.add_note_tag(note.id, tag.id).unwrap();
        store.add_note_tag(note.id, tag.id).unwrap();
        assert_eq!(store.load_note_tags(note.id).unwrap().len(), 1);
    }

    #[test]
    fn deleting_folder_clears_note_references() {
        let store = MemoryStore::new();
        let folder = store.insert_folder("Projects").unwrap();
        let note = store
            .insert_note(&NoteDraft {
                title: "In folder".into(),
                body: String::new(),
                folder_id: Some(folder.id),
            })
            .unwrap();

        store.delete_folder(folder.id).unwrap();
        let notes = store.load_notes(&NoteFilter::active()).unwrap();
        assert_eq!(notes[0].id, note.id);
        assert_eq!(notes[0].folder_id, None);
    }

    #[test]
    fn change_events_respect_subscription_mask() {
        let store = MemoryStore::new();
        let notes_only = store.subscribe(EntityKinds::NOTES);
        let all = store.subscribe(EntityKinds::all());

        store.insert_folder("Inbox").unwrap();
        store.insert_note(&NoteDraft::titled("Hello")).unwrap();

        let events: Vec<ChangeEvent> = notes_only.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity, EntityKind::Note);
        assert_eq!(events[0].op, ChangeOp::Insert);

        assert_eq!(all.try_iter().count(), 2);
    }

    #[test]
    fn injected_failure_hits_next_write_only() {
        let (store, note) = store_with_note("Flaky");
        store.fail_next_write(StoreError::Transient("offline".into()));

        // Reads pass through.
        assert!(store.load_notes(&NoteFilter::active()).is_ok());

        assert_matches!(
            store.save_note(note.id, &NotePatch::content("t", "b")),
            Err(StoreError::Transient(_))
        );
        // Consumed: the retry goes through.
        assert!(store.save_note(note.id, &NotePatch::content("t", "b")).is_ok());
    }

    #[test]
    fn storage_recalculation_counts_live_bytes() {
        let store = MemoryStore::new();
        let note = store
            .insert_note(&NoteDraft {
                title: "ab".into(),
                body: "cdef".into(),
                folder_id: None,
            })
            .unwrap();
        store.recalculate_storage().unwrap();
        assert_eq!(store.load_profile().unwrap().storage_used_bytes, 6);

        store.soft_delete_note(note.id).unwrap();
        store.recalculate_storage().unwrap();
        assert_eq!(store.load_profile().unwrap().storage_used_bytes, 0);
    }
}
