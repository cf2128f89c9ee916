//! Change feed reconciliation.
//!
//! The reconciler owns the three account-scoped lists (notes, folders, tags)
//! and is the sole consumer of the store's change feed. Notifications carry
//! no trusted payload, so any event just marks the matching list stale and
//! the next pump reloads it wholesale; bandwidth is traded for correctness
//! under concurrent multi-client edits.
//!
//! Reloads can complete out of order. Each issued reload gets a ticket with a
//! monotonically increasing sequence number, and a result is installed only
//! when its ticket is still the most recently issued one for that list.

use crossbeam_channel::Receiver;
use indexmap::IndexSet;

use crate::model::{Folder, FolderId, Note, NoteFilter, NoteId, Tag};
use crate::store::{ChangeEvent, EntityKind, EntityKinds, RemoteStore, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Notes,
    Folders,
    Tags,
}

impl From<EntityKind> for ListKind {
    fn from(entity: EntityKind) -> Self {
        match entity {
            EntityKind::Note => ListKind::Notes,
            EntityKind::Folder => ListKind::Folders,
            EntityKind::Tag => ListKind::Tags,
        }
    }
}

/// Proof that a reload was issued; required to apply its result.
#[derive(Debug, Clone, Copy)]
pub struct ReloadTicket {
    list: ListKind,
    seq: u64,
}

pub struct Reconciler {
    events: Receiver<ChangeEvent>,
    filter: NoteFilter,
    notes: Vec<Note>,
    folders: Vec<Folder>,
    tags: Vec<Tag>,
    selected_note: Option<NoteId>,
    expanded_folders: IndexSet<FolderId>,
    stale: EntityKinds,
    issued_notes: u64,
    issued_folders: u64,
    issued_tags: u64,
}

impl Reconciler {
    pub fn new(events: Receiver<ChangeEvent>, filter: NoteFilter) -> Self {
        Self {
            events,
            filter,
            notes: Vec::new(),
            folders: Vec::new(),
            tags: Vec::new(),
            selected_note: None,
            expanded_folders: IndexSet::new(),
            // Everything is stale until the first pump populates it.
            stale: EntityKinds::all(),
            issued_notes: 0,
            issued_folders: 0,
            issued_tags: 0,
        }
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn folders(&self) -> &[Folder] {
        &self.folders
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn note(&self, id: NoteId) -> Option<&Note> {
        self.notes.iter().find(|note| note.id == id)
    }

    pub fn filter(&self) -> &NoteFilter {
        &self.filter
    }

    /// Switch the notes list to a different view or search; forces a reload.
    pub fn set_filter(&mut self, filter: NoteFilter) {
        self.filter = filter;
        self.stale |= EntityKinds::NOTES;
    }

    pub fn selected_note(&self) -> Option<NoteId> {
        self.selected_note
    }

    pub fn select(&mut self, note_id: Option<NoteId>) {
        self.selected_note = note_id;
    }

    /// Drop the selection (used when the selected entity vanished remotely).
    pub fn clear_selection_if(&mut self, note_id: NoteId) {
        if self.selected_note == Some(note_id) {
            self.selected_note = None;
        }
    }

    pub fn toggle_folder_expanded(&mut self, folder_id: FolderId) {
        if !self.expanded_folders.shift_remove(&folder_id) {
            self.expanded_folders.insert(folder_id);
        }
    }

    pub fn is_folder_expanded(&self, folder_id: FolderId) -> bool {
        self.expanded_folders.contains(&folder_id)
    }

    /// Drain pending change events, marking affected lists stale.
    ///
    /// Returns the set of lists that now need a reload.
    pub fn drain_events(&mut self) -> EntityKinds {
        for event in self.events.try_iter() {
            let mark = match event.entity {
                EntityKind::Note => EntityKinds::NOTES,
                EntityKind::Folder => EntityKinds::FOLDERS,
                EntityKind::Tag => EntityKinds::TAGS,
            };
            self.stale |= mark;
        }
        self.stale
    }

    pub fn begin_reload(&mut self, list: ListKind) -> ReloadTicket {
        let seq = match list {
            ListKind::Notes => {
                self.issued_notes += 1;
                self.issued_notes
            }
            ListKind::Folders => {
                self.issued_folders += 1;
                self.issued_folders
            }
            ListKind::Tags => {
                self.issued_tags += 1;
                self.issued_tags
            }
        };
        ReloadTicket { list, seq }
    }

    /// Install a notes reload; returns false when the ticket was superseded
    /// by a later reload and the result is discarded.
    pub fn apply_notes(&mut self, ticket: ReloadTicket, mut notes: Vec<Note>) -> bool {
        debug_assert_eq!(ticket.list, ListKind::Notes);
        if ticket.seq != self.issued_notes {
            tracing::debug!(
                seq = ticket.seq,
                latest = self.issued_notes,
                "discarding superseded notes reload"
            );
            return false;
        }
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        self.notes = notes;
        self.stale -= EntityKinds::NOTES;
        if let Some(selected) = self.selected_note {
            if !self.notes.iter().any(|note| note.id == selected) {
                self.selected_note = None;
            }
        }
        true
    }

    pub fn apply_folders(&mut self, ticket: ReloadTicket, mut folders: Vec<Folder>) -> bool {
        debug_assert_eq!(ticket.list, ListKind::Folders);
        if ticket.seq != self.issued_folders {
            tracing::debug!(
                seq = ticket.seq,
                latest = self.issued_folders,
                "discarding superseded folders reload"
            );
            return false;
        }
        folders.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        self.folders = folders;
        self.stale -= EntityKinds::FOLDERS;
        self.expanded_folders
            .retain(|id| self.folders.iter().any(|folder| folder.id == *id));
        true
    }

    pub fn apply_tags(&mut self, ticket: ReloadTicket, mut tags: Vec<Tag>) -> bool {
        debug_assert_eq!(ticket.list, ListKind::Tags);
        if ticket.seq != self.issued_tags {
            tracing::debug!(
                seq = ticket.seq,
                latest = self.issued_tags,
                "discarding superseded tags reload"
            );
            return false;
        }
        tags.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        self.tags = tags;
        self.stale -= EntityKinds::TAGS;
        true
    }

    /// Drain events and reload every stale list from the store.
    ///
    /// A failed load keeps its stale mark so the next pump retries; the error
    /// is surfaced to the caller.
    pub fn pump(&mut self, store: &dyn RemoteStore) -> StoreResult<EntityKinds> {
        let stale = self.drain_events();
        let mut reloaded = EntityKinds::empty();
        if stale.contains(EntityKinds::NOTES) {
            let ticket = self.begin_reload(ListKind::Notes);
            let notes = store.load_notes(&self.filter)?;
            if self.apply_notes(ticket, notes) {
                reloaded |= EntityKinds::NOTES;
            }
        }
        if stale.contains(EntityKinds::FOLDERS) {
            let ticket = self.begin_reload(ListKind::Folders);
            let folders = store.load_folders()?;
            if self.apply_folders(ticket, folders) {
                reloaded |= EntityKinds::FOLDERS;
            }
        }
        if stale.contains(EntityKinds::TAGS) {
            let ticket = self.begin_reload(ListKind::Tags);
            let tags = store.load_tags()?;
            if self.apply_tags(ticket, tags) {
                reloaded |= EntityKinds::TAGS;
            }
        }
        Ok(reloaded)
    }
}
