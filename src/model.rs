//! Core entities shared across the engine: notes, folders, tags, and the
//! account profile that carries the plan tier.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub type NoteId = Uuid;
pub type FolderId = Uuid;
pub type TagId = Uuid;

/// A note as confirmed by the remote store.
///
/// The body is a serialized rich document; this crate treats it as an opaque
/// string and never inspects its structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub body: String,
    /// Weak reference: deleting the folder clears this, it never dangles.
    pub folder_id: Option<FolderId>,
    pub favorited: bool,
    pub pinned: bool,
    /// None = live, Some = trashed.
    pub deleted_at: Option<OffsetDateTime>,
    pub last_viewed_at: Option<OffsetDateTime>,
    /// One-way digest of the note password; None = no lock feature.
    pub password_digest: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Note {
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn has_password(&self) -> bool {
        self.password_digest.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    /// Display color as a CSS-style hex string, e.g. "#d97757".
    pub color: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanTier {
    Base,
    Premium,
}

impl Default for PlanTier {
    fn default() -> Self {
        PlanTier::Base
    }
}

/// Account profile surfaced next to the note lists.
///
/// `storage_used_bytes` is display-only; quota enforcement works on entity
/// counts, not bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    pub plan: PlanTier,
    pub storage_used_bytes: u64,
}

/// Which slice of the account's notes a list shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoteView {
    /// Live notes (not trashed).
    #[default]
    Active,
    /// Live notes with the favorited flag set.
    Favorites,
    /// Trashed notes only.
    Trash,
}

/// Filter handed to `RemoteStore::load_notes`.
#[derive(Debug, Clone, Default)]
pub struct NoteFilter {
    pub view: NoteView,
    pub folder_id: Option<FolderId>,
    /// Case-insensitive substring match against title and body.
    pub search: Option<String>,
}

impl NoteFilter {
    pub fn active() -> Self {
        Self::default()
    }

    pub fn favorites() -> Self {
        Self {
            view: NoteView::Favorites,
            ..Self::default()
        }
    }

    pub fn trash() -> Self {
        Self {
            view: NoteView::Trash,
            ..Self::default()
        }
    }

    pub fn in_folder(folder_id: FolderId) -> Self {
        Self {
            folder_id: Some(folder_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, note: &Note) -> bool {
        match self.view {
            NoteView::Active => {
                if note.is_trashed() {
                    return false;
                }
            }
            NoteView::Favorites => {
                if note.is_trashed() || !note.favorited {
                    return false;
                }
            }
            NoteView::Trash => {
                if !note.is_trashed() {
                    return false;
                }
            }
        }
        if let Some(folder_id) = self.folder_id {
            if note.folder_id != Some(folder_id) {
                return false;
            }
        }
        if let Some(needle) = self.search.as_deref() {
            let needle = needle.to_lowercase();
            if !needle.is_empty()
                && !note.title.to_lowercase().contains(&needle)
                && !note.body.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

/// Fields for a brand-new note.
#[derive(Debug, Clone, Default)]
pub struct NoteDraft {
    pub title: String,
    pub body: String,
    pub folder_id: Option<FolderId>,
}

impl NoteDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Partial update for `RemoteStore::save_note`; unset fields are untouched.
///
/// Nullable columns use a double Option: the outer layer means "change this
/// field", the inner layer carries the new value including None.
#[derive(Debug, Clone, Default)]
pub struct NotePatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub folder_id: Option<Option<FolderId>>,
    pub favorited: Option<bool>,
    pub pinned: Option<bool>,
    pub password_digest: Option<Option<String>>,
    pub last_viewed_at: Option<OffsetDateTime>,
}

impl NotePatch {
    pub fn content(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            body: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn folder(folder_id: Option<FolderId>) -> Self {
        Self {
            folder_id: Some(folder_id),
            ..Self::default()
        }
    }

    pub fn favorited(favorited: bool) -> Self {
        Self {
            favorited: Some(favorited),
            ..Self::default()
        }
    }

    pub fn pinned(pinned: bool) -> Self {
        Self {
            pinned: Some(pinned),
            ..Self::default()
        }
    }

    pub fn password_digest(digest: Option<String>) -> Self {
        Self {
            password_digest: Some(digest),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.body.is_none()
            && self.folder_id.is_none()
            && self.favorited.is_none()
            && self.pinned.is_none()
            && self.password_digest.is_none()
            && self.last_viewed_at.is_none()
    }

    pub fn apply_to(&self, note: &mut Note) {
        if let Some(title) = &self.title {
            note.title = title.clone();
        }
        if let Some(body) = &self.body {
            note.body = body.clone();
        }
        if let Some(folder_id) = self.folder_id {
            note.folder_id = folder_id;
        }
        if let Some(favorited) = self.favorited {
            note.favorited = favorited;
        }
        if let Some(pinned) = self.pinned {
            note.pinned = pinned;
        }
        if let Some(digest) = &self.password_digest {
            note.password_digest = digest.clone();
        }
        if let Some(viewed) = self.last_viewed_at {
            note.last_viewed_at = Some(viewed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_note() -> Note {
        let now = OffsetDateTime::now_utc();
        Note {
            id: Uuid::new_v4(),
            title: "Meeting notes".into(),
            body: "Discuss rollout".into(),
            folder_id: None,
            favorited: false,
            pinned: false,
            deleted_at: None,
            last_viewed_at: None,
            password_digest: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn active_filter_excludes_trashed_notes() {
        let mut note = sample_note();
        assert!(NoteFilter::active().matches(&note));
        note.deleted_at = Some(OffsetDateTime::now_utc());
        assert!(!NoteFilter::active().matches(&note));
        assert!(NoteFilter::trash().matches(&note));
    }

    #[test]
    fn favorites_filter_requires_live_favorited() {
        let mut note = sample_note();
        assert!(!NoteFilter::favorites().matches(&note));
        note.favorited = true;
        assert!(NoteFilter::favorites().matches(&note));
        note.deleted_at = Some(OffsetDateTime::now_utc());
        assert!(!NoteFilter::favorites().matches(&note));
    }

    #[test]
    fn search_matches_title_and_body_case_insensitively() {
        let note = sample_note();
        let mut filter = NoteFilter::active();
        filter.search = Some("ROLLOUT".into());
        assert!(filter.matches(&note));
        filter.search = Some("absent".into());
        assert!(!filter.matches(&note));
    }

    #[test]
    fn patch_applies_only_set_fields() {
        let mut note = sample_note();
        let folder = Uuid::new_v4();
        note.folder_id = Some(folder);
        let patch = NotePatch::content("New title", "New body");
        patch.apply_to(&mut note);
        assert_eq!(note.title, "New title");
        assert_eq!(note.folder_id, Some(folder), "unset field untouched");

        NotePatch::folder(None).apply_to(&mut note);
        assert_eq!(note.folder_id, None, "inner None clears the reference");
    }
}
