//! Debounced autosave for the open document.
//!
//! The runtime owns the working copy of the note being edited and decides
//! when it is due for a write. It never talks to the store itself: `poll`
//! and `flush_now` hand out a [`FlushRequest`], the host performs the save,
//! and reports back through [`AutosaveRuntime::complete`]. Splitting the
//! round-trip in two keeps the in-flight window explicit, which is what makes
//! the identity guard enforceable: a completion for a session that is no
//! longer open is discarded instead of clobbering the next document's state.

use std::time::{Duration, Instant};

use time::OffsetDateTime;

use crate::model::{Note, NoteId, NotePatch};
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditField {
    Title,
    Body,
}

/// A write the host should send to the remote store.
#[derive(Debug, Clone)]
pub struct FlushRequest {
    pub note_id: NoteId,
    /// Session generation the request was issued under.
    pub epoch: u64,
    /// Monotonic flush number, unique across the runtime's lifetime.
    pub seq: u64,
    pub title: String,
    pub body: String,
}

impl FlushRequest {
    pub fn patch(&self) -> NotePatch {
        NotePatch::content(self.title.clone(), self.body.clone())
    }
}

#[derive(Debug, Clone)]
pub enum FlushOutcome {
    Saved { at: OffsetDateTime },
    Failed(StoreError),
}

/// What a completed flush meant for the session, surfaced to the host UI.
#[derive(Debug, Clone)]
pub enum AutosaveEvent {
    Saved {
        note_id: NoteId,
        at: OffsetDateTime,
    },
    Failed {
        note_id: NoteId,
        error: StoreError,
    },
}

#[derive(Debug, Clone)]
pub enum AutosaveStatus {
    /// No document open.
    Inactive,
    Idle {
        note_id: NoteId,
        last_saved_at: Option<OffsetDateTime>,
    },
    /// Dirty, waiting out the quiet period.
    Pending {
        note_id: NoteId,
        since: OffsetDateTime,
    },
    /// A flush is on the wire.
    Saving { note_id: NoteId },
    /// Last flush failed; edits are retained and the dirty flag stands.
    Error { note_id: NoteId, message: String },
}

#[derive(Debug)]
struct EditSession {
    note_id: NoteId,
    epoch: u64,
    title: String,
    body: String,
    dirty: bool,
    /// Armed debounce deadline; None means no timer (clean, or waiting for a
    /// manual retry after a failure).
    deadline: Option<Instant>,
    dirty_since: Option<OffsetDateTime>,
    last_saved_at: Option<OffsetDateTime>,
    last_error: Option<String>,
    /// Bumped on every accepted edit; used to tell whether a completed flush
    /// still covers the latest working copy.
    edit_counter: u64,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    seq: u64,
    edit_mark: u64,
}

#[derive(Debug)]
pub struct AutosaveRuntime {
    debounce: Duration,
    epoch: u64,
    next_seq: u64,
    session: Option<EditSession>,
    in_flight: Option<InFlight>,
}

impl AutosaveRuntime {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            epoch: 0,
            next_seq: 0,
            session: None,
            in_flight: None,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn open_note_id(&self) -> Option<NoteId> {
        self.session.as_ref().map(|s| s.note_id)
    }

    pub fn has_dirty_changes(&self) -> bool {
        self.session.as_ref().map(|s| s.dirty).unwrap_or(false)
    }

    pub fn working_title(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.title.as_str())
    }

    pub fn working_body(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.body.as_str())
    }

    /// Open an edit session for `note`, replacing any current one.
    ///
    /// Returns the final flush for the outgoing session when it still held
    /// unsaved edits; the host must send it before (or instead of) dropping
    /// it on the floor.
    pub fn open(&mut self, note: &Note) -> Option<FlushRequest> {
        let final_flush = self.close();
        self.epoch += 1;
        self.session = Some(EditSession {
            note_id: note.id,
            epoch: self.epoch,
            title: note.title.clone(),
            body: note.body.clone(),
            dirty: false,
            deadline: None,
            dirty_since: None,
            last_saved_at: None,
            last_error: None,
            edit_counter: 0,
        });
        final_flush
    }

    /// Destroy the current session, handing back its final flush when dirty.
    pub fn close(&mut self) -> Option<FlushRequest> {
        let session = self.session.take()?;
        let in_flight = self.in_flight.take();
        if !session.dirty {
            return None;
        }
        // An in-flight flush that already carries the latest working copy
        // makes a second send redundant.
        if let Some(in_flight) = in_flight {
            if in_flight.edit_mark == session.edit_counter {
                return None;
            }
        }
        let seq = self.bump_seq();
        Some(FlushRequest {
            note_id: session.note_id,
            epoch: session.epoch,
            seq,
            title: session.title,
            body: session.body,
        })
    }

    /// Record an edit to the working copy.
    ///
    /// Marks the session dirty and restarts the quiet-period countdown; each
    /// edit pushes the deadline out again, so a steady typist produces no
    /// writes until they pause. Returns false when no session is open or the
    /// value is unchanged.
    pub fn edit(&mut self, field: EditField, value: &str) -> bool {
        let debounce = self.debounce;
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let slot = match field {
            EditField::Title => &mut session.title,
            EditField::Body => &mut session.body,
        };
        if slot == value {
            return false;
        }
        slot.clear();
        slot.push_str(value);
        session.dirty = true;
        session.edit_counter += 1;
        session.deadline = Some(Instant::now() + debounce);
        if session.dirty_since.is_none() {
            session.dirty_since = Some(OffsetDateTime::now_utc());
        }
        session.last_error = None;
        true
    }

    /// Hand out the due flush, if any.
    ///
    /// Fires only when the session is dirty, the quiet period has fully
    /// elapsed since the most recent edit, and no other flush is in flight.
    pub fn poll(&mut self) -> Option<FlushRequest> {
        if self.in_flight.is_some() {
            return None;
        }
        let session = self.session.as_ref()?;
        if !session.dirty {
            return None;
        }
        let deadline = session.deadline?;
        if Instant::now() < deadline {
            return None;
        }
        self.issue()
    }

    /// Hand out a flush immediately (manual save), debounce notwithstanding.
    pub fn flush_now(&mut self) -> Option<FlushRequest> {
        if self.in_flight.is_some() {
            return None;
        }
        if !self.session.as_ref().map(|s| s.dirty).unwrap_or(false) {
            return None;
        }
        self.issue()
    }

    /// Report the result of a flush the host performed.
    ///
    /// The completion is applied only when `request` still targets the open
    /// session; anything else (document switched, session reopened) is
    /// discarded so a stale result can never mark foreign edits as saved.
    pub fn complete(&mut self, request: &FlushRequest, outcome: FlushOutcome) -> Option<AutosaveEvent> {
        let in_flight = match self.in_flight {
            Some(in_flight) if in_flight.seq == request.seq => {
                self.in_flight = None;
                Some(in_flight)
            }
            other => other,
        };

        let Some(session) = self.session.as_mut() else {
            tracing::debug!(note_id = %request.note_id, seq = request.seq, "discarding flush result: no open session");
            return None;
        };
        if session.note_id != request.note_id || session.epoch != request.epoch {
            tracing::debug!(
                note_id = %request.note_id,
                seq = request.seq,
                "discarding flush result for a session that is no longer open"
            );
            return None;
        }

        match outcome {
            FlushOutcome::Saved { at } => {
                let covers_latest = in_flight
                    .map(|f| f.seq == request.seq && f.edit_mark == session.edit_counter)
                    .unwrap_or(false);
                if covers_latest {
                    session.dirty = false;
                    session.deadline = None;
                    session.dirty_since = None;
                }
                session.last_saved_at = Some(at);
                session.last_error = None;
                Some(AutosaveEvent::Saved {
                    note_id: session.note_id,
                    at,
                })
            }
            FlushOutcome::Failed(error) => {
                // Keep the dirty flag so nothing is lost, but disarm the
                // timer: the next edit or a manual flush re-sends, there is
                // no automatic retry loop.
                session.last_error = Some(error.to_string());
                session.deadline = None;
                Some(AutosaveEvent::Failed {
                    note_id: session.note_id,
                    error,
                })
            }
        }
    }

    pub fn status(&self) -> AutosaveStatus {
        let Some(session) = &self.session else {
            return AutosaveStatus::Inactive;
        };
        if self.in_flight.is_some() {
            return AutosaveStatus::Saving {
                note_id: session.note_id,
            };
        }
        if let Some(message) = &session.last_error {
            return AutosaveStatus::Error {
                note_id: session.note_id,
                message: message.clone(),
            };
        }
        if session.dirty {
            return AutosaveStatus::Pending {
                note_id: session.note_id,
                since: session.dirty_since.unwrap_or_else(OffsetDateTime::now_utc),
            };
        }
        AutosaveStatus::Idle {
            note_id: session.note_id,
            last_saved_at: session.last_saved_at,
        }
    }

    fn issue(&mut self) -> Option<FlushRequest> {
        let seq = self.bump_seq();
        let session = self.session.as_ref()?;
        self.in_flight = Some(InFlight {
            seq,
            edit_mark: session.edit_counter,
        });
        Some(FlushRequest {
            note_id: session.note_id,
            epoch: session.epoch,
            seq,
            title: session.title.clone(),
            body: session.body.clone(),
        })
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use uuid::Uuid;

    fn note(title: &str, body: &str) -> Note {
        let now = OffsetDateTime::now_utc();
        Note {
            id: Uuid::new_v4(),
            title: title.into(),
            body: body.into(),
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

    fn saved_now() -> FlushOutcome {
        FlushOutcome::Saved {
            at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn edits_in_one_window_coalesce_into_one_flush_with_last_values() {
        let mut runtime = AutosaveRuntime::new(Duration::ZERO);
        runtime.open(&note("Draft", ""));

        runtime.edit(EditField::Body, "a");
        runtime.edit(EditField::Body, "ab");
        runtime.edit(EditField::Title, "Renamed");
        runtime.edit(EditField::Body, "abc");

        let request = runtime.poll().expect("flush due");
        assert_eq!(request.title, "Renamed");
        assert_eq!(request.body, "abc");

        // One in-flight flush at a time.
        assert!(runtime.poll().is_none());

        runtime.complete(&request, saved_now());
        assert!(!runtime.has_dirty_changes());
        assert!(runtime.poll().is_none(), "clean session issues nothing");
    }

    #[test]
    fn quiet_period_is_measured_from_the_most_recent_edit() {
        let mut runtime = AutosaveRuntime::new(Duration::from_millis(80));
        runtime.open(&note("Draft", ""));

        runtime.edit(EditField::Body, "a");
        assert!(runtime.poll().is_none(), "window still open");

        std::thread::sleep(Duration::from_millis(50));
        runtime.edit(EditField::Body, "ab");
        std::thread::sleep(Duration::from_millis(50));
        // 100ms after the first edit but only 50ms after the second: the
        // countdown restarted, so nothing is due yet.
        assert!(runtime.poll().is_none());

        std::thread::sleep(Duration::from_millis(50));
        let request = runtime.poll().expect("quiet period elapsed");
        assert_eq!(request.body, "ab");
    }

    #[test]
    fn stale_flush_result_never_touches_the_next_session() {
        let mut runtime = AutosaveRuntime::new(Duration::ZERO);
        let first = note("First", "");
        let second = note("Second", "");

        runtime.open(&first);
        runtime.edit(EditField::Body, "first edits");
        let stale = runtime.poll().expect("flush issued");

        // Switch documents while the flush is still on the wire.
        runtime.open(&second);
        runtime.edit(EditField::Body, "second edits");

        assert!(runtime.complete(&stale, saved_now()).is_none());
        assert!(runtime.has_dirty_changes(), "new session still dirty");
        assert_eq!(runtime.working_body(), Some("second edits"));
    }

    #[test]
    fn reopening_the_same_note_is_guarded_by_epoch() {
        let mut runtime = AutosaveRuntime::new(Duration::ZERO);
        let doc = note("Doc", "");

        runtime.open(&doc);
        runtime.edit(EditField::Body, "old");
        let stale = runtime.poll().expect("flush issued");

        runtime.open(&doc);
        runtime.edit(EditField::Body, "new");

        assert!(runtime.complete(&stale, saved_now()).is_none());
        assert!(runtime.has_dirty_changes());
    }

    #[test]
    fn edit_during_flight_keeps_session_dirty_after_success() {
        let mut runtime = AutosaveRuntime::new(Duration::ZERO);
        runtime.open(&note("Draft", ""));

        runtime.edit(EditField::Body, "v1");
        let request = runtime.poll().expect("flush issued");
        runtime.edit(EditField::Body, "v2");

        let event = runtime.complete(&request, saved_now());
        assert_matches!(event, Some(AutosaveEvent::Saved { .. }));
        assert!(
            runtime.has_dirty_changes(),
            "v2 arrived after the flush was issued and is still unsaved"
        );
        let next = runtime.poll().expect("rescheduled flush");
        assert_eq!(next.body, "v2");
    }

    #[test]
    fn failure_keeps_dirty_flag_and_waits_for_manual_or_new_edit() {
        let mut runtime = AutosaveRuntime::new(Duration::ZERO);
        runtime.open(&note("Draft", ""));
        runtime.edit(EditField::Body, "unsaved");

        let request = runtime.poll().expect("flush issued");
        let event = runtime.complete(&request, FlushOutcome::Failed(StoreError::Transient("offline".into())));
        assert_matches!(event, Some(AutosaveEvent::Failed { .. }));
        assert!(runtime.has_dirty_changes());
        assert_matches!(runtime.status(), AutosaveStatus::Error { .. });

        // No retry loop: the timer is disarmed until something happens.
        assert!(runtime.poll().is_none());

        // A manual flush re-sends the same content.
        let retry = runtime.flush_now().expect("manual flush");
        assert_eq!(retry.body, "unsaved");
        runtime.complete(&retry, saved_now());
        assert!(!runtime.has_dirty_changes());
    }

    #[test]
    fn new_edit_rearms_the_timer_after_a_failure() {
        let mut runtime = AutosaveRuntime::new(Duration::ZERO);
        runtime.open(&note("Draft", ""));
        runtime.edit(EditField::Body, "one");
        let request = runtime.poll().unwrap();
        runtime.complete(&request, FlushOutcome::Failed(StoreError::Transient("offline".into())));
        assert!(runtime.poll().is_none());

        runtime.edit(EditField::Body, "two");
        let retry = runtime.poll().expect("rearmed by the new edit");
        assert_eq!(retry.body, "two");
    }

    #[test]
    fn closing_a_dirty_session_yields_a_final_flush() {
        let mut runtime = AutosaveRuntime::new(Duration::from_secs(3600));
        let doc = note("Doc", "");
        runtime.open(&doc);
        runtime.edit(EditField::Body, "last burst");

        let final_flush = runtime.close().expect("final flush on close");
        assert_eq!(final_flush.note_id, doc.id);
        assert_eq!(final_flush.body, "last burst");
        assert_matches!(runtime.status(), AutosaveStatus::Inactive);
    }

    #[test]
    fn close_skips_final_flush_when_in_flight_already_covers_it() {
        let mut runtime = AutosaveRuntime::new(Duration::ZERO);
        runtime.open(&note("Doc", ""));
        runtime.edit(EditField::Body, "content");
        let _in_flight = runtime.poll().expect("flush issued");

        // Nothing changed since the flush went out, so closing has nothing
        // new to send.
        assert!(runtime.close().is_none());
    }

    #[test]
    fn close_sends_edits_made_after_the_in_flight_flush() {
        let mut runtime = AutosaveRuntime::new(Duration::ZERO);
        runtime.open(&note("Doc", ""));
        runtime.edit(EditField::Body, "v1");
        let _in_flight = runtime.poll().expect("flush issued");
        runtime.edit(EditField::Body, "v2");

        let final_flush = runtime.close().expect("final burst not lost");
        assert_eq!(final_flush.body, "v2");
    }

    #[test]
    fn unchanged_value_does_not_dirty_the_session() {
        let mut runtime = AutosaveRuntime::new(Duration::ZERO);
        runtime.open(&note("Same", "body"));
        assert!(!runtime.edit(EditField::Title, "Same"));
        assert!(!runtime.has_dirty_changes());
    }
}
