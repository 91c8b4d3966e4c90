//! Debounced autosave: a burst of edit events for the active date becomes
//! exactly one reconciled write to the remote store after a quiet period.
//!
//! The commit is split in two phases so the caller stays in control of the
//! suspension point: `poll` hands out at most one `CommitTicket` at a time,
//! the ticket executes against the stores, and `complete` folds the outcome
//! back into the draft and the local cache. While a ticket is outstanding,
//! new edits keep re-arming the timer but never start a second commit.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indexmap::IndexSet;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::cache::LocalCache;
use crate::entry::{JournalEntry, Mood};
use crate::store::{AttachmentStore, EntryStore};

/// An attachment staged by the user but not yet uploaded. The transient
/// reference may be embedded in the draft content; it is rewritten to the
/// durable URL when the upload lands.
#[derive(Debug, Clone)]
pub struct StagedAttachment {
    pub transient_ref: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Transient edit state for the active date. Lives only in memory and is
/// discarded on navigation unless a commit has landed.
#[derive(Debug, Clone)]
pub struct Draft {
    date: Date,
    content: String,
    mood: Option<Mood>,
    /// Durable URLs already committed for this date.
    attachments: Vec<String>,
    staged: Vec<StagedAttachment>,
}

impl Draft {
    fn empty(date: Date) -> Self {
        Self {
            date,
            content: String::new(),
            mood: None,
            attachments: Vec::new(),
            staged: Vec::new(),
        }
    }

    fn from_cached(entry: &JournalEntry) -> Self {
        Self {
            date: entry.date,
            content: entry.content.clone(),
            mood: entry.mood,
            attachments: entry.attachments.clone(),
            staged: Vec::new(),
        }
    }

    pub fn date(&self) -> Date {
        self.date
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn mood(&self) -> Option<Mood> {
        self.mood
    }

    pub fn attachments(&self) -> &[String] {
        &self.attachments
    }

    pub fn staged(&self) -> &[StagedAttachment] {
        &self.staged
    }
}

/// Everything a commit needs, captured at timer expiry. The ticket pins its
/// date: navigating away while it executes does not redirect the
/// write-through.
#[derive(Debug, Clone)]
pub struct CommitTicket {
    date: Date,
    content: String,
    mood: Option<Mood>,
    durable: Vec<String>,
    staged: Vec<StagedAttachment>,
}

/// Outcome of a successfully executed commit pipeline.
#[derive(Debug)]
pub struct CommitResult {
    /// The entry as persisted remotely, or `None` when the empty-draft
    /// insert was skipped.
    pub committed: Option<JournalEntry>,
    /// (transient ref, durable URL) per upload that landed, in upload order.
    pub rewrites: Vec<(String, String)>,
}

impl CommitTicket {
    pub fn date(&self) -> Date {
        self.date
    }

    /// Run the commit pipeline: upload staged attachments, rewrite their
    /// transient references, union attachment sets, then insert or update.
    pub fn execute(
        &self,
        entries: &dyn EntryStore,
        attachments: &dyn AttachmentStore,
    ) -> Result<CommitResult> {
        let mut rewrites: Vec<(String, String)> = Vec::new();
        for staged in &self.staged {
            match attachments.store(&staged.bytes, &staged.content_type) {
                Ok(url) => rewrites.push((staged.transient_ref.clone(), url)),
                Err(err) => {
                    // Independent failure: drop this attachment from the
                    // commit and carry on with whatever succeeded.
                    tracing::warn!(
                        ?err,
                        file = %staged.file_name,
                        "attachment upload failed, dropping from this commit"
                    );
                }
            }
        }

        let mut content = self.content.clone();
        for (transient, durable) in &rewrites {
            content = content.replace(transient.as_str(), durable);
        }

        let mut merged: IndexSet<String> = self.durable.iter().cloned().collect();
        merged.extend(rewrites.iter().map(|(_, url)| url.clone()));

        let committed = JournalEntry {
            date: self.date,
            content,
            mood: self.mood,
            attachments: merged.into_iter().collect(),
            updated_at: OffsetDateTime::now_utc(),
        };

        let existing = entries
            .get_entry(self.date)
            .with_context(|| format!("checking for an existing entry on {}", self.date))?;

        let committed = if existing.is_some() {
            entries
                .update_entry(&committed)
                .with_context(|| format!("updating entry for {}", self.date))?;
            Some(committed)
        } else if !committed.is_empty() {
            entries
                .insert_entry(&committed)
                .with_context(|| format!("inserting entry for {}", self.date))?;
            Some(committed)
        } else {
            tracing::debug!(date = %self.date, "empty draft, skipping insert");
            None
        };

        Ok(CommitResult {
            committed,
            rewrites,
        })
    }
}

#[derive(Debug, Clone)]
pub enum SaveEvent {
    Saved {
        date: Date,
        timestamp: OffsetDateTime,
    },
    /// The draft was empty and no remote row existed; nothing was written.
    Skipped { date: Date },
    /// The scheduler was reset while the commit was in flight; its result
    /// was dropped without touching local state.
    Discarded { date: Date },
    Error {
        date: Date,
        message: String,
    },
}

#[derive(Debug)]
pub struct SaveScheduler {
    draft: Draft,
    timer: super::DebounceTimer,
    user_editing: bool,
    in_flight: bool,
    indicator: Duration,
    saved_until: Option<Instant>,
    last_saved_at: Option<OffsetDateTime>,
}

impl SaveScheduler {
    pub fn new(date: Date, quiet: Duration, indicator: Duration) -> Self {
        Self {
            draft: Draft::empty(date),
            timer: super::DebounceTimer::new(quiet),
            user_editing: false,
            in_flight: false,
            indicator,
            saved_until: None,
            last_saved_at: None,
        }
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn is_user_editing(&self) -> bool {
        self.user_editing
    }

    pub fn commit_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_saved_at(&self) -> Option<OffsetDateTime> {
        self.last_saved_at
    }

    /// Transient "saved" signal, armed for a fixed display duration after a
    /// commit lands.
    pub fn saved_indicator_visible(&self, now: Instant) -> bool {
        self.saved_until.is_some_and(|until| now < until)
    }

    /// Programmatic draft load on active-date change: populate from the
    /// cached entry if present, otherwise clear. Never a qualifying event,
    /// so the editing flag drops and any pending timer is cancelled. An
    /// in-flight commit for the previous date is unaffected.
    pub fn load_for_date(&mut self, date: Date, cached: Option<&JournalEntry>) {
        self.draft = match cached {
            Some(entry) => Draft::from_cached(entry),
            None => Draft::empty(date),
        };
        self.last_saved_at = cached.map(|entry| entry.updated_at);
        self.user_editing = false;
        self.timer.cancel();
    }

    /// Programmatic content restoration (tab-visibility repair). Not a
    /// qualifying event.
    pub fn restore_content(&mut self, content: &str) {
        self.draft.content.clear();
        self.draft.content.push_str(content);
    }

    pub fn content_edited(&mut self, content: &str, now: Instant) {
        if self.draft.content == content {
            return;
        }
        self.draft.content.clear();
        self.draft.content.push_str(content);
        self.mark_edited(now);
    }

    pub fn mood_selected(&mut self, mood: Option<Mood>, now: Instant) {
        if self.draft.mood == mood {
            return;
        }
        self.draft.mood = mood;
        self.mark_edited(now);
    }

    /// Stage an attachment for upload on the next commit. Returns the
    /// transient reference the UI may embed in the content blob.
    pub fn stage_attachment(
        &mut self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
        now: Instant,
    ) -> String {
        let transient_ref = format!("staged://{}", Uuid::new_v4());
        self.draft.staged.push(StagedAttachment {
            transient_ref: transient_ref.clone(),
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            bytes,
        });
        self.mark_edited(now);
        transient_ref
    }

    /// Detach a previously committed attachment from the draft.
    pub fn remove_attachment(&mut self, url: &str, now: Instant) {
        let before = self.draft.attachments.len();
        self.draft.attachments.retain(|existing| existing != url);
        if self.draft.attachments.len() != before {
            self.mark_edited(now);
        }
    }

    fn mark_edited(&mut self, now: Instant) {
        self.user_editing = true;
        self.timer.rearm(now);
    }

    /// Trailing-edge debounce: hand out a commit ticket once the quiet
    /// period has elapsed, the session has qualifying edits, and no commit
    /// is already in flight.
    pub fn poll(&mut self, now: Instant) -> Option<CommitTicket> {
        if !self.user_editing || self.in_flight {
            return None;
        }
        if !self.timer.fire(now) {
            return None;
        }
        self.in_flight = true;
        Some(CommitTicket {
            date: self.draft.date,
            content: self.draft.content.clone(),
            mood: self.draft.mood,
            durable: self.draft.attachments.clone(),
            staged: self.draft.staged.clone(),
        })
    }

    /// Fold a finished commit back in: clear the in-flight slot, write the
    /// committed entry through to the cache, and surface the saved signal.
    /// On failure the draft is left intact so the next debounce cycle
    /// retries.
    pub fn complete(
        &mut self,
        ticket: CommitTicket,
        outcome: Result<CommitResult>,
        now: Instant,
        cache: &mut LocalCache,
    ) -> Result<SaveEvent> {
        if !self.in_flight {
            // The ticket outlived a reset (logout); its result must not
            // resurrect cleared state.
            tracing::debug!(date = %ticket.date, "discarding stale commit result");
            return Ok(SaveEvent::Discarded { date: ticket.date });
        }
        self.in_flight = false;
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(date = %ticket.date, err = %format!("{err:#}"), "commit failed");
                return Ok(SaveEvent::Error {
                    date: ticket.date,
                    message: format!("{err:#}"),
                });
            }
        };

        let Some(committed) = result.committed else {
            return Ok(SaveEvent::Skipped { date: ticket.date });
        };

        if self.draft.date == ticket.date {
            // Append only the uploads that landed with this ticket. The
            // committed set must not be copied back wholesale: an attachment
            // removed while the commit was in flight would be resurrected.
            for (_, durable) in &result.rewrites {
                if !self.draft.attachments.iter().any(|url| url == durable) {
                    self.draft.attachments.push(durable.clone());
                }
            }
            for (transient, durable) in &result.rewrites {
                self.draft.content = self.draft.content.replace(transient.as_str(), durable);
            }
            // Staged items captured by this ticket are consumed, including
            // ones whose upload failed; anything staged while the commit was
            // in flight stays for the next cycle.
            let consumed: Vec<&str> = ticket
                .staged
                .iter()
                .map(|staged| staged.transient_ref.as_str())
                .collect();
            self.draft
                .staged
                .retain(|staged| !consumed.contains(&staged.transient_ref.as_str()));
        }

        let timestamp = committed.updated_at;
        cache
            .reconcile(committed)
            .context("writing committed entry through to the local cache")?;
        self.saved_until = Some(now + self.indicator);
        self.last_saved_at = Some(timestamp);
        Ok(SaveEvent::Saved {
            date: ticket.date,
            timestamp,
        })
    }

    /// Logout: drop the draft, all guards, and any outstanding ticket.
    pub fn reset(&mut self, date: Date) {
        self.draft = Draft::empty(date);
        self.user_editing = false;
        self.in_flight = false;
        self.saved_until = None;
        self.last_saved_at = None;
        self.timer.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheFile, LocalCache};
    use crate::store::memory::{MemoryAttachmentStore, MemoryEntryStore};
    use assert_matches::assert_matches;
    use tempfile::TempDir;
    use time::macros::date;

    const QUIET: Duration = Duration::from_millis(2500);
    const INDICATOR: Duration = Duration::from_millis(2000);

    fn scheduler() -> SaveScheduler {
        SaveScheduler::new(date!(2024 - 01 - 01), QUIET, INDICATOR)
    }

    fn cache(temp: &TempDir) -> LocalCache {
        LocalCache::new(CacheFile::new(temp.path().join("journal-cache.json")))
    }

    fn run_commit(
        scheduler: &mut SaveScheduler,
        entries: &MemoryEntryStore,
        attachments: &MemoryAttachmentStore,
        cache: &mut LocalCache,
        now: Instant,
    ) -> SaveEvent {
        let ticket = scheduler.poll(now).expect("commit due");
        let outcome = ticket.execute(entries, attachments);
        scheduler.complete(ticket, outcome, now, cache).unwrap()
    }

    #[test]
    fn burst_of_edits_yields_one_commit_with_final_state() {
        let temp = TempDir::new().unwrap();
        let mut cache = cache(&temp);
        let entries = MemoryEntryStore::new();
        let attachments = MemoryAttachmentStore::new();
        let mut scheduler = scheduler();
        let start = Instant::now();

        scheduler.content_edited("first", start);
        scheduler.content_edited("second", start + Duration::from_millis(500));
        scheduler.mood_selected(Some(Mood::Happy), start + Duration::from_millis(900));

        // Still inside the quiet period measured from the last edit.
        assert!(scheduler.poll(start + QUIET).is_none());

        let due = start + Duration::from_millis(900) + QUIET;
        let event = run_commit(&mut scheduler, &entries, &attachments, &mut cache, due);
        assert_matches!(event, SaveEvent::Saved { .. });

        let saved = entries.entry(date!(2024 - 01 - 01)).unwrap();
        assert_eq!(saved.content, "second");
        assert_eq!(saved.mood, Some(Mood::Happy));
        assert_eq!(entries.len(), 1);

        // Round trip: cache reflects the committed entry exactly.
        assert_eq!(cache.get(date!(2024 - 01 - 01)), Some(&saved));

        // No further commits without a new qualifying event.
        assert!(scheduler.poll(due + QUIET).is_none());
    }

    #[test]
    fn no_second_ticket_while_commit_in_flight() {
        let temp = TempDir::new().unwrap();
        let mut cache = cache(&temp);
        let entries = MemoryEntryStore::new();
        let attachments = MemoryAttachmentStore::new();
        let mut scheduler = scheduler();
        let start = Instant::now();

        scheduler.content_edited("draft", start);
        let ticket = scheduler.poll(start + QUIET).expect("first ticket");
        assert!(scheduler.commit_in_flight());

        // New edits while in flight re-arm the timer but must not start a
        // second concurrent commit.
        scheduler.content_edited("draft v2", start + QUIET);
        assert!(scheduler.poll(start + QUIET + QUIET).is_none());

        let outcome = ticket.execute(&entries, &attachments);
        scheduler
            .complete(ticket, outcome, start + QUIET, &mut cache)
            .unwrap();
        assert!(!scheduler.commit_in_flight());

        // The deferred edit commits on its own debounce cycle.
        let event = run_commit(
            &mut scheduler,
            &entries,
            &attachments,
            &mut cache,
            start + QUIET + QUIET,
        );
        assert_matches!(event, SaveEvent::Saved { .. });
        assert_eq!(entries.entry(date!(2024 - 01 - 01)).unwrap().content, "draft v2");
    }

    #[test]
    fn empty_draft_never_reaches_the_store() {
        let temp = TempDir::new().unwrap();
        let mut cache = cache(&temp);
        let entries = MemoryEntryStore::new();
        let attachments = MemoryAttachmentStore::new();
        let mut scheduler = scheduler();
        let start = Instant::now();

        scheduler.content_edited("typo", start);
        scheduler.content_edited("", start + Duration::from_millis(100));

        let due = start + Duration::from_millis(100) + QUIET;
        let event = run_commit(&mut scheduler, &entries, &attachments, &mut cache, due);
        assert_matches!(event, SaveEvent::Skipped { .. });
        assert!(entries.is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn existing_row_is_updated_even_when_draft_empties() {
        let temp = TempDir::new().unwrap();
        let mut cache = cache(&temp);
        let mut seeded = JournalEntry::new(date!(2024 - 01 - 01));
        seeded.content = "old text".into();
        let entries = MemoryEntryStore::with_entries([seeded]);
        let attachments = MemoryAttachmentStore::new();
        let mut scheduler = scheduler();
        let start = Instant::now();

        scheduler.load_for_date(date!(2024 - 01 - 01), entries.entry(date!(2024 - 01 - 01)).as_ref());
        scheduler.content_edited("", start);
        let event = run_commit(&mut scheduler, &entries, &attachments, &mut cache, start + QUIET);
        assert_matches!(event, SaveEvent::Saved { .. });
        assert_eq!(entries.entry(date!(2024 - 01 - 01)).unwrap().content, "");
    }

    #[test]
    fn partial_attachment_failure_commits_the_survivor() {
        let temp = TempDir::new().unwrap();
        let mut cache = cache(&temp);
        let entries = MemoryEntryStore::new();
        let attachments = MemoryAttachmentStore::new();
        attachments.fail_next_uploads(1);
        let mut scheduler = scheduler();
        let start = Instant::now();

        let lost_ref = scheduler.stage_attachment("a.png", "image/png", b"aaa".to_vec(), start);
        let kept_ref = scheduler.stage_attachment("b.png", "image/png", b"bbb".to_vec(), start);
        scheduler.content_edited(
            &format!("<img src=\"{lost_ref}\"><img src=\"{kept_ref}\">"),
            start,
        );

        let event = run_commit(&mut scheduler, &entries, &attachments, &mut cache, start + QUIET);
        assert_matches!(event, SaveEvent::Saved { .. });

        let saved = entries.entry(date!(2024 - 01 - 01)).unwrap();
        assert_eq!(saved.attachments.len(), 1);
        let durable = &saved.attachments[0];
        assert!(saved.content.contains(durable.as_str()));
        // The failed upload keeps its transient reference in content but
        // never enters the persisted attachment set.
        assert!(saved.content.contains(&lost_ref));
        assert!(!saved.attachments.contains(&lost_ref));

        // Consumed either way: nothing left staged for the next cycle.
        assert!(scheduler.draft().staged().is_empty());
        assert_eq!(scheduler.draft().attachments(), saved.attachments.as_slice());
    }

    #[test]
    fn removal_while_commit_in_flight_is_not_resurrected() {
        let temp = TempDir::new().unwrap();
        let mut cache = cache(&temp);
        let mut seeded = JournalEntry::new(date!(2024 - 01 - 01));
        seeded.content = "photo day".into();
        seeded.attachments = vec!["https://cdn/a.png".to_string()];
        let entries = MemoryEntryStore::with_entries([seeded]);
        let attachments = MemoryAttachmentStore::new();
        let mut scheduler = scheduler();
        let start = Instant::now();

        scheduler.load_for_date(date!(2024 - 01 - 01), entries.entry(date!(2024 - 01 - 01)).as_ref());
        scheduler.content_edited("photo day, edited", start);
        let ticket = scheduler.poll(start + QUIET).expect("ticket");

        // The user detaches the attachment while the commit is in flight.
        scheduler.remove_attachment("https://cdn/a.png", start + QUIET);
        assert!(scheduler.draft().attachments().is_empty());

        let outcome = ticket.execute(&entries, &attachments);
        scheduler
            .complete(ticket, outcome, start + QUIET, &mut cache)
            .unwrap();

        // The landed commit still carries the old set, but the live draft
        // keeps the removal and the deferred commit persists it.
        assert!(scheduler.draft().attachments().is_empty());
        let event = run_commit(
            &mut scheduler,
            &entries,
            &attachments,
            &mut cache,
            start + QUIET + QUIET,
        );
        assert_matches!(event, SaveEvent::Saved { .. });
        let saved = entries.entry(date!(2024 - 01 - 01)).unwrap();
        assert!(saved.attachments.is_empty());
        assert_eq!(cache.get(date!(2024 - 01 - 01)), Some(&saved));
    }

    #[test]
    fn commit_failure_leaves_draft_and_cache_for_retry() {
        let temp = TempDir::new().unwrap();
        let mut cache = cache(&temp);
        let entries = MemoryEntryStore::new();
        entries.set_fail_writes(true);
        let attachments = MemoryAttachmentStore::new();
        let mut scheduler = scheduler();
        let start = Instant::now();

        scheduler.content_edited("keep me", start);
        let event = run_commit(&mut scheduler, &entries, &attachments, &mut cache, start + QUIET);
        assert_matches!(event, SaveEvent::Error { .. });
        assert!(cache.is_empty());
        assert_eq!(scheduler.draft().content(), "keep me");
        assert!(!scheduler.commit_in_flight());

        // The next qualifying edit retries successfully.
        entries.set_fail_writes(false);
        scheduler.content_edited("keep me!", start + QUIET);
        let event = run_commit(
            &mut scheduler,
            &entries,
            &attachments,
            &mut cache,
            start + QUIET + QUIET,
        );
        assert_matches!(event, SaveEvent::Saved { .. });
        assert_eq!(entries.entry(date!(2024 - 01 - 01)).unwrap().content, "keep me!");
    }

    #[test]
    fn in_flight_commit_lands_after_navigating_away() {
        let temp = TempDir::new().unwrap();
        let mut cache = cache(&temp);
        let entries = MemoryEntryStore::new();
        let attachments = MemoryAttachmentStore::new();
        let mut scheduler = scheduler();
        let start = Instant::now();

        scheduler.content_edited("yesterday's thoughts", start);
        let ticket = scheduler.poll(start + QUIET).expect("ticket");

        // Navigate to another date while the commit is in flight.
        scheduler.load_for_date(date!(2024 - 01 - 02), None);
        assert!(!scheduler.is_user_editing());

        let outcome = ticket.execute(&entries, &attachments);
        let event = scheduler
            .complete(ticket, outcome, start + QUIET, &mut cache)
            .unwrap();
        assert_matches!(event, SaveEvent::Saved { date, .. } if date == date!(2024 - 01 - 01));

        // Write-through landed for the captured date; the new draft is
        // untouched.
        assert!(cache.get(date!(2024 - 01 - 01)).is_some());
        assert_eq!(scheduler.draft().date(), date!(2024 - 01 - 02));
        assert_eq!(scheduler.draft().content(), "");
    }

    #[test]
    fn programmatic_load_is_not_a_qualifying_event() {
        let mut entry = JournalEntry::new(date!(2024 - 01 - 03));
        entry.content = "restored".into();
        let mut scheduler = scheduler();

        scheduler.load_for_date(entry.date, Some(&entry));
        scheduler.restore_content("restored");
        assert!(!scheduler.is_user_editing());
        assert!(scheduler.poll(Instant::now() + QUIET + QUIET).is_none());
    }

    #[test]
    fn reset_discards_an_in_flight_ticket() {
        let temp = TempDir::new().unwrap();
        let mut cache = cache(&temp);
        let entries = MemoryEntryStore::new();
        let attachments = MemoryAttachmentStore::new();
        let mut scheduler = scheduler();
        let start = Instant::now();

        scheduler.content_edited("about to log out", start);
        let ticket = scheduler.poll(start + QUIET).expect("ticket");

        // Logout while the commit is in flight: the remote write may still
        // land, but its result must not resurrect cleared local state.
        scheduler.reset(date!(2024 - 01 - 01));
        cache.clear().unwrap();

        let outcome = ticket.execute(&entries, &attachments);
        let event = scheduler
            .complete(ticket, outcome, start + QUIET, &mut cache)
            .unwrap();
        assert_matches!(event, SaveEvent::Discarded { .. });
        assert!(cache.is_empty());
        assert!(!scheduler.saved_indicator_visible(start + QUIET));
    }

    #[test]
    fn saved_indicator_expires_after_display_duration() {
        let temp = TempDir::new().unwrap();
        let mut cache = cache(&temp);
        let entries = MemoryEntryStore::new();
        let attachments = MemoryAttachmentStore::new();
        let mut scheduler = scheduler();
        let start = Instant::now();

        scheduler.content_edited("note", start);
        let due = start + QUIET;
        run_commit(&mut scheduler, &entries, &attachments, &mut cache, due);

        assert!(scheduler.saved_indicator_visible(due));
        assert!(scheduler.saved_indicator_visible(due + INDICATOR - Duration::from_millis(1)));
        assert!(!scheduler.saved_indicator_visible(due + INDICATOR));
        assert!(scheduler.last_saved_at().is_some());
    }
}
