//! Session orchestration: hydrate the local cache once per authenticated
//! session, feed edits into the save scheduler, and resolve the active date
//! against the cache. Owns the `LocalCache`; nothing else mutates durable
//! state.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use time::{Date, OffsetDateTime};

use crate::cache::{CacheFile, LocalCache};
use crate::config::AppConfig;
use crate::entry::Mood;
use crate::journaling::{Draft, SaveEvent, SaveScheduler};
use crate::search::{self, SearchHit};
use crate::store::{AttachmentStore, EntryStore, SessionEvent, UserProfile};

/// Content repairs (tab-visibility restoration) are throttled so a burst of
/// visibility flips cannot thrash the draft.
const REPAIR_THROTTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    Hydrating,
    Ready,
}

/// Pre/post-commit hooks for the embedding UI. The engine guarantees it
/// calls them around every commit; what they preserve (cursor, scroll) is
/// the embedder's business.
pub trait CommitHooks {
    fn before_commit(&mut self) {}
    fn after_commit(&mut self) {}
}

/// Default hooks for embedders with nothing to preserve.
#[derive(Debug, Default)]
pub struct NoopHooks;

impl CommitHooks for NoopHooks {}

pub struct SyncCoordinator {
    config: AppConfig,
    cache: LocalCache,
    scheduler: SaveScheduler,
    phase: SessionPhase,
    hydrated: bool,
    remote_loading: bool,
    profile: Option<UserProfile>,
    display_name: Option<String>,
    active_date: Date,
    last_repair: Option<Instant>,
}

impl SyncCoordinator {
    pub fn new(config: AppConfig, cache_file: CacheFile, active_date: Date) -> Self {
        let scheduler = SaveScheduler::new(
            active_date,
            config.auto_save.debounce_duration(),
            config.auto_save.saved_indicator_duration(),
        );
        Self {
            config,
            cache: LocalCache::new(cache_file),
            scheduler,
            phase: SessionPhase::Unauthenticated,
            hydrated: false,
            remote_loading: false,
            profile: None,
            display_name: None,
            active_date,
            last_repair: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// True only while a full snapshot is being fetched from the remote
    /// store; hydration from the durable blob never sets it.
    pub fn remote_loading(&self) -> bool {
        self.remote_loading
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn draft(&self) -> &Draft {
        self.scheduler.draft()
    }

    pub fn active_date(&self) -> Date {
        self.active_date
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn saved_indicator_visible(&self, now: Instant) -> bool {
        self.scheduler.saved_indicator_visible(now)
    }

    pub fn last_saved_at(&self) -> Option<OffsetDateTime> {
        self.scheduler.last_saved_at()
    }

    /// Drive the session state machine from the auth collaborator's
    /// notification stream.
    pub fn handle_session_event(
        &mut self,
        event: SessionEvent,
        entries: &dyn EntryStore,
    ) -> Result<()> {
        match event {
            SessionEvent::SignedIn(profile) => {
                self.hydrate(profile, entries);
                Ok(())
            }
            SessionEvent::SignedOut => self.logout(),
        }
    }

    /// Hydrate at most once per session, even if the auth signal fires
    /// repeatedly. Prefers the durable blob (no loading indicator); falls
    /// back to a full remote snapshot. Every failure degrades to Ready with
    /// whatever data survived.
    fn hydrate(&mut self, profile: UserProfile, entries: &dyn EntryStore) {
        if self.hydrated {
            tracing::debug!("session already hydrated, skipping");
            return;
        }
        self.hydrated = true;
        self.phase = SessionPhase::Hydrating;

        if self.cache.hydrate_from_disk() {
            tracing::debug!(entries = self.cache.len(), "hydrated cache from durable blob");
        } else {
            self.remote_loading = true;
            match entries.list_entries() {
                Ok(snapshot) => {
                    if let Err(err) = self.cache.hydrate_from_remote(snapshot) {
                        tracing::warn!(
                            err = %format!("{err:#}"),
                            "failed to mirror remote snapshot to durable storage"
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(?err, "remote hydration failed, continuing with empty cache");
                }
            }
            self.remote_loading = false;
        }

        self.display_name = Some(self.resolve_display_name(&profile, entries));
        self.profile = Some(profile);
        self.scheduler
            .load_for_date(self.active_date, self.cache.get(self.active_date));
        self.phase = SessionPhase::Ready;
    }

    /// Stored profile name wins; otherwise derive one from the sign-in
    /// metadata and write the derivation back, best effort.
    fn resolve_display_name(&self, profile: &UserProfile, entries: &dyn EntryStore) -> String {
        match entries.fetch_profile_name() {
            Ok(Some(name)) if !name.trim().is_empty() => name,
            Ok(_) | Err(_) => {
                let derived = profile.derived_name();
                if let Err(err) = entries.upsert_profile_name(&derived) {
                    tracing::warn!(?err, "failed to upsert derived profile name");
                }
                derived
            }
        }
    }

    pub fn set_display_name(&mut self, name: &str, entries: &dyn EntryStore) -> Result<()> {
        self.display_name = Some(name.to_string());
        entries
            .upsert_profile_name(name)
            .context("persisting renamed profile")?;
        Ok(())
    }

    /// Navigate to another date: the draft is resolved from the cache
    /// (populated or cleared) as a programmatic load, never a qualifying
    /// edit. An in-flight commit for the previous date is unaffected.
    pub fn set_active_date(&mut self, date: Date) {
        self.active_date = date;
        self.scheduler.load_for_date(date, self.cache.get(date));
    }

    pub fn content_edited(&mut self, content: &str, now: Instant) {
        self.scheduler.content_edited(content, now);
    }

    pub fn mood_selected(&mut self, mood: Option<Mood>, now: Instant) {
        self.scheduler.mood_selected(mood, now);
    }

    pub fn stage_attachment(
        &mut self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
        now: Instant,
    ) -> String {
        self.scheduler
            .stage_attachment(file_name, content_type, bytes, now)
    }

    pub fn remove_attachment(&mut self, url: &str, now: Instant) {
        self.scheduler.remove_attachment(url, now);
    }

    /// Tab-visibility content repair: if the draft lost its content while
    /// the cache still holds some for the active date, restore it without
    /// arming a save. Throttled to once per second.
    pub fn refresh_draft_from_cache(&mut self, now: Instant) {
        if let Some(last) = self.last_repair {
            if now.duration_since(last) < REPAIR_THROTTLE {
                return;
            }
        }
        self.last_repair = Some(now);

        if self.scheduler.is_user_editing() || !self.scheduler.draft().content().is_empty() {
            return;
        }
        if let Some(entry) = self.cache.get(self.active_date) {
            if !entry.content.is_empty() {
                tracing::debug!(date = %self.active_date, "restoring draft content from cache");
                let content = entry.content.clone();
                self.scheduler.restore_content(&content);
            }
        }
    }

    /// Drive the autosave debounce. At most one commit runs per call; the
    /// hooks bracket it so the embedder can preserve focus/scroll state.
    pub fn tick(
        &mut self,
        now: Instant,
        entries: &dyn EntryStore,
        attachments: &dyn AttachmentStore,
        hooks: &mut dyn CommitHooks,
    ) -> Result<Option<SaveEvent>> {
        if self.phase != SessionPhase::Ready || !self.config.auto_save.enabled {
            return Ok(None);
        }
        let Some(ticket) = self.scheduler.poll(now) else {
            return Ok(None);
        };

        hooks.before_commit();
        let outcome = ticket.execute(entries, attachments);
        let event = self.scheduler.complete(ticket, outcome, now, &mut self.cache);
        hooks.after_commit();
        event.map(Some)
    }

    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        search::search(&self.cache, query, &self.config.search)
    }

    /// Date -> mood mapping for the calendar, cache-only.
    pub fn calendar_moods(&self) -> BTreeMap<Date, Mood> {
        self.cache.moods()
    }

    /// Clear everything a session accumulated: cache, durable blob, draft,
    /// and all guards. The hydration guard resets so the next sign-in
    /// hydrates again.
    pub fn logout(&mut self) -> Result<()> {
        self.phase = SessionPhase::Unauthenticated;
        self.hydrated = false;
        self.remote_loading = false;
        self.profile = None;
        self.display_name = None;
        self.last_repair = None;
        self.scheduler.reset(self.active_date);
        self.cache.clear().context("clearing cache on logout")
    }
}
