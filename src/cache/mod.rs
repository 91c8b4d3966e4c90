//! Authoritative in-process map of date -> committed entry, mirrored to a
//! single durable blob so a later session restart observes the last
//! committed state without a network round trip.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use time::Date;

use crate::entry::{JournalEntry, Mood};

const BLOB_TMP_EXTENSION: &str = "json.tmp";

#[serde_as]
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheSnapshot {
    #[serde_as(as = "Vec<(_, _)>")]
    entries: BTreeMap<Date, JournalEntry>,
}

/// The durable mirror: one serialized blob, overwritten wholesale on every
/// cache mutation and removed wholesale on logout.
#[derive(Debug, Clone)]
pub struct CacheFile {
    path: PathBuf,
}

impl CacheFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the blob if present. A corrupt or unreadable blob degrades to
    /// "no durable cache" rather than failing the session.
    pub fn load(&self) -> Option<BTreeMap<Date, JournalEntry>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(?err, path = %self.path.display(), "unreadable cache blob");
                return None;
            }
        };
        match serde_json::from_slice::<CacheSnapshot>(&raw) {
            Ok(snapshot) => Some(snapshot.entries),
            Err(err) => {
                tracing::warn!(?err, path = %self.path.display(), "corrupt cache blob, ignoring");
                None
            }
        }
    }

    fn persist(&self, entries: &BTreeMap<Date, JournalEntry>) -> Result<()> {
        let snapshot = CacheSnapshot {
            entries: entries.clone(),
        };
        let json = serde_json::to_vec(&snapshot).context("serialising cache blob")?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating cache dir {}", parent.display()))?;
        }
        let tmp_path = self.path.with_extension(BLOB_TMP_EXTENSION);
        fs::write(&tmp_path, &json)
            .with_context(|| format!("writing temporary cache blob {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!("atomically persisting cache blob {}", self.path.display())
        })?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("removing cache blob {}", self.path.display()))
            }
        }
    }
}

/// In-memory entry map plus its durable mirror. Mutated only through bulk
/// hydration and `reconcile`; readers always see fully committed snapshots.
#[derive(Debug)]
pub struct LocalCache {
    entries: BTreeMap<Date, JournalEntry>,
    file: CacheFile,
}

impl LocalCache {
    pub fn new(file: CacheFile) -> Self {
        Self {
            entries: BTreeMap::new(),
            file,
        }
    }

    /// Replace the map from the durable blob. Returns whether a non-empty
    /// snapshot was found; callers skip the loading indicator on this path.
    pub fn hydrate_from_disk(&mut self) -> bool {
        match self.file.load() {
            Some(entries) if !entries.is_empty() => {
                self.entries = entries;
                true
            }
            _ => false,
        }
    }

    /// Replace the map from a full remote snapshot and write it through.
    pub fn hydrate_from_remote(
        &mut self,
        entries: impl IntoIterator<Item = JournalEntry>,
    ) -> Result<()> {
        self.entries = entries
            .into_iter()
            .map(|entry| (entry.date, entry))
            .collect();
        self.file.persist(&self.entries)
    }

    pub fn get(&self, date: Date) -> Option<&JournalEntry> {
        self.entries.get(&date)
    }

    /// Single upsert path for committed entries, called identically after
    /// insert and update commits. Skips the durable write when the committed
    /// entry equals the cached one.
    pub fn reconcile(&mut self, committed: JournalEntry) -> Result<()> {
        if self.entries.get(&committed.date) == Some(&committed) {
            return Ok(());
        }
        self.entries.insert(committed.date, committed);
        self.file.persist(&self.entries)
    }

    /// Logout only: empty the map and delete the blob.
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.file.remove()
    }

    /// Date -> mood mapping for the calendar view, cache-only.
    pub fn moods(&self) -> BTreeMap<Date, Mood> {
        self.entries
            .iter()
            .filter_map(|(date, entry)| entry.mood.map(|mood| (*date, mood)))
            .collect()
    }

    /// Entries most recent first; feeds the search view.
    pub fn iter_desc(&self) -> impl Iterator<Item = &JournalEntry> {
        self.entries.values().rev()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
