//! In-memory reference implementations of the store traits.
//!
//! Used by the crate's own tests and by embedders that want the engine
//! without a hosted backend. Failure injection mimics transient network
//! errors.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use time::Date;

use crate::entry::JournalEntry;
use crate::store::{AttachmentStore, EntryStore, StoreError, StoreResult};

#[derive(Debug, Default)]
pub struct MemoryEntryStore {
    entries: RefCell<BTreeMap<Date, JournalEntry>>,
    profile_name: RefCell<Option<String>>,
    fail_reads: Cell<bool>,
    fail_writes: Cell<bool>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: impl IntoIterator<Item = JournalEntry>) -> Self {
        let store = Self::new();
        for entry in entries {
            store.entries.borrow_mut().insert(entry.date, entry);
        }
        store
    }

    /// Make every read return `StoreError::Unavailable` until reset.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.set(fail);
    }

    /// Make every insert/update/upsert return `StoreError::Unavailable`
    /// until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub fn entry(&self, date: Date) -> Option<JournalEntry> {
        self.entries.borrow().get(&date).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    fn check_read(&self) -> StoreResult<()> {
        if self.fail_reads.get() {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    fn check_write(&self) -> StoreResult<()> {
        if self.fail_writes.get() {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

impl EntryStore for MemoryEntryStore {
    fn list_entries(&self) -> StoreResult<Vec<JournalEntry>> {
        self.check_read()?;
        Ok(self.entries.borrow().values().cloned().collect())
    }

    fn get_entry(&self, date: Date) -> StoreResult<Option<JournalEntry>> {
        self.check_read()?;
        Ok(self.entries.borrow().get(&date).cloned())
    }

    fn insert_entry(&self, entry: &JournalEntry) -> StoreResult<()> {
        self.check_write()?;
        let mut entries = self.entries.borrow_mut();
        if entries.contains_key(&entry.date) {
            return Err(StoreError::Backend(format!(
                "duplicate entry for {}",
                entry.date
            )));
        }
        entries.insert(entry.date, entry.clone());
        Ok(())
    }

    fn update_entry(&self, entry: &JournalEntry) -> StoreResult<()> {
        self.check_write()?;
        let mut entries = self.entries.borrow_mut();
        match entries.get_mut(&entry.date) {
            Some(existing) => {
                *existing = entry.clone();
                Ok(())
            }
            None => Err(StoreError::Backend(format!(
                "no entry for {} to update",
                entry.date
            ))),
        }
    }

    fn fetch_profile_name(&self) -> StoreResult<Option<String>> {
        self.check_read()?;
        Ok(self.profile_name.borrow().clone())
    }

    fn upsert_profile_name(&self, name: &str) -> StoreResult<()> {
        self.check_write()?;
        *self.profile_name.borrow_mut() = Some(name.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryAttachmentStore {
    uploads: RefCell<Vec<Vec<u8>>>,
    fail_next: Cell<u32>,
}

impl MemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` uploads with `StoreError::Unavailable`.
    pub fn fail_next_uploads(&self, count: u32) {
        self.fail_next.set(count);
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.borrow().len()
    }
}

impl AttachmentStore for MemoryAttachmentStore {
    fn store(&self, bytes: &[u8], content_type: &str) -> StoreResult<String> {
        let pending = self.fail_next.get();
        if pending > 0 {
            self.fail_next.set(pending - 1);
            return Err(StoreError::Unavailable);
        }
        let mut uploads = self.uploads.borrow_mut();
        uploads.push(bytes.to_vec());
        let ext = match content_type.split('/').nth(1) {
            Some(subtype) if !subtype.is_empty() => subtype,
            _ => "bin",
        };
        Ok(format!("memory://attachments/{}.{ext}", uploads.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use time::macros::date;

    #[test]
    fn insert_then_update_round_trips() {
        let store = MemoryEntryStore::new();
        let mut entry = JournalEntry::new(date!(2024 - 03 - 05));
        entry.content = "first".into();
        store.insert_entry(&entry).unwrap();

        entry.content = "second".into();
        store.update_entry(&entry).unwrap();
        assert_eq!(store.entry(entry.date).unwrap().content, "second");

        assert_matches!(store.insert_entry(&entry), Err(StoreError::Backend(_)));
    }

    #[test]
    fn attachment_failure_injection_is_consumed() {
        let store = MemoryAttachmentStore::new();
        store.fail_next_uploads(1);
        assert_matches!(store.store(b"a", "image/png"), Err(StoreError::Unavailable));
        let url = store.store(b"b", "image/png").unwrap();
        assert!(url.ends_with(".png"));
        assert_eq!(store.upload_count(), 1);
    }
}
