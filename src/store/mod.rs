//! External collaborators: the hosted row store and the blob store.
//!
//! The engine never talks to a backend directly; it is handed
//! implementations of these traits and treats every call as a best-effort
//! suspension point. All methods are scoped to the authenticated user the
//! implementation was built for.

use thiserror::Error;
use time::Date;

use crate::entry::JournalEntry;

pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend unavailable")]
    Unavailable,
    #[error("backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Remote persistence for journal rows, keyed by (user, date).
pub trait EntryStore {
    /// Full snapshot of every entry for the user, used once per session to
    /// hydrate the local cache.
    fn list_entries(&self) -> StoreResult<Vec<JournalEntry>>;

    fn get_entry(&self, date: Date) -> StoreResult<Option<JournalEntry>>;

    fn insert_entry(&self, entry: &JournalEntry) -> StoreResult<()>;

    fn update_entry(&self, entry: &JournalEntry) -> StoreResult<()>;

    fn fetch_profile_name(&self) -> StoreResult<Option<String>>;

    fn upsert_profile_name(&self, name: &str) -> StoreResult<()>;
}

/// Blob upload. Returns a durable content URL, stable across sessions.
pub trait AttachmentStore {
    fn store(&self, bytes: &[u8], content_type: &str) -> StoreResult<String>;
}

/// Identity details handed over by the auth collaborator on sign-in.
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl UserProfile {
    /// Fallback display name: metadata name, then the email local-part,
    /// then a generic placeholder.
    pub fn derived_name(&self) -> String {
        if let Some(name) = self.display_name.as_deref() {
            if !name.trim().is_empty() {
                return name.trim().to_string();
            }
        }
        if let Some(email) = self.email.as_deref() {
            if let Some(local) = email.split('@').next() {
                if !local.is_empty() {
                    return local.to_string();
                }
            }
        }
        "User".to_string()
    }
}

/// Session-change notification from the auth collaborator. The engine
/// subscribes to these to drive hydration and logout-driven clearing.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SignedIn(UserProfile),
    SignedOut,
}
