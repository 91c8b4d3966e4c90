use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use time::{Date, OffsetDateTime};

/// Closed set of mood labels an entry may carry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum Mood {
    Happy,
    Calm,
    Sad,
    Anxious,
    Tired,
}

impl Mood {
    pub fn emoji(self) -> &'static str {
        match self {
            Mood::Happy => "\u{1F60A}",
            Mood::Calm => "\u{1F60C}",
            Mood::Sad => "\u{1F622}",
            Mood::Anxious => "\u{1F630}",
            Mood::Tired => "\u{1F634}",
        }
    }

    /// Accent color used by the mood calendar, as a hex triplet.
    pub fn calendar_color(self) -> &'static str {
        match self {
            Mood::Happy => "#FFB347",
            Mood::Calm => "#87CEEB",
            Mood::Sad => "#708090",
            Mood::Anxious => "#FF6B6B",
            Mood::Tired => "#9370DB",
        }
    }

    pub fn all() -> impl Iterator<Item = Mood> {
        Mood::iter()
    }
}

/// One journal entry: the unit both the remote store and the local cache
/// agree on. `content` is an opaque rich-text blob; the engine never
/// interprets it beyond a plain-text projection for search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub date: Date,
    pub content: String,
    pub mood: Option<Mood>,
    /// Durable attachment URLs, first-seen order. Never contains a
    /// session-local reference once persisted.
    #[serde(default)]
    pub attachments: Vec<String>,
    pub updated_at: OffsetDateTime,
}

impl JournalEntry {
    pub fn new(date: Date) -> Self {
        Self {
            date,
            content: String::new(),
            mood: None,
            attachments: Vec::new(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    /// An entry with no trimmed content, no mood, and no attachments is a
    /// draft placeholder and must never be materialized remotely.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.mood.is_none() && self.attachments.is_empty()
    }
}
