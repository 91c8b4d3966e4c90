//! Derived full-text view over the local cache. No remote calls: matching,
//! snippets, and highlighting are computed synchronously from committed
//! entries.

use std::time::Instant;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use time::Date;
use unicode_segmentation::UnicodeSegmentation;

use crate::cache::LocalCache;
use crate::config::SearchOptions;
use crate::entry::Mood;
use crate::journaling::DebounceTimer;

static TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid markup-strip pattern"));

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub date: Date,
    /// Context window around the first occurrence, with every occurrence
    /// wrapped in `<mark>`/`</mark>` and `...` markers where truncated.
    pub snippet: String,
    pub mood: Option<Mood>,
}

/// Plain-text projection of the opaque content blob: tags removed, the
/// handful of entities rich-text editors emit decoded.
pub fn strip_markup(content: &str) -> String {
    let text = TAG_PATTERN.replace_all(content, "");
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Case-insensitive literal matcher for a user query. All metacharacters
/// are escaped, so pathological input can neither break compilation nor
/// match anything but the literal substring.
fn build_matcher(query: &str) -> Option<Regex> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return None;
    }
    RegexBuilder::new(&regex::escape(trimmed))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Grapheme window of `context` either side of the first occurrence, with
/// occurrences highlighted. Falls back to the leading `2 * context`
/// graphemes if the matcher unexpectedly finds nothing.
fn snippet(text: &str, matcher: &Regex, context: usize) -> String {
    let Some(found) = matcher.find(text) else {
        let fallback_len = context * 2;
        let graphemes: Vec<(usize, &str)> = text.grapheme_indices(true).collect();
        if graphemes.len() <= fallback_len {
            return text.to_string();
        }
        let end = graphemes[fallback_len].0;
        return format!("{}...", &text[..end]);
    };

    let prefix: Vec<usize> = text[..found.start()]
        .grapheme_indices(true)
        .map(|(idx, _)| idx)
        .collect();
    let start = if prefix.len() > context {
        prefix[prefix.len() - context]
    } else {
        0
    };
    let suffix: Vec<usize> = text[found.end()..]
        .grapheme_indices(true)
        .map(|(idx, _)| idx)
        .collect();
    let end = if suffix.len() > context {
        found.end() + suffix[context]
    } else {
        text.len()
    };

    let highlighted = matcher.replace_all(&text[start..end], "<mark>$0</mark>");
    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    out.push_str(&highlighted);
    if end < text.len() {
        out.push_str("...");
    }
    out
}

/// Ranked matches for `query`, most recent date first, computed entirely
/// from the local cache.
pub fn search(cache: &LocalCache, query: &str, options: &SearchOptions) -> Vec<SearchHit> {
    let Some(matcher) = build_matcher(query) else {
        return Vec::new();
    };
    cache
        .iter_desc()
        .filter_map(|entry| {
            let plain = strip_markup(&entry.content);
            if !matcher.is_match(&plain) {
                return None;
            }
            Some(SearchHit {
                date: entry.date,
                snippet: snippet(&plain, &matcher, options.context_graphemes),
                mood: entry.mood,
            })
        })
        .take(options.max_results)
        .collect()
}

/// Trailing debounce for the query input, so search recomputes once per
/// pause instead of on every keystroke.
#[derive(Debug)]
pub struct QueryDebounce {
    timer: DebounceTimer,
    pending: Option<String>,
}

impl QueryDebounce {
    pub fn new(quiet: std::time::Duration) -> Self {
        Self {
            timer: DebounceTimer::new(quiet),
            pending: None,
        }
    }

    pub fn input(&mut self, query: &str, now: Instant) {
        self.pending = Some(query.to_string());
        self.timer.rearm(now);
    }

    /// The query ready to run, once the input has been quiet long enough.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        if self.timer.fire(now) {
            self.pending.take()
        } else {
            None
        }
    }
}
