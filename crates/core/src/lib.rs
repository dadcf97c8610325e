//! Sift core types: queries, candidate sources and ranking configuration.
//!
//! Everything that more than one Sift crate needs lives here so the scorer and
//! the ranked filter can meet at trait seams instead of depending on each other.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default size of the sorted best-of list kept during a ranking pass.
pub const DEFAULT_TOP_K: usize = 100;

/// Default number of pre-filter survivors scored before a pass yields.
pub const DEFAULT_MAX_BATCH: usize = 1000;

/// Single-character upper-case mapping.
///
/// Characters whose upper case expands to more than one character (e.g. `ß`)
/// map to themselves so comparisons stay position-aligned.
pub fn upper_char(c: char) -> char {
    let mut it = c.to_uppercase();
    match (it.next(), it.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

/// Immutable query for one filtering pass, with an upper-cased mirror.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Query {
    text: String,
    chars: Vec<char>,
    upper: Vec<char>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let chars: Vec<char> = text.chars().collect();
        let upper = chars.iter().map(|c| upper_char(*c)).collect();
        Self { text, chars, upper }
    }

    pub fn as_str(&self) -> &str { &self.text }
    pub fn chars(&self) -> &[char] { &self.chars }
    pub fn upper(&self) -> &[char] { &self.upper }
    /// Length in characters.
    pub fn len(&self) -> usize { self.chars.len() }
    pub fn is_empty(&self) -> bool { self.chars.is_empty() }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self { Query::new(s) }
}

impl From<String> for Query {
    fn from(s: String) -> Self { Query::new(s) }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.text) }
}

/// Failure reported by a candidate source while producing a score.
///
/// Ranking treats these as per-item and recoverable: the candidate is kept,
/// just not ranked.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("candidate {index} unavailable: {reason}")]
    Unavailable { index: usize, reason: String },
    #[error("scoring candidate {index} failed: {reason}")]
    Score { index: usize, reason: String },
}

/// Scores one candidate text against a query. Implemented by `sift_score::Scorer`.
pub trait TextScorer {
    fn score(&mut self, query: &Query, text: &str) -> i32;
}

/// Delegate-owned collection of searchable candidates addressed by index.
///
/// Indices passed in are always `< item_count()`; anything else is a caller bug.
pub trait CandidateSource {
    fn item_count(&self) -> usize;

    /// Key used by the cheap pre-filter and by the default score.
    fn item_key_at(&self, index: usize) -> &str;

    /// Score candidate `index` for `query`. Higher ranks first.
    ///
    /// The default delegates to `scorer` over the item key; sources may swap in
    /// a domain metric (e.g. declaration order when the query is empty).
    fn item_score_at(
        &self,
        index: usize,
        query: &Query,
        scorer: &mut dyn TextScorer,
    ) -> Result<i32, SourceError> {
        Ok(scorer.score(query, self.item_key_at(index)))
    }
}

impl<T> CandidateSource for &T
where
    T: CandidateSource + ?Sized,
{
    fn item_count(&self) -> usize { (**self).item_count() }
    fn item_key_at(&self, index: usize) -> &str { (**self).item_key_at(index) }
    fn item_score_at(&self, index: usize, query: &Query, scorer: &mut dyn TextScorer) -> Result<i32, SourceError> {
        (**self).item_score_at(index, query, scorer)
    }
}

impl<T> CandidateSource for std::sync::Arc<T>
where
    T: CandidateSource + ?Sized,
{
    fn item_count(&self) -> usize { (**self).item_count() }
    fn item_key_at(&self, index: usize) -> &str { (**self).item_key_at(index) }
    fn item_score_at(&self, index: usize, query: &Query, scorer: &mut dyn TextScorer) -> Result<i32, SourceError> {
        (**self).item_score_at(index, query, scorer)
    }
}

/// Owned list of candidate keys.
///
/// With an empty query every item scores `-(index)`, so the default listing
/// keeps enumeration order; otherwise the scorer runs over the key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VecSource {
    items: Vec<String>,
}

impl VecSource {
    pub fn new(items: Vec<String>) -> Self { Self { items } }

    pub fn from_lines(text: &str) -> Self {
        Self::new(text.lines().map(str::trim_end).filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    pub fn items(&self) -> &[String] { &self.items }
    pub fn get(&self, index: usize) -> Option<&str> { self.items.get(index).map(String::as_str) }
}

impl CandidateSource for VecSource {
    fn item_count(&self) -> usize { self.items.len() }

    fn item_key_at(&self, index: usize) -> &str { &self.items[index] }

    fn item_score_at(&self, index: usize, query: &Query, scorer: &mut dyn TextScorer) -> Result<i32, SourceError> {
        if query.is_empty() {
            let rank = i32::try_from(index).map_err(|_| SourceError::Unavailable {
                index,
                reason: "index exceeds i32 range".into(),
            })?;
            return Ok(-rank);
        }
        Ok(scorer.score(query, &self.items[index]))
    }
}

impl FromIterator<String> for VecSource {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self { Self::new(iter.into_iter().collect()) }
}

/// Tunables for a ranking pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankConfig {
    /// Size of the sorted best-of list.
    pub top_k: usize,
    /// Pre-filter survivors scored per batch before yielding.
    pub max_batch: usize,
}

impl Default for RankConfig {
    fn default() -> Self { Self { top_k: DEFAULT_TOP_K, max_batch: DEFAULT_MAX_BATCH } }
}

impl RankConfig {
    /// Defaults overridden by `SIFT_TOP_K` / `SIFT_MAX_BATCH` when set.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_usize("SIFT_TOP_K") { cfg.top_k = v; }
        if let Some(v) = env_usize("SIFT_MAX_BATCH") { cfg.max_batch = v; }
        cfg.sanitized()
    }

    /// Zero would stall a pass (batch) or drop every result (top_k); clamp to 1.
    pub fn sanitized(self) -> Self {
        Self { top_k: self.top_k.max(1), max_batch: self.max_batch.max(1) }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "ignoring invalid numeric setting");
            None
        }
    }
}

pub mod prelude {
    pub use super::{CandidateSource, Query, RankConfig, SourceError, TextScorer, VecSource};
}
