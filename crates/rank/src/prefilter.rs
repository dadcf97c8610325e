//! Cheap subsequence reject run over candidate keys before the DP scorer.
//!
//! Case is folded with [`upper_char`] on both sides, the same mapping the
//! scorer compares with, so a key the scorer would match is never dropped.

use std::borrow::Cow;

use regex::Regex;
use sift_core::{upper_char, Query};
use tracing::warn;

/// Case-insensitive "query characters appear in order" test.
///
/// Compiled to `C0[^C1]*C1[^C2]*C2...` over the upper-cased query and matched
/// case-sensitively against the upper-cased key. An empty query accepts
/// everything.
#[derive(Debug, Clone)]
pub struct Prefilter {
    kind: Kind,
}

#[derive(Debug, Clone)]
enum Kind {
    All,
    Regex(Regex),
    /// Used when the pattern exceeds the regex size limit.
    Scan(Vec<char>),
}

/// Regex source for the upper-cased `query`; each character after the first is
/// preceded by a negated class of itself so matching never backtracks.
pub fn subsequence_pattern(query: &Query) -> String {
    let mut pattern = String::with_capacity(query.as_str().len() * 8);
    for (i, c) in query.upper().iter().enumerate() {
        let escaped = regex::escape(c.encode_utf8(&mut [0u8; 4]));
        if i > 0 {
            pattern.push_str("[^");
            pattern.push_str(&escaped);
            pattern.push_str("]*");
        }
        pattern.push_str(&escaped);
    }
    pattern
}

impl Prefilter {
    pub fn new(query: &Query) -> Self {
        if query.is_empty() {
            return Self { kind: Kind::All };
        }
        let pattern = subsequence_pattern(query);
        match Regex::new(&pattern) {
            Ok(re) => Self { kind: Kind::Regex(re) },
            Err(e) => {
                warn!(query_len = query.len(), error = %e, "prefilter regex rejected; scanning keys instead");
                Self { kind: Kind::Scan(query.upper().to_vec()) }
            }
        }
    }

    pub fn is_pass_through(&self) -> bool { matches!(self.kind, Kind::All) }

    pub fn accepts(&self, key: &str) -> bool {
        match &self.kind {
            Kind::All => true,
            Kind::Regex(re) => re.is_match(&upper_key(key)),
            Kind::Scan(upper) => {
                let mut want = upper.iter().peekable();
                for c in key.chars() {
                    match want.peek() {
                        Some(w) if **w == upper_char(c) => { want.next(); }
                        Some(_) => {}
                        None => break,
                    }
                }
                want.peek().is_none()
            }
        }
    }
}

/// `key` mapped through [`upper_char`]; borrowed when nothing changes.
fn upper_key(key: &str) -> Cow<'_, str> {
    if key.chars().all(|c| upper_char(c) == c) {
        Cow::Borrowed(key)
    } else {
        Cow::Owned(key.chars().map(upper_char).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_escapes_meta_characters() {
        assert_eq!(subsequence_pattern(&Query::new("ab")), "A[^B]*B");
        assert_eq!(subsequence_pattern(&Query::new("a.")), r"A[^\.]*\.");
        assert_eq!(subsequence_pattern(&Query::new("")), "");
    }

    #[test]
    fn accepts_subsequence_case_insensitively() {
        let f = Prefilter::new(&Query::new("bar"));
        assert!(f.accepts("foo/bar.js"));
        assert!(f.accepts("FOO/BAR.JS"));
        assert!(f.accepts("b_a_r"));
        assert!(!f.accepts("foo/baz.js"));
        assert!(!f.accepts("rab"));
    }

    #[test]
    fn meta_characters_match_literally() {
        let f = Prefilter::new(&Query::new("a.b"));
        assert!(f.accepts("a.b"));
        assert!(f.accepts("a-x.y-b"));
        assert!(!f.accepts("axb"));
        let g = Prefilter::new(&Query::new("[^]"));
        assert!(g.accepts("x[y^z]"));
        assert!(!g.accepts("[]"));
    }

    #[test]
    fn empty_query_passes_everything() {
        let f = Prefilter::new(&Query::new(""));
        assert!(f.is_pass_through());
        assert!(f.accepts(""));
        assert!(f.accepts("anything"));
    }

    #[test]
    fn folds_case_like_the_scorer() {
        // Dotless i upper-cases to I, as does i.
        assert!(Prefilter::new(&Query::new("id")).accepts("\u{131}d.rs"));
        assert!(Prefilter::new(&Query::new("\u{131}")).accepts("vim"));
        // Expanding upper case maps to itself.
        let sharp = Prefilter::new(&Query::new("\u{df}"));
        assert!(sharp.accepts("stra\u{df}e"));
        assert!(!sharp.accepts("STRASSE"));
        // Kelvin sign is its own upper case, distinct from K.
        assert!(!Prefilter::new(&Query::new("k")).accepts("\u{212a}"));
        assert!(Prefilter::new(&Query::new("\u{e9}t\u{e9}")).accepts("\u{c9}T\u{c9}.md"));
    }

    #[test]
    fn scan_fallback_agrees_with_regex() {
        let keys = [
            "lib/Http/RequestHandler.rs",
            "request",
            "RQH",
            "hqr",
            "",
            "\u{131}d.rs",
            "\u{130}D",
            "\u{c9}T\u{c9}.md",
            "stra\u{df}e",
            "STRASSE",
            "\u{212a}elvin",
            "\u{3a3}\u{3c3}\u{3c2}",
        ];
        for text in ["rqh", "id", "\u{131}", "\u{e9}t\u{e9}", "\u{df}", "k", "\u{3c3}\u{3c2}"] {
            let q = Query::new(text);
            let scan = Prefilter { kind: Kind::Scan(q.upper().to_vec()) };
            let re = Prefilter::new(&q);
            for key in keys {
                assert_eq!(scan.accepts(key), re.accepts(key), "{text} vs {key}");
            }
        }
    }
}
