//! Sift scorer: path-aware fuzzy similarity between a query and a candidate.
//!
//! Dynamic programming over (query char, text char). Every cell either picks
//! the text character for the query character (diagonal move, extending or
//! starting a run) or skips it (horizontal move). Picking pays a bonus that
//! favours path-token starts, word starts, exact upper-case hits, matches in
//! the file-name segment and long contiguous runs.
//!
//! Positions reported by match reconstruction are character indices.

#![forbid(unsafe_code)]

use sift_core::{upper_char, Query, TextScorer};
use smallvec::SmallVec;

/// Matched character positions, ascending.
pub type Matches = SmallVec<[usize; 16]>;

const BASE: i32 = 10;

/// Reusable `score`/`run` scratch grids, stored row-major in flat buffers.
///
/// Grows geometrically when a call needs more than `capacity()` cells and is
/// never shrunk. Cells are fully rewritten on every fill, so no clearing.
#[derive(Debug, Default, Clone)]
pub struct ScoreMatrix {
    score: Vec<i32>,
    run: Vec<u32>,
    rows: usize,
    cols: usize,
}

impl ScoreMatrix {
    pub fn capacity(&self) -> usize { self.score.len() }
    pub fn rows(&self) -> usize { self.rows }
    pub fn cols(&self) -> usize { self.cols }

    /// Best cumulative score aligning query[..=i] within text[..=j] from the last fill.
    pub fn score_at(&self, i: usize, j: usize) -> i32 { self.score[self.at(i, j)] }

    /// Length of the consecutive-match run ending at (i, j); 0 means the cell skipped.
    pub fn run_at(&self, i: usize, j: usize) -> u32 { self.run[self.at(i, j)] }

    fn reset(&mut self, rows: usize, cols: usize) {
        let need = rows * cols;
        if need > self.score.len() {
            let cap = need.max(self.score.len() * 2);
            self.score.resize(cap, 0);
            self.run.resize(cap, 0);
        }
        self.rows = rows;
        self.cols = cols;
    }

    #[inline]
    fn at(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < self.rows && j < self.cols);
        i * self.cols + j
    }
}

/// Borrowed view of one (query, text) pair while filling the matrix.
struct Pair<'a> {
    query: &'a Query,
    text: &'a [char],
    text_upper: &'a [char],
    /// First character after the last `/`, 0 when there is none.
    file_start: usize,
}

impl Pair<'_> {
    fn is_word_start(&self, j: usize) -> bool {
        if j == 0 {
            return true;
        }
        let prev = self.text[j - 1];
        matches!(prev, '_' | '-' | '/') || (prev != self.text_upper[j - 1] && self.text[j] == self.text_upper[j])
    }

    /// Bonus for matching query[i] at text[j], or 0 when the characters differ.
    fn bonus(&self, i: usize, j: usize, run_len: u32) -> i32 {
        if self.query.upper()[i] != self.text_upper[j] {
            return 0;
        }
        let path_token_start = j == 0 || self.text[j - 1] == '/';
        let file_name = j >= self.file_start;
        let mut score = BASE;
        if run_len > 0 {
            if file_name { score += 4; }
            if path_token_start { score += 5; }
            return score + run_len as i32 * 4;
        }
        let word_start = self.is_word_start(j);
        let q = self.query.chars()[i];
        let caps_match = q == self.text[j] && q == self.query.upper()[i];
        if path_token_start { score += 4; }
        if word_start { score += 2; }
        if caps_match { score += 6; }
        if file_name { score += 4; }
        if i == 0 && j == self.file_start { score += 5; }
        if file_name && word_start { score += 3; }
        score
    }
}

/// Scorer owning its scratch buffers. One per logical pass or worker thread.
#[derive(Debug, Default, Clone)]
pub struct Scorer {
    matrix: ScoreMatrix,
    text: Vec<char>,
    text_upper: Vec<char>,
}

impl Scorer {
    pub fn new() -> Self { Self::default() }

    /// Similarity of `text` to `query`; 0 when either is empty or nothing matches.
    pub fn score(&mut self, query: &Query, text: &str) -> i32 { self.fill(query, text) }

    /// Like [`Scorer::score`], also writing the matched positions into `out`.
    pub fn score_with_matches(&mut self, query: &Query, text: &str, out: &mut Matches) -> i32 {
        let score = self.fill(query, text);
        self.backtrack(out);
        score
    }

    /// Matrix left behind by the most recent call.
    pub fn matrix(&self) -> &ScoreMatrix { &self.matrix }

    fn fill(&mut self, query: &Query, text: &str) -> i32 {
        let Self { matrix, text: chars, text_upper } = self;
        chars.clear();
        chars.extend(text.chars());
        text_upper.clear();
        text_upper.extend(chars.iter().map(|c| upper_char(*c)));

        let (n, m) = (query.len(), chars.len());
        if n == 0 || m == 0 {
            matrix.reset(0, 0);
            return 0;
        }
        matrix.reset(n, m);
        let pair = Pair {
            query,
            text: chars.as_slice(),
            text_upper: text_upper.as_slice(),
            file_start: chars.iter().rposition(|c| *c == '/').map_or(0, |p| p + 1),
        };

        for i in 0..n {
            for j in 0..m {
                let skip = if j > 0 { matrix.score[matrix.at(i, j - 1)] } else { 0 };
                let (prev_diag, run_len) = if i > 0 && j > 0 {
                    let k = matrix.at(i - 1, j - 1);
                    (matrix.score[k], matrix.run[k])
                } else {
                    (0, 0)
                };
                let pick = pair.bonus(i, j, run_len);
                let k = matrix.at(i, j);
                if pick > 0 && prev_diag + pick >= skip {
                    matrix.run[k] = run_len + 1;
                    matrix.score[k] = prev_diag + pick;
                } else {
                    matrix.run[k] = 0;
                    matrix.score[k] = skip;
                }
            }
        }
        matrix.score[matrix.at(n - 1, m - 1)]
    }

    fn backtrack(&self, out: &mut Matches) {
        out.clear();
        let m = &self.matrix;
        if m.rows == 0 || m.cols == 0 {
            return;
        }
        let (mut i, mut j) = (m.rows - 1, m.cols - 1);
        loop {
            if m.run_at(i, j) == 0 {
                if j == 0 { break; }
                j -= 1;
            } else {
                out.push(j);
                if i == 0 || j == 0 { break; }
                i -= 1;
                j -= 1;
            }
        }
        out.reverse();
    }
}

impl TextScorer for Scorer {
    fn score(&mut self, query: &Query, text: &str) -> i32 { Scorer::score(self, query, text) }
}

/// One-off score with a throwaway scorer.
pub fn score(query: &Query, text: &str) -> i32 { Scorer::new().score(query, text) }

/// One-off score plus matched positions (ascending character indices).
pub fn score_with_matches(query: &Query, text: &str) -> (i32, Matches) {
    let mut out = Matches::new();
    let s = Scorer::new().score_with_matches(query, text, &mut out);
    (s, out)
}

/// Wrap matched characters of `text` in `open`/`close`, merging adjacent positions.
///
/// Positions are character indices as produced by [`score_with_matches`];
/// out-of-range positions are ignored.
pub fn highlight(text: &str, positions: &[usize], open: &str, close: &str) -> String {
    let mut out = String::with_capacity(text.len() + positions.len() * (open.len() + close.len()));
    let mut pos = positions.iter().peekable();
    let mut inside = false;
    for (idx, c) in text.chars().enumerate() {
        while pos.peek().is_some_and(|p| **p < idx) {
            pos.next();
        }
        let hit = pos.peek().is_some_and(|p| **p == idx);
        if hit && !inside {
            out.push_str(open);
            inside = true;
        } else if !hit && inside {
            out.push_str(close);
            inside = false;
        }
        out.push(c);
    }
    if inside {
        out.push_str(close);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Query { Query::new(s) }

    #[test]
    fn empty_inputs_score_zero() {
        assert_eq!(score(&q(""), "anything"), 0);
        assert_eq!(score(&q("abc"), ""), 0);
        let (s, m) = score_with_matches(&q(""), "abc");
        assert_eq!(s, 0);
        assert!(m.is_empty());
    }

    #[test]
    fn non_matching_pair_scores_zero() {
        assert_eq!(score(&q("zz"), "abc"), 0);
    }

    #[test]
    fn single_char_bonuses() {
        // 10 base + 4 path token + 2 word + 4 file name + 5 first-in-file + 3 file word
        assert_eq!(score(&q("a"), "a"), 28);
        // Case-insensitive match without the caps bonus
        assert_eq!(score(&q("A"), "a"), 28);
        // Exact upper-case hit adds 6
        assert_eq!(score(&q("A"), "A"), 34);
    }

    #[test]
    fn run_continuation_bonus() {
        // a: 28, b continues a run of 1: 10 + 4 file + 4*1
        assert_eq!(score(&q("ab"), "ab"), 46);
        // bar in the file-name segment: 28 + 18 + 22
        assert_eq!(score(&q("bar"), "foo/bar.js"), 68);
        assert_eq!(score(&q("bar"), "foo/baz.js"), 46);
    }

    #[test]
    fn contiguous_run_beats_scattered() {
        assert_eq!(score(&q("ab"), "xabx"), 32);
        assert_eq!(score(&q("ab"), "xaxb"), 28);
        assert!(score(&q("ab"), "xabx") > score(&q("ab"), "xaxb"));
    }

    #[test]
    fn path_token_start_beats_mid_word() {
        let aligned = score(&q("ap"), "src/ap.js");
        let mid = score(&q("ap"), "srcxap.js");
        assert_eq!(aligned, 46);
        assert_eq!(mid, 32);
        assert!(aligned > mid);
    }

    #[test]
    fn camel_case_transition_counts_as_word_start() {
        assert!(score(&q("b"), "fooBar") > score(&q("b"), "foobar"));
    }

    #[test]
    fn deterministic_and_buffer_reuse_safe() {
        let mut s = Scorer::new();
        let long = "a/very/long/path/to/some/deeply/nested/component_file_name.rs";
        let first = s.score_with_matches(&q("cfn"), long, &mut Matches::new());
        // A bigger fill in between must not leak state into the next call.
        s.score(&q("abcdefghij"), &long.repeat(4));
        let mut m1 = Matches::new();
        let again = s.score_with_matches(&q("cfn"), long, &mut m1);
        assert_eq!(first, again);
        assert_eq!(score_with_matches(&q("cfn"), long), (again, m1));
    }

    #[test]
    fn matrix_grows_and_never_shrinks() {
        let mut s = Scorer::new();
        s.score(&q("abc"), "abcdef");
        let cap = s.matrix().capacity();
        assert!(cap >= 18);
        s.score(&q("a"), "a");
        assert_eq!(s.matrix().capacity(), cap);
        s.score(&q("abcd"), "abcdefghijkl");
        assert!(s.matrix().capacity() >= 48);
    }

    #[test]
    fn skip_never_loses() {
        let mut s = Scorer::new();
        let text = "src/components/SearchBox_view-model.tsx";
        s.score(&q("sbvm"), text);
        let m = s.matrix();
        for i in 0..m.rows() {
            for j in 1..m.cols() {
                assert!(m.score_at(i, j) >= m.score_at(i, j - 1), "cell ({i},{j})");
            }
        }
    }

    #[test]
    fn matches_are_ascending_and_equal_ignoring_case() {
        let text = "lib/Http/RequestHandler.rs";
        let query = q("rqh");
        let (s, m) = score_with_matches(&query, text);
        assert!(s > 0);
        assert_eq!(m.len(), 3);
        assert!(m.windows(2).all(|w| w[0] < w[1]));
        let chars: Vec<char> = text.chars().collect();
        for (qi, pos) in m.iter().enumerate() {
            assert_eq!(upper_char(chars[*pos]), query.upper()[qi]);
        }
    }

    #[test]
    fn matches_prefer_file_name_run() {
        let (_, m) = score_with_matches(&q("bar"), "foo/bar.js");
        assert_eq!(m.as_slice(), &[4, 5, 6]);
    }

    /// Best total over every alignment that places all query characters,
    /// with runs taken from the alignment itself. `None` when there is none.
    fn best_alignment(query: &Query, text: &str) -> Option<i32> {
        fn walk(pair: &Pair<'_>, i: usize, from: usize, prev: Option<usize>, run: u32) -> Option<i32> {
            if i == pair.query.len() {
                return Some(0);
            }
            let mut best = None;
            for j in from..pair.text.len() {
                let run_len = if prev.is_some_and(|p| p + 1 == j) { run } else { 0 };
                let pick = pair.bonus(i, j, run_len);
                if pick == 0 {
                    continue;
                }
                if let Some(rest) = walk(pair, i + 1, j + 1, Some(j), run_len + 1) {
                    best = best.max(Some(pick + rest));
                }
            }
            best
        }
        let chars: Vec<char> = text.chars().collect();
        let upper: Vec<char> = chars.iter().map(|c| upper_char(*c)).collect();
        let pair = Pair {
            query,
            text: &chars,
            text_upper: &upper,
            file_start: chars.iter().rposition(|c| *c == '/').map_or(0, |p| p + 1),
        };
        walk(&pair, 0, 0, None, 0)
    }

    #[test]
    fn matches_exhaustive_alignment_search_when_letters_are_unique() {
        const ALPHABET: [char; 6] = ['a', 'b', 'x', '/', '_', 'B'];
        for query in ["ab", "ba", "aB", "a/b"].map(q) {
            let mut checked = 0;
            for len in 1..=5u32 {
                for mut code in 0..ALPHABET.len().pow(len) {
                    let mut text = String::new();
                    for _ in 0..len {
                        text.push(ALPHABET[code % ALPHABET.len()]);
                        code /= ALPHABET.len();
                    }
                    let unique = query
                        .upper()
                        .iter()
                        .all(|u| text.chars().filter(|c| upper_char(*c) == *u).count() <= 1);
                    let Some(best) = best_alignment(&query, &text) else { continue };
                    if !unique {
                        continue;
                    }
                    assert_eq!(score(&query, &text), best, "{query} vs {text:?}");
                    checked += 1;
                }
            }
            assert!(checked > 0, "{query}");
        }
        assert!(best_alignment(&q("ab"), "xabx") > best_alignment(&q("ab"), "xaxb"));
    }

    #[test]
    fn repeated_letters_keep_the_greedy_run() {
        // Each cell keeps only its own best; a longer run through a weaker
        // cell is not revisited.
        assert_eq!(score(&q("aA"), "A/__aAx"), 37);
        assert_eq!(best_alignment(&q("aA"), "A/__aAx"), Some(41));
    }

    #[test]
    fn highlight_merges_runs() {
        assert_eq!(highlight("foo/bar.js", &[4, 5, 6], "[", "]"), "foo/[bar].js");
        assert_eq!(highlight("xaxb", &[1, 3], "<", ">"), "x<a>x<b>");
        assert_eq!(highlight("ab", &[0, 1, 9], "*", "*"), "*ab*");
        assert_eq!(highlight("ab", &[], "*", "*"), "ab");
    }
}
