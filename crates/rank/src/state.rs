//! Per-generation ranking bookkeeping: capped best list, overflow and remainder.

/// Where an offered candidate ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Best,
    /// Entered the best list and pushed the former last entry into overflow.
    BestEvicting(usize),
    Remainder,
}

/// Ranking state for one query generation.
///
/// `best_items`/`best_scores` are parallel and score-descending, at most
/// `top_k` long. `overflow` holds evictions in eviction order, `remainder`
/// everything that never made the list, in enumeration order.
#[derive(Debug, Clone)]
pub struct RankingState {
    top_k: usize,
    best_scores: Vec<i32>,
    best_items: Vec<usize>,
    overflow: Vec<usize>,
    remainder: Vec<usize>,
    cursor: usize,
    min_best_score: i32,
}

impl RankingState {
    pub fn new(top_k: usize) -> Self {
        let top_k = top_k.max(1);
        Self {
            top_k,
            best_scores: Vec::with_capacity(top_k + 1),
            best_items: Vec::with_capacity(top_k + 1),
            overflow: Vec::new(),
            remainder: Vec::new(),
            cursor: 0,
            min_best_score: 0,
        }
    }

    pub fn top_k(&self) -> usize { self.top_k }
    pub fn best_items(&self) -> &[usize] { &self.best_items }
    pub fn best_scores(&self) -> &[i32] { &self.best_scores }
    pub fn overflow(&self) -> &[usize] { &self.overflow }
    pub fn remainder(&self) -> &[usize] { &self.remainder }
    /// Next candidate index to evaluate.
    pub fn cursor(&self) -> usize { self.cursor }
    /// Lowest score currently in the best list (0 before the first insert).
    pub fn min_best_score(&self) -> i32 { self.min_best_score }

    /// Candidates placed so far across all three lists.
    pub fn len(&self) -> usize { self.best_items.len() + self.overflow.len() + self.remainder.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub(crate) fn set_cursor(&mut self, cursor: usize) { self.cursor = cursor; }

    /// Place a scored candidate.
    ///
    /// Enters the best list when it beats the current minimum or the list has
    /// room; it goes after every entry with an equal or greater score, so ties
    /// keep discovery order.
    pub fn offer(&mut self, item: usize, score: i32) -> Placement {
        if !(score > self.min_best_score || self.best_scores.len() < self.top_k) {
            self.remainder.push(item);
            return Placement::Remainder;
        }
        let at = self.best_scores.partition_point(|s| *s >= score);
        self.best_scores.insert(at, score);
        self.best_items.insert(at, item);
        let mut placement = Placement::Best;
        if self.best_items.len() > self.top_k {
            if let Some(evicted) = self.best_items.pop() {
                self.overflow.push(evicted);
                placement = Placement::BestEvicting(evicted);
            }
            self.best_scores.pop();
        }
        if let Some(last) = self.best_scores.last() {
            self.min_best_score = *last;
        }
        placement
    }

    /// Keep a candidate without ranking it (e.g. its score could not be computed).
    pub fn push_unranked(&mut self, item: usize) { self.remainder.push(item); }

    /// `best ++ overflow ++ remainder`.
    pub fn ordered(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.best_items);
        out.extend_from_slice(&self.overflow);
        out.extend_from_slice(&self.remainder);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_keep_discovery_order() {
        let mut st = RankingState::new(10);
        st.offer(0, 5);
        st.offer(1, 7);
        st.offer(2, 5);
        st.offer(3, 7);
        assert_eq!(st.best_items(), &[1, 3, 0, 2]);
        assert_eq!(st.best_scores(), &[7, 7, 5, 5]);
        assert_eq!(st.min_best_score(), 5);
    }

    #[test]
    fn eviction_goes_to_overflow_in_order() {
        let mut st = RankingState::new(2);
        assert_eq!(st.offer(0, 1), Placement::Best);
        assert_eq!(st.offer(1, 2), Placement::Best);
        assert_eq!(st.offer(2, 3), Placement::BestEvicting(0));
        assert_eq!(st.offer(3, 4), Placement::BestEvicting(1));
        // Equal to the minimum is not enough once the list is full.
        assert_eq!(st.offer(4, 3), Placement::Remainder);
        assert_eq!(st.best_items(), &[3, 2]);
        assert_eq!(st.overflow(), &[0, 1]);
        assert_eq!(st.remainder(), &[4]);
        assert_eq!(st.ordered(), vec![3, 2, 0, 1, 4]);
        assert_eq!(st.len(), 5);
    }

    #[test]
    fn negative_scores_fill_then_fall_through() {
        let mut st = RankingState::new(2);
        st.offer(0, 0);
        st.offer(1, -1);
        assert_eq!(st.offer(2, -2), Placement::Remainder);
        st.push_unranked(3);
        assert_eq!(st.ordered(), vec![0, 1, 2, 3]);
    }
}
