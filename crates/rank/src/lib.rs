//! Sift ranked filter: incremental, cooperatively scheduled top-K selection.
//!
//! A pass walks every candidate once. Keys failing the subsequence pre-filter
//! are dropped; survivors are scored and placed in a capped best list, an
//! overflow list (evictions) or the unranked remainder. Work is cut into
//! batches of `max_batch` survivors. Between batches the caller regains
//! control and resumes with the [`Continuation`] it was handed, so the driver
//! decides what "next tick" means (event loop, async task, manual polling).
//!
//! Changing the query bumps a generation counter; continuations from older
//! generations resume as silent no-ops.

#![forbid(unsafe_code)]

use std::time::Instant;

use metrics::{counter, histogram};
use sift_core::{CandidateSource, Query, RankConfig};
use sift_score::Scorer;
use tracing::{debug, trace, warn};

pub mod prefilter;
pub mod state;

pub use prefilter::Prefilter;
pub use state::{Placement, RankingState};

/// Token for resuming the pass of one query generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Continuation {
    generation: u64,
}

impl Continuation {
    pub fn generation(&self) -> u64 { self.generation }
}

/// Outcome of running (or trying to run) one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Step {
    /// More candidates remain; resume with this token on the next tick.
    Yield(Continuation),
    /// The pass for the live generation finished.
    Complete,
    /// The token was superseded or its pass had already finished; nothing ran.
    Stale,
}

impl Step {
    pub fn continuation(self) -> Option<Continuation> {
        match self {
            Step::Yield(c) => Some(c),
            _ => None,
        }
    }
}

/// Counters for one pass, in the spirit of a search explain.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PassStats {
    pub generation: u64,
    pub total: usize,
    pub rejected: usize,
    pub scored: usize,
    pub failed: usize,
    pub evicted: usize,
    pub batches: usize,
    pub complete: bool,
    pub elapsed_ms: f64,
}

impl PassStats {
    /// Candidates that passed the pre-filter.
    pub fn surviving(&self) -> usize { self.scored + self.failed }
}

struct Pass {
    query: Query,
    prefilter: Prefilter,
    state: RankingState,
    stats: PassStats,
    started: Instant,
}

/// Ranking session over a [`CandidateSource`].
pub struct RankedFilter<S> {
    source: S,
    config: RankConfig,
    scorer: Scorer,
    generation: u64,
    pass: Option<Pass>,
    selected: Option<usize>,
    selected_rank: Option<usize>,
}

impl<S: CandidateSource> RankedFilter<S> {
    pub fn new(source: S) -> Self { Self::with_config(source, RankConfig::default()) }

    pub fn with_config(source: S, config: RankConfig) -> Self {
        Self {
            source,
            config: config.sanitized(),
            scorer: Scorer::new(),
            generation: 0,
            pass: None,
            selected: None,
            selected_rank: None,
        }
    }

    pub fn source(&self) -> &S { &self.source }
    pub fn config(&self) -> RankConfig { self.config }
    pub fn generation(&self) -> u64 { self.generation }
    pub fn query(&self) -> Option<&Query> { self.pass.as_ref().map(|p| &p.query) }
    pub fn state(&self) -> Option<&RankingState> { self.pass.as_ref().map(|p| &p.state) }
    pub fn stats(&self) -> PassStats { self.pass.as_ref().map(|p| p.stats.clone()).unwrap_or_default() }
    pub fn is_complete(&self) -> bool { self.pass.as_ref().is_some_and(|p| p.stats.complete) }

    /// Start ranking for `query`, discarding any pass still in flight.
    ///
    /// The first batch runs before returning.
    pub fn set_query(&mut self, query: impl Into<Query>) -> Step {
        let query = query.into();
        if let Some(old) = self.pass.as_ref().filter(|p| !p.stats.complete) {
            debug!(generation = old.stats.generation, cursor = old.state.cursor(), "superseding unfinished pass");
            counter!("rank_passes_superseded_total", 1u64);
        }
        self.generation += 1;
        let total = self.source.item_count();
        trace!(generation = self.generation, query = %query, total, "ranking pass started");
        self.pass = Some(Pass {
            prefilter: Prefilter::new(&query),
            state: RankingState::new(self.config.top_k),
            stats: PassStats { generation: self.generation, total, ..PassStats::default() },
            query,
            started: Instant::now(),
        });
        self.run_batch()
    }

    /// Re-run the live query, e.g. after the source's contents changed.
    pub fn refresh(&mut self) -> Step {
        let query = self.query().cloned().unwrap_or_default();
        self.set_query(query)
    }

    /// Swap the candidate source and re-rank the live query against it.
    pub fn replace_source(&mut self, source: S) -> (S, Step) {
        let old = std::mem::replace(&mut self.source, source);
        (old, self.refresh())
    }

    /// Run the next batch of the pass `cont` belongs to.
    pub fn resume(&mut self, cont: Continuation) -> Step {
        if cont.generation != self.generation || self.is_complete() || self.pass.is_none() {
            trace!(stale = cont.generation, live = self.generation, "ignoring stale continuation");
            return Step::Stale;
        }
        self.run_batch()
    }

    /// Drive the live pass to completion without yielding.
    pub fn run_to_completion(&mut self) {
        let mut step = match self.pass.as_ref() {
            Some(p) if !p.stats.complete => Step::Yield(Continuation { generation: self.generation }),
            _ => return,
        };
        while let Step::Yield(cont) = step {
            step = self.resume(cont);
        }
    }

    /// Ordered result indices known so far: best, then overflow, then remainder.
    pub fn current_results(&self) -> Vec<usize> {
        self.pass.as_ref().map(|p| p.state.ordered()).unwrap_or_default()
    }

    /// Rank of `previous` in the current results, else 0; `None` when there are no results.
    pub fn preferred_selection(&self, previous: Option<usize>) -> Option<usize> {
        let state = &self.pass.as_ref()?.state;
        if state.is_empty() {
            return None;
        }
        let found = previous.and_then(|prev| {
            state
                .best_items()
                .iter()
                .chain(state.overflow())
                .chain(state.remainder())
                .position(|i| *i == prev)
        });
        Some(found.unwrap_or(0))
    }

    /// Remember the candidate the user has selected; re-located when a pass completes.
    pub fn select(&mut self, candidate: Option<usize>) {
        self.selected = candidate;
        if let Some(p) = self.pass.as_ref().filter(|p| p.stats.complete) {
            self.selected_rank = candidate.and_then(|c| p.state.ordered().iter().position(|i| *i == c));
        }
    }

    /// Candidate index currently selected.
    pub fn selected(&self) -> Option<usize> { self.selected }

    /// Rank of the selection in the last completed pass.
    pub fn selected_rank(&self) -> Option<usize> { self.selected_rank }

    fn run_batch(&mut self) -> Step {
        let Some(pass) = self.pass.as_mut() else {
            return Step::Stale;
        };
        let batch_started = Instant::now();
        let total = self.source.item_count();
        let max_batch = self.config.max_batch;
        let mut cursor = pass.state.cursor();
        let mut work = 0usize;
        let (mut rejected, mut scored, mut failed, mut evicted) = (0usize, 0usize, 0usize, 0usize);

        while cursor < total && work < max_batch {
            let index = cursor;
            cursor += 1;
            if !pass.prefilter.is_pass_through() && !pass.prefilter.accepts(self.source.item_key_at(index)) {
                rejected += 1;
                continue;
            }
            work += 1;
            match self.source.item_score_at(index, &pass.query, &mut self.scorer) {
                Ok(score) => {
                    scored += 1;
                    if let Placement::BestEvicting(out) = pass.state.offer(index, score) {
                        trace!(index, evicted = out, "best list full; last entry moved to overflow");
                        evicted += 1;
                    }
                }
                Err(e) => {
                    warn!(index, error = %e, "candidate score failed; keeping it unranked");
                    failed += 1;
                    pass.state.push_unranked(index);
                }
            }
        }
        pass.state.set_cursor(cursor);

        let stats = &mut pass.stats;
        stats.total = total;
        stats.rejected += rejected;
        stats.scored += scored;
        stats.failed += failed;
        stats.evicted += evicted;
        stats.batches += 1;
        stats.elapsed_ms = pass.started.elapsed().as_secs_f64() * 1_000.0;
        counter!("rank_candidates_scored_total", scored as u64);
        counter!("rank_prefilter_rejects_total", rejected as u64);
        if failed > 0 {
            counter!("rank_score_failures_total", failed as u64);
        }
        histogram!("rank_batch_ms", batch_started.elapsed().as_secs_f64() * 1_000.0);

        if cursor < total {
            return Step::Yield(Continuation { generation: self.generation });
        }
        self.finish();
        Step::Complete
    }

    fn finish(&mut self) {
        let Some(pass) = self.pass.as_mut() else { return };
        pass.stats.complete = true;
        let ordered = pass.state.ordered();
        let found = self.selected.and_then(|c| ordered.iter().position(|i| *i == c));
        self.selected_rank = if ordered.is_empty() {
            None
        } else if pass.query.is_empty() {
            Some(0)
        } else {
            Some(found.unwrap_or(0))
        };
        self.selected = self.selected_rank.and_then(|r| ordered.get(r).copied());

        let s = &pass.stats;
        histogram!("rank_pass_ms", s.elapsed_ms);
        debug!(
            generation = s.generation,
            query = %pass.query,
            total = s.total,
            rejected = s.rejected,
            scored = s.scored,
            failed = s.failed,
            evicted = s.evicted,
            batches = s.batches,
            elapsed_ms = s.elapsed_ms,
            "ranking pass complete"
        );
    }
}

impl<S: CandidateSource + std::fmt::Debug> std::fmt::Debug for RankedFilter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RankedFilter")
            .field("source", &self.source)
            .field("config", &self.config)
            .field("generation", &self.generation)
            .field("stats", &self.stats())
            .finish()
    }
}
