//! Sift session: drives a [`RankedFilter`] from a tokio task.
//!
//! The task owns the filter. Commands arrive over an unbounded channel (UI
//! threads send without awaiting); between batches the task yields to the
//! runtime and drains whatever queued up, keeping only the newest query. Every
//! batch publishes a [`RankedSnapshot`] through an `ArcSwap` and bumps an
//! epoch on a `watch` channel.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use metrics::counter;
use rustc_hash::FxHashMap;
use serde::Serialize;
use sift_core::{CandidateSource, RankConfig};
use sift_rank::{Continuation, PassStats, RankedFilter, Step};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Message from a handle to the ranking task.
enum Command<S> {
    SetQuery { seq: u64, text: String },
    Select(Option<usize>),
    ReplaceSource { seq: u64, source: S },
}

/// Published view of the live pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RankedSnapshot {
    /// Filter generation the items belong to.
    pub generation: u64,
    /// Handle-side sequence number of the newest request (query or source swap) this pass serves.
    pub request: u64,
    pub query: String,
    pub items: Vec<usize>,
    pub complete: bool,
    /// Selected candidate, re-located by the last completed pass.
    pub selected: Option<usize>,
    pub selected_rank: Option<usize>,
    pub stats: PassStats,
    #[serde(skip)]
    positions: FxHashMap<usize, usize>,
}

impl RankedSnapshot {
    fn idle() -> Self { Self { complete: true, ..Self::default() } }

    fn capture<S: CandidateSource>(filter: &RankedFilter<S>, request: u64) -> Self {
        let items = filter.current_results();
        let complete = filter.is_complete();
        let positions = if complete {
            items.iter().enumerate().map(|(rank, item)| (*item, rank)).collect()
        } else {
            FxHashMap::default()
        };
        Self {
            generation: filter.generation(),
            request,
            query: filter.query().map(|q| q.as_str().to_string()).unwrap_or_default(),
            items,
            complete,
            selected: filter.selected(),
            selected_rank: filter.selected_rank(),
            stats: filter.stats(),
            positions,
        }
    }

    /// Rank of `candidate` in these results.
    pub fn rank_of(&self, candidate: usize) -> Option<usize> {
        if self.complete {
            return self.positions.get(&candidate).copied();
        }
        self.items.iter().position(|i| *i == candidate)
    }

    /// Rank to select after re-ranking: the previous candidate's new rank, else 0.
    pub fn preferred_selection(&self, previous: Option<usize>) -> Option<usize> {
        if self.items.is_empty() {
            return None;
        }
        Some(previous.and_then(|p| self.rank_of(p)).unwrap_or(0))
    }
}

/// Commands drained in one go; later commands of a kind replace earlier ones.
struct Drained<S> {
    query: Option<(u64, String)>,
    select: Option<Option<usize>>,
    source: Option<(u64, S)>,
    coalesced: u64,
}

impl<S> Default for Drained<S> {
    fn default() -> Self { Self { query: None, select: None, source: None, coalesced: 0 } }
}

impl<S> Drained<S> {
    fn push(&mut self, cmd: Command<S>) {
        match cmd {
            Command::SetQuery { seq, text } => {
                if self.query.replace((seq, text)).is_some() { self.coalesced += 1; }
            }
            Command::Select(c) => self.select = Some(c),
            Command::ReplaceSource { seq, source } => {
                if self.source.replace((seq, source)).is_some() { self.coalesced += 1; }
            }
        }
    }

    fn is_empty(&self) -> bool { self.query.is_none() && self.select.is_none() && self.source.is_none() }

    /// Pull everything already queued. Returns false once all senders are gone.
    fn drain(&mut self, rx: &mut mpsc::UnboundedReceiver<Command<S>>) -> bool {
        loop {
            match rx.try_recv() {
                Ok(cmd) => self.push(cmd),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }
}

/// Client side of a ranking session.
pub struct RankerHandle<S> {
    tx: mpsc::UnboundedSender<Command<S>>,
    snap: Arc<ArcSwap<RankedSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
    seq: AtomicU64,
    task: JoinHandle<()>,
}

impl<S: Send + 'static> RankerHandle<S> {
    /// Queue a new query; any pass still running for an older one is abandoned.
    pub fn set_query(&self, text: impl Into<String>) -> Result<u64> {
        let seq = self.next_seq();
        self.send(Command::SetQuery { seq, text: text.into() })?;
        Ok(seq)
    }

    pub fn select(&self, candidate: Option<usize>) -> Result<()> { self.send(Command::Select(candidate)) }

    /// Swap the candidate source; the live query re-runs against it.
    pub fn replace_source(&self, source: S) -> Result<u64> {
        let seq = self.next_seq();
        self.send(Command::ReplaceSource { seq, source })?;
        Ok(seq)
    }

    pub fn current(&self) -> Arc<RankedSnapshot> { self.snap.load_full() }

    /// Epoch counter bumped on every publish.
    pub fn subscribe(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }

    /// Wait for the completed pass serving the most recent query or source swap.
    pub async fn wait_complete(&self) -> Result<Arc<RankedSnapshot>> {
        let want = self.seq.load(Ordering::Acquire);
        let mut rx = self.epoch_rx.clone();
        loop {
            let cur = self.snap.load_full();
            if cur.complete && cur.request >= want {
                return Ok(cur);
            }
            rx.changed().await.context("ranker task stopped before the query completed")?;
        }
    }

    /// Close the command channel and wait for the task to exit.
    pub async fn shutdown(self) -> Result<()> {
        let Self { tx, task, .. } = self;
        drop(tx);
        task.await.context("ranker task panicked")
    }

    fn next_seq(&self) -> u64 { self.seq.fetch_add(1, Ordering::AcqRel) + 1 }

    fn send(&self, cmd: Command<S>) -> Result<()> {
        self.tx.send(cmd).map_err(|_| anyhow::anyhow!("ranker task is no longer running"))
    }
}

/// Spawn a ranking task over `source`. Must be called inside a tokio runtime.
pub fn spawn_ranker<S>(source: S, config: RankConfig) -> RankerHandle<S>
where
    S: CandidateSource + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Command<S>>();
    let snap = Arc::new(ArcSwap::from_pointee(RankedSnapshot::idle()));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let filter = RankedFilter::with_config(source, config);
    let task = tokio::spawn(drive(filter, rx, Arc::clone(&snap), epoch_tx));
    RankerHandle { tx, snap, epoch_rx, seq: AtomicU64::new(0), task }
}

async fn drive<S>(
    mut filter: RankedFilter<S>,
    mut rx: mpsc::UnboundedReceiver<Command<S>>,
    snap: Arc<ArcSwap<RankedSnapshot>>,
    epoch_tx: watch::Sender<u64>,
) where
    S: CandidateSource + Send + 'static,
{
    let mut pending: Option<Continuation> = None;
    let mut request = 0u64;
    let mut epoch = 0u64;
    loop {
        let mut cmds = Drained::default();
        let open = if pending.is_some() {
            // Next tick: let the runtime (and other tasks) run before the next batch.
            tokio::task::yield_now().await;
            cmds.drain(&mut rx)
        } else {
            match rx.recv().await {
                Some(cmd) => {
                    cmds.push(cmd);
                    cmds.drain(&mut rx)
                }
                None => false,
            }
        };
        if !open {
            debug!(generation = filter.generation(), "command channel closed; stopping ranker");
            break;
        }
        if cmds.coalesced > 0 {
            counter!("session_commands_coalesced_total", cmds.coalesced);
        }

        let idle = cmds.is_empty();
        let mut step = None;
        if let Some((seq, source)) = cmds.source {
            request = request.max(seq);
            let (_old, s) = filter.replace_source(source);
            step = Some(s);
        }
        if let Some(selected) = cmds.select {
            filter.select(selected);
        }
        if let Some((seq, text)) = cmds.query {
            request = request.max(seq);
            step = Some(filter.set_query(text));
        }
        let step = match (step, pending) {
            (Some(s), _) => Some(s),
            (None, Some(cont)) => Some(filter.resume(cont)),
            (None, None) => None,
        };
        pending = step.and_then(Step::continuation);
        if idle && step.is_none() {
            continue;
        }

        snap.store(Arc::new(RankedSnapshot::capture(&filter, request)));
        epoch += 1;
        let _ = epoch_tx.send(epoch);
    }
    info!(generation = filter.generation(), "ranker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drained_keeps_latest_query_and_counts_coalesced() {
        let mut d: Drained<()> = Drained::default();
        assert!(d.is_empty());
        d.push(Command::SetQuery { seq: 1, text: "a".into() });
        d.push(Command::Select(Some(4)));
        d.push(Command::SetQuery { seq: 2, text: "ab".into() });
        d.push(Command::Select(None));
        d.push(Command::ReplaceSource { seq: 3, source: () });
        d.push(Command::ReplaceSource { seq: 4, source: () });
        assert_eq!(d.query, Some((2, "ab".to_string())));
        assert_eq!(d.select, Some(None));
        assert_eq!(d.source.map(|(seq, _)| seq), Some(4));
        assert_eq!(d.coalesced, 2);
    }

    #[test]
    fn snapshot_selection_lookup() {
        let mut snap = RankedSnapshot { items: vec![7, 3, 9], complete: true, ..RankedSnapshot::default() };
        snap.positions = snap.items.iter().enumerate().map(|(r, i)| (*i, r)).collect();
        assert_eq!(snap.rank_of(9), Some(2));
        assert_eq!(snap.preferred_selection(Some(3)), Some(1));
        assert_eq!(snap.preferred_selection(Some(42)), Some(0));
        assert_eq!(RankedSnapshot::idle().preferred_selection(Some(1)), None);
    }
}
