use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use sift_core::{Query, RankConfig, VecSource};
use sift_score::{highlight, Matches, Scorer};
use sift_session::spawn_ranker;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "siftctl", version, about = "Fuzzy-rank candidate lists")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score one candidate against a query and show the matched characters
    Score {
        query: String,
        text: String,
    },
    /// Rank newline-delimited candidates (file or stdin) against a query
    Rank {
        query: String,
        /// Read candidates from this file instead of stdin
        #[arg(long = "file", short = 'f')]
        file: Option<PathBuf>,
        /// Limit printed results
        #[arg(long = "limit", default_value_t = 20)]
        limit: usize,
        /// Size of the sorted best-of list (overrides SIFT_TOP_K)
        #[arg(long = "top-k")]
        top_k: Option<usize>,
        /// Candidates scored per batch (overrides SIFT_MAX_BATCH)
        #[arg(long = "max-batch")]
        max_batch: Option<usize>,
        /// Print pass statistics
        #[arg(long = "explain", action = ArgAction::SetTrue)]
        explain: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("SIFT_LOG").unwrap_or_else(|_| "warn".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SIFT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid SIFT_METRICS_ADDR; expected host:port");
        }
    }
}

fn read_candidates(file: Option<&PathBuf>) -> Result<VecSource> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("reading candidates from stdin")?;
            buf
        }
    };
    Ok(VecSource::from_lines(&text))
}

#[derive(serde::Serialize)]
struct Row<'a> {
    rank: usize,
    index: usize,
    text: &'a str,
    score: i32,
    positions: Vec<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Score { query, text } => {
            let q = Query::new(query);
            let mut scorer = Scorer::new();
            let mut positions = Matches::new();
            let score = scorer.score_with_matches(&q, &text, &mut positions);
            match cli.output {
                Output::Human => println!("{}\t{}", score, highlight(&text, &positions, "[", "]")),
                Output::Json => {
                    let row = Row { rank: 0, index: 0, text: &text, score, positions: positions.to_vec() };
                    println!("{}", serde_json::to_string_pretty(&row)?);
                }
            }
        }
        Commands::Rank { query, file, limit, top_k, max_batch, explain } => {
            let source = Arc::new(read_candidates(file.as_ref())?);
            let mut cfg = RankConfig::from_env();
            if let Some(k) = top_k { cfg.top_k = k; }
            if let Some(b) = max_batch { cfg.max_batch = b; }
            let cfg = cfg.sanitized();
            info!(candidates = source.items().len(), top_k = cfg.top_k, max_batch = cfg.max_batch, "rank invoked");

            let started = Instant::now();
            let handle = spawn_ranker(Arc::clone(&source), cfg);
            handle.set_query(query.as_str())?;
            let snap = handle.wait_complete().await?;
            handle.shutdown().await?;
            info!(elapsed_ms = started.elapsed().as_millis() as u64, results = snap.items.len(), "rank complete");

            let q = Query::new(query);
            let mut scorer = Scorer::new();
            let mut matches = Matches::new();
            let rows: Vec<Row> = snap
                .items
                .iter()
                .take(limit)
                .enumerate()
                .filter_map(|(rank, idx)| {
                    let text = source.get(*idx)?;
                    if q.is_empty() {
                        return Some(Row { rank, index: *idx, text, score: 0, positions: Vec::new() });
                    }
                    let score = scorer.score_with_matches(&q, text, &mut matches);
                    let positions = matches.to_vec();
                    Some(Row { rank, index: *idx, text, score, positions })
                })
                .collect();

            match cli.output {
                Output::Human => {
                    for r in &rows {
                        println!("{:>4}  {:>5}  {}", r.rank, r.score, highlight(r.text, &r.positions, "[", "]"));
                    }
                    if snap.items.len() > rows.len() {
                        println!("... {} more", snap.items.len() - rows.len());
                    }
                }
                Output::Json => {
                    if explain {
                        #[derive(serde::Serialize)]
                        struct Explain<'a, T> { results: T, debug: &'a sift_rank::PassStats }
                        println!("{}", serde_json::to_string_pretty(&Explain { results: rows, debug: &snap.stats })?);
                    } else {
                        println!("{}", serde_json::to_string_pretty(&rows)?);
                    }
                }
            }
            if explain && matches!(cli.output, Output::Human) {
                let s = &snap.stats;
                eprintln!(
                    "debug: generation={} total={} rejected={} scored={} failed={} evicted={} batches={} elapsed_ms={:.2}",
                    s.generation, s.total, s.rejected, s.scored, s.failed, s.evicted, s.batches, s.elapsed_ms
                );
            }
        }
    }
    Ok(())
}
