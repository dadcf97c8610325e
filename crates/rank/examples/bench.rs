use std::time::Instant;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use sift_core::{RankConfig, VecSource};
use sift_rank::{RankedFilter, Step};

const DIRS: [&str; 8] = ["src", "lib", "tests", "crates/core/src", "crates/ui/components", "docs", "scripts", "vendor/third_party"];
const STEMS: [&str; 8] = ["main", "request_handler", "SearchBox", "mod", "view-model", "config", "lib", "quick_open"];
const EXTS: [&str; 4] = ["rs", "ts", "md", "json"];

fn gen_source(n: usize) -> VecSource {
    (0..n)
        .map(|i| {
            let dir = DIRS[i % DIRS.len()];
            let stem = STEMS[(i / DIRS.len()) % STEMS.len()];
            let ext = EXTS[i % EXTS.len()];
            format!("{dir}/m{:03}/{stem}_{i}.{ext}", i % 997)
        })
        .collect()
}

fn percentile_us(xs: &mut [u128], p: f64) -> u128 {
    xs.sort_unstable();
    let idx = ((xs.len() as f64 - 1.0) * p).round() as usize;
    xs[idx]
}

fn main() {
    let n: usize = std::env::var("SIFT_BENCH_DOCS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(100_000);
    let cfg = RankConfig::from_env();

    eprintln!("building source: {} candidates", n);
    let t0 = Instant::now();
    let source = gen_source(n);
    let build_ms = t0.elapsed().as_secs_f64() * 1_000.0;

    // Simulated typing: each prefix supersedes the previous pass after one batch.
    let typed = ["q", "qu", "qui", "quic", "quick", "quicko"];
    let queries = ["sb", "reqh", "cfg", "vm", "mainrs", "core/lib", "qo.ts", "zzzz"];

    let mut filter = RankedFilter::with_config(&source, cfg);
    let mut batch_us: Vec<u128> = Vec::new();
    let mut pass_us: Vec<u128> = Vec::new();
    let mut superseded = 0usize;

    for q in typed.iter().chain(queries.iter()) {
        let started = Instant::now();
        let mut t = Instant::now();
        let mut step = filter.set_query(*q);
        batch_us.push(t.elapsed().as_micros());
        while let Step::Yield(cont) = step {
            t = Instant::now();
            step = filter.resume(cont);
            batch_us.push(t.elapsed().as_micros());
            if typed.contains(q) && !filter.is_complete() {
                superseded += 1;
                break;
            }
        }
        if filter.is_complete() {
            pass_us.push(started.elapsed().as_micros());
        }
    }

    // Baseline: skim scoring of every candidate, no batching or pre-filter.
    let skim = SkimMatcherV2::default();
    let mut skim_us: Vec<u128> = Vec::with_capacity(queries.len());
    for q in queries.iter() {
        let t = Instant::now();
        let hits = source.items().iter().filter_map(|s| skim.fuzzy_match(s, q)).count();
        skim_us.push(t.elapsed().as_micros());
        std::hint::black_box(hits);
    }

    println!("source_build: {:.1}ms candidates={} top_k={} max_batch={}", build_ms, n, cfg.top_k, cfg.max_batch);
    println!(
        "batch: p50={:.3}ms p99={:.3}ms ({} batches)",
        percentile_us(&mut batch_us.clone(), 0.50) as f64 / 1000.0,
        percentile_us(&mut batch_us, 0.99) as f64 / 1000.0,
        batch_us.len()
    );
    println!(
        "pass: p50={:.3}ms p99={:.3}ms ({} complete, {} superseded)",
        percentile_us(&mut pass_us.clone(), 0.50) as f64 / 1000.0,
        percentile_us(&mut pass_us, 0.99) as f64 / 1000.0,
        pass_us.len(),
        superseded
    );
    println!(
        "skim_baseline: p50={:.3}ms p99={:.3}ms ({} queries)",
        percentile_us(&mut skim_us.clone(), 0.50) as f64 / 1000.0,
        percentile_us(&mut skim_us, 0.99) as f64 / 1000.0,
        skim_us.len()
    );
}
