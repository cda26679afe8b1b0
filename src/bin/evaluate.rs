//! Run a branch predictor over binary traces (or a synthetic trace) and
//! report statistics.
//!
//! usage: evaluate <comb|2lev|bimod|taken|nottaken|perceptron> [trace files]

use std::env;
use std::io;

use bpred::stats::StatList;
use bpred::trace::{evaluate, BinaryTraceSet, SyntheticTrace};
use bpred::{BranchPredictor, BranchRecord, PredictorClass, PredictorConfig};

/// Number of records used to warm up the predictor before statistics are
/// collected.
const WARMUP: usize = 10_000;

/// Length of the synthetic trace used when no trace files are given.
const SYNTHETIC_LEN: usize = 1_000_000;

fn parse_class(s: &str) -> Option<PredictorClass> {
    [
        PredictorClass::Combined, PredictorClass::TwoLevel, PredictorClass::Bimodal,
        PredictorClass::StaticTaken, PredictorClass::StaticNotTaken,
        PredictorClass::Perceptron,
    ].into_iter().find(|c| c.name() == s)
}

fn run_test(name: &str, class: PredictorClass, records: &[BranchRecord])
    -> std::result::Result<(), Box<dyn std::error::Error>>
{
    let mut bp = BranchPredictor::new(PredictorConfig::new(class))?;
    let (warmup, rest) = records.split_at(WARMUP.min(records.len() / 10));

    evaluate(&mut bp, warmup.iter().copied())?;
    bp.reset_stats();
    let stat = evaluate(&mut bp, rest.iter().copied())?;

    println!("[*] {} ({} records)", name, records.len());
    println!("  Global hit rate: {}/{} ({:.2}% correct) ({} misses)",
        stat.global_hits,
        stat.global_brns,
        stat.hit_rate() * 100.0,
        stat.global_miss()
    );
    println!("  Unique branches: {} ({} always taken, {} never taken)",
        stat.num_unique_branches(),
        stat.num_always_taken(),
        stat.num_never_taken(),
    );
    for (pc, data) in stat.worst_branches(5) {
        println!("    {:016x}: {:6} misses in {:8} ({:.2}% correct)",
            pc, data.misses(), data.occ, data.hit_rate() * 100.0);
    }

    let mut list = StatList::new();
    bp.register_stats(&mut list);
    let mut out = io::stdout().lock();
    list.write(&mut out)?;
    Ok(())
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let class = match args.get(1).and_then(|s| parse_class(s)) {
        Some(class) => class,
        None => {
            println!("usage: {} <comb|2lev|bimod|taken|nottaken|perceptron> [trace files]",
                args[0]);
            return;
        },
    };

    let cfg = PredictorConfig::new(class);
    if let Err(e) = cfg.write_config(&mut io::stdout().lock()) {
        log::error!("{}", e);
        return;
    }

    if args.len() < 3 {
        let records: Vec<BranchRecord> = SyntheticTrace::new(1, 64)
            .take(SYNTHETIC_LEN)
            .collect();
        if let Err(e) = run_test("synthetic", class, &records) {
            log::error!("{}", e);
        }
        return;
    }

    for trace in BinaryTraceSet::new_from_slice(&args[2..]) {
        let trace = match trace {
            Ok(trace) => trace,
            Err(e) => {
                log::error!("{}", e);
                continue;
            },
        };
        if trace.num_entries() < 100 {
            log::warn!("skipping '{}' ({} records)", trace.name(), trace.num_entries());
            continue;
        }
        if let Err(e) = run_test(trace.name(), class, trace.as_slice()) {
            log::error!("{}", e);
        }
    }
}
