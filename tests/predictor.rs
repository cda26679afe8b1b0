//! Behavior of the predictor components, checked against simple models.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use bpred::history::{FilteredEntry, HistoryTracker, RecencyStack};
use bpred::trace;
use bpred::{
    Addr, BpredError, BranchKind, BranchPredictor, Btb, CombinedPair, ConfigError,
    DirectionPredictor, DirectionUnit, MetaPredictor, Outcome, PerceptronConfig,
    PerceptronPredictor, PredictorClass, PredictorConfig, ReturnStack,
    SaturatingCounterConfig, INST_BYTES,
};

// ══════════════════════════════════════════════════════════
// 1. Counters and tables
// ══════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn counter_stays_in_range(bits in 1u32..=4, init in 0u8..16,
        outcomes in prop::collection::vec(any::<bool>(), 0..64))
    {
        let cfg = SaturatingCounterConfig { bits };
        let mut c = cfg.build(init);
        let max = cfg.max_value();
        prop_assert!(c.value() <= max);
        for taken in outcomes {
            let before = c.value();
            c.update(Outcome::from(taken));
            prop_assert!(c.value() <= max);
            if taken {
                prop_assert_eq!(c.value(), (before + 1).min(max));
            } else {
                prop_assert_eq!(c.value(), before.saturating_sub(1));
            }
            prop_assert_eq!(c.predict() == Outcome::T, c.value() > max / 2);
        }
    }

    #[test]
    fn meta_moves_only_on_disagreement(steps in prop::collection::vec(
        (any::<bool>(), any::<bool>(), any::<bool>()), 1..64))
    {
        let mut meta = MetaPredictor::new(16).unwrap();
        let (_, idx) = meta.lookup(0x40);
        for (first, second, taken) in steps {
            let before = meta.counter(idx).unwrap().value();
            meta.update(idx, first.into(), second.into(), taken.into()).unwrap();
            let after = meta.counter(idx).unwrap().value();
            if first == second {
                prop_assert_eq!(after, before);
            } else if second == taken {
                prop_assert_eq!(after, (before + 1).min(3));
            } else {
                prop_assert_eq!(after, before.saturating_sub(1));
            }
        }
    }
}

// ══════════════════════════════════════════════════════════
// 2. Return-address stack
// ══════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn ras_returns_in_reverse(log_size in 0u32..5,
        calls in prop::collection::vec(0u64..0x10000, 1..16))
    {
        let size = 1usize << log_size;
        let mut ras = ReturnStack::new(size);
        let calls: Vec<Addr> = calls.into_iter().take(size).map(|x| x * 4).collect();
        for &pc in calls.iter() {
            ras.lookup(true, false, pc);
        }
        for &pc in calls.iter().rev() {
            let (_, target) = ras.lookup(false, true, 0);
            prop_assert_eq!(target, Some(pc.wrapping_add(INST_BYTES)));
        }
    }

    #[test]
    fn ras_recover_restores_tos(pre in prop::collection::vec(any::<bool>(), 0..20),
        post in prop::collection::vec(any::<bool>(), 0..20))
    {
        let mut ras = ReturnStack::new(8);
        for (i, call) in pre.iter().enumerate() {
            ras.lookup(*call, !*call, i as Addr * 4);
        }
        let (snapshot, _) = ras.lookup(false, false, 0);
        for (i, call) in post.iter().enumerate() {
            ras.lookup(*call, !*call, i as Addr * 4);
        }
        ras.recover(snapshot);
        prop_assert_eq!(ras.tos(), snapshot);
    }
}

// ══════════════════════════════════════════════════════════
// 3. Branch target buffer
// ══════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn btb_matches_lru_model(log_assoc in 0u32..4,
        ops in prop::collection::vec((any::<bool>(), 0u64..12), 1..80))
    {
        let assoc = 1usize << log_assoc;
        let mut btb: Btb<BranchKind> = Btb::new(1, assoc);
        let mut model: Vec<Addr> = Vec::new();

        for (is_update, n) in ops {
            let addr = n * 4;
            let pos = model.iter().position(|&a| a == addr);
            if is_update {
                btb.update(addr, BranchKind::DirectJump, addr + 0x100);
                match pos {
                    Some(p) => { model.remove(p); },
                    None => model.truncate(assoc - 1),
                }
                model.insert(0, addr);
            } else {
                let hit = btb.lookup(addr);
                prop_assert_eq!(hit.is_some(), pos.is_some());
                if let Some(p) = pos {
                    prop_assert_eq!(hit, Some(addr + 0x100));
                    model.remove(p);
                    model.insert(0, addr);
                }
            }
            prop_assert_eq!(btb.set_contents(0), model.clone());
        }
    }
}

// ══════════════════════════════════════════════════════════
// 4. Global history
// ══════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn folded_history_matches_brute_force(len in 1usize..200, width in 1usize..16,
        outcomes in prop::collection::vec(any::<bool>(), 0..400))
    {
        let mut h = HistoryTracker::new(0);
        let f = h.add_folded(len, width);
        for (i, taken) in outcomes.into_iter().enumerate() {
            h.record(i as Addr * 4, taken.into());
        }
        let expected = (0..len).fold(0, |acc, d| {
            let bit = h.outcome_at(d).map(bool::from).unwrap_or(false);
            acc ^ ((bit as usize) << (d % width))
        });
        prop_assert_eq!(h.folded(f), expected);
    }

    #[test]
    fn filtered_view_is_windowed_and_unique(start in 0usize..64, span in 0usize..200,
        branches in prop::collection::vec((0u64..20, any::<bool>()), 0..300))
    {
        let mut h = HistoryTracker::new(0);
        for (n, taken) in branches.iter() {
            h.record(0x1000 + n * 4, (*taken).into());
        }
        let end = start + span;
        let view: Vec<FilteredEntry> = h.filtered_view(start, end).collect();
        let mut seen = std::collections::BTreeSet::new();
        let mut last = None;
        for e in view.iter() {
            prop_assert!(e.distance >= start && e.distance < end);
            prop_assert!(e.distance < h.len());
            prop_assert!(seen.insert(e.tag));
            prop_assert!(last.map_or(true, |d| e.distance > d));
            last = Some(e.distance);
        }
        // Every address in the window shows up
        let expected: std::collections::BTreeSet<u32> = (start..end.min(h.len()))
            .filter_map(|d| h.addr_at(d))
            .collect();
        prop_assert_eq!(seen, expected);
    }

    #[test]
    fn recency_stack_has_no_duplicates(cap in 1usize..16,
        tags in prop::collection::vec(0u32..24, 0..100))
    {
        let mut rs = RecencyStack::new(cap);
        for (pos, tag) in tags.iter().enumerate() {
            rs.update(*tag, Outcome::T, pos as u64);
        }
        prop_assert!(rs.len() <= cap);
        let mut seen = std::collections::BTreeSet::new();
        let mut last_pos = u64::MAX;
        for e in rs.iter() {
            prop_assert!(seen.insert(e.tag));
            prop_assert!(e.position < last_pos);
            last_pos = e.position;
        }
        if let Some(&newest) = tags.last() {
            prop_assert_eq!(rs.iter().next().map(|e| e.tag), Some(newest));
        }
    }
}

// ══════════════════════════════════════════════════════════
// 5. Perceptron
// ══════════════════════════════════════════════════════════

fn small_perceptron(speculative: bool) -> PerceptronConfig {
    PerceptronConfig {
        num_perceptrons: 64,
        history_length: 16,
        index_history: 8,
        log_path_weights: 8,
        log_bst: 8,
        speculative_history: speculative,
        ..PerceptronConfig::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn perceptron_is_deterministic(stream in prop::collection::vec((0u64..8, any::<bool>()), 1..200)) {
        let mut a = PerceptronPredictor::new(small_perceptron(false)).unwrap();
        let mut b = PerceptronPredictor::new(small_perceptron(false)).unwrap();
        for (n, taken) in stream {
            let addr = 0x2000 + n * 4;
            let (pa, ca) = a.lookup(addr);
            let (pb, cb) = b.lookup(addr);
            prop_assert_eq!(pa, pb);
            prop_assert_eq!(&ca, &cb);
            a.update(&ca, addr, taken.into()).unwrap();
            b.update(&cb, addr, taken.into()).unwrap();
        }
        prop_assert_eq!(a.threshold(), b.threshold());
    }

    #[test]
    fn speculation_never_leaks(stream in prop::collection::vec(
        (0u64..8, any::<bool>(), any::<bool>()), 1..200))
    {
        let mut p = PerceptronPredictor::new(small_perceptron(true)).unwrap();
        let mut expected: u64 = 0;
        for (n, taken, recover_first) in stream {
            let addr = 0x3000 + n * 4;
            let outcome = Outcome::from(taken);
            let (pred, ctx) = p.lookup(addr);
            let cp = p.checkpoint().unwrap();
            // Wrong-path lookups after the branch
            let _ = p.lookup(addr + 0x40);

            if pred != outcome && recover_first {
                p.recover(&cp);
                p.update(&ctx, addr, outcome).unwrap();
            } else {
                p.update(&ctx, addr, outcome).unwrap();
                p.recover(&cp);
            }
            expected = (expected << 1) | taken as u64;
            prop_assert_eq!(p.history(), expected);
            prop_assert_eq!(p.spec_history(), expected);
        }
    }

    #[test]
    fn delayed_updates_keep_program_order(depth in 1usize..12,
        stream in prop::collection::vec((0u64..8, any::<bool>()), 1..200))
    {
        let mut p = PerceptronPredictor::new(small_perceptron(true)).unwrap();
        let mut pending = std::collections::VecDeque::new();
        for (n, taken) in stream {
            let addr = 0x5000 + n * 4;
            let (_, ctx) = p.lookup(addr);
            pending.push_back((ctx, addr, Outcome::from(taken)));
            if pending.len() > depth {
                let (ctx, addr, outcome) = pending.pop_front().unwrap();
                p.update(&ctx, addr, outcome).unwrap();
            }
            prop_assert_eq!(p.pending(), pending.len());
        }
        for (ctx, addr, outcome) in pending.drain(..) {
            p.update(&ctx, addr, outcome).unwrap();
        }
        prop_assert_eq!(p.spec_history(), p.history());
    }
}

// ══════════════════════════════════════════════════════════
// 6. End-to-end
// ══════════════════════════════════════════════════════════

#[test]
fn bimodal_learns_biased_branches() {
    let mut bp: BranchPredictor = BranchPredictor::new(
        PredictorConfig { bimod_size: 1024, ..PredictorConfig::new(PredictorClass::Bimodal) }
    ).unwrap();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut seen = vec![(0usize, 0usize); 256];

    for _ in 0..10_000 {
        let i = rng.gen_range(0..256);
        let pc = 0x1000 + 4 * i as Addr;
        let taken = rng.gen_bool(0.8);
        let l = bp.lookup(pc, pc + 0x40, BranchKind::DirectBranch, false, false);
        let pred = l.prediction.taken;
        bp.update(l.token, pc, pc + 0x40, taken, pred, pred == taken, BranchKind::DirectBranch)
            .unwrap();
        seen[i].0 += 1;
        if taken {
            seen[i].1 += 1;
        }
    }

    let candidates: Vec<usize> = (0..256)
        .filter(|&i| seen[i].0 >= 3 && seen[i].1 * 2 > seen[i].0)
        .collect();
    let predicted_taken = candidates.iter().filter(|&&i| {
        let pc = 0x1000 + 4 * i as Addr;
        bp.lookup(pc, pc + 0x40, BranchKind::DirectBranch, false, false).prediction.taken
    }).count();
    assert!(predicted_taken * 100 >= candidates.len() * 85,
        "{} of {} predicted taken", predicted_taken, candidates.len());
}

#[test]
fn two_level_learns_periodic_pattern() {
    let mut bp: BranchPredictor = BranchPredictor::create(
        PredictorClass::TwoLevel, 0, 1, 1024, 0, 8, false, 64, 2, 8).unwrap();
    let pattern = [true, true, false, true, false, false];
    let mut hits = 0;
    for i in 0..600 {
        let taken = pattern[i % pattern.len()];
        let l = bp.lookup(0x7000, 0x7100, BranchKind::DirectBranch, false, false);
        let pred = l.prediction.taken;
        if i >= 300 && pred == taken {
            hits += 1;
        }
        bp.update(l.token, 0x7000, 0x7100, taken, pred, pred == taken, BranchKind::DirectBranch)
            .unwrap();
    }
    assert_eq!(hits, 300);
}

#[test]
fn perceptron_learns_alternating_branch() {
    let mut bp: BranchPredictor = BranchPredictor::new(
        PredictorConfig::new(PredictorClass::Perceptron)).unwrap();
    let mut hits = 0;
    for i in 0..400 {
        let taken = i % 2 == 1;
        let l = bp.lookup(0x9000, 0x9100, BranchKind::DirectBranch, false, false);
        let pred = l.prediction.taken;
        if i >= 300 && pred == taken {
            hits += 1;
        }
        bp.update(l.token, 0x9000, 0x9100, taken, pred, pred == taken, BranchKind::DirectBranch)
            .unwrap();
    }
    assert_eq!(hits, 100);
}

#[test]
fn combined_with_perceptron_recovers() {
    let mut cfg = PredictorConfig::new(PredictorClass::Combined);
    cfg.combined = CombinedPair { first: PredictorClass::Bimodal, second: PredictorClass::Perceptron };
    cfg.perceptron.speculative_history = true;
    let mut bp: BranchPredictor = BranchPredictor::new(cfg).unwrap();

    let stats = trace::evaluate(&mut bp, trace::SyntheticTrace::new(9, 24).take(4000)).unwrap();
    assert!(stats.hit_rate() > 0.7);
    if let DirectionUnit::Combined { second: DirectionPredictor::Perceptron(p), .. } = bp.direction() {
        assert_eq!(p.spec_history(), p.history());
    } else {
        panic!("expected a perceptron in the second slot");
    }
}

#[test]
fn config_serializes() {
    let cfg = PredictorConfig::new(PredictorClass::Combined);
    let json = serde_json::to_value(&cfg).unwrap();
    assert_eq!(json["class"], "Combined");
    assert_eq!(json["combined"]["second"], "TwoLevel");
    assert_eq!(json["perceptron"]["history_length"], 32);
}

#[test]
fn bad_config_is_rejected() {
    let err = BranchPredictor::<BranchKind>::create(
        PredictorClass::Bimodal, 1000, 0, 0, 0, 0, false, 512, 4, 8).err();
    assert_eq!(err, Some(BpredError::Config(
        ConfigError::NotPowerOfTwo { what: "bimodal table", size: 1000 }
    )));
    let err = BranchPredictor::<BranchKind>::create(
        PredictorClass::Bimodal, 1024, 0, 0, 0, 0, false, 0, 4, 8).err();
    assert!(matches!(err, Some(BpredError::Config(ConfigError::NotPowerOfTwo { .. }))));
}
