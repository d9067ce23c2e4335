//! Property tests for the invariants in spec §8 (P1-P3, P5-P7).

use memprof_common::Event;
use memprof_registry::Registry;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Alloc { ptr: u64, size: u64, file: Option<String> },
    Free { ptr: u64 },
}

/// Build a well-formed event sequence: every Free has a prior matching
/// Alloc on the same ptr, and ptrs are never reused while still live.
fn well_formed_ops() -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec((1u64..50, 1u64..10_000, proptest::option::of("[a-c]\\.c")), 1..40)
        .prop_map(|allocs| {
            let mut ops = Vec::new();
            let mut live = Vec::new();
            for (i, (ptr, size, file)) in allocs.into_iter().enumerate() {
                let ptr = ptr + 1; // never 0
                if live.contains(&ptr) {
                    continue;
                }
                ops.push(Op::Alloc { ptr, size, file });
                live.push(ptr);
                // Occasionally free an already-live pointer later.
                if i % 3 == 0 {
                    ops.push(Op::Free { ptr });
                    live.retain(|&p| p != ptr);
                }
            }
            ops
        })
}

fn run(reg: &Registry, ops: &[Op]) {
    for (i, op) in ops.iter().enumerate() {
        match op {
            Op::Alloc { ptr, size, file } => {
                let ev = Event::alloc(*ptr, *size, i as u64, 0).with_site(file.clone(), 1, None);
                reg.on_alloc(ev);
            }
            Op::Free { ptr } => reg.on_free(*ptr, None),
        }
    }
}

proptest! {
    #[test]
    fn p1_current_bytes_matches_live_sum_at_quiescence(ops in well_formed_ops()) {
        let reg = Registry::default();
        run(&reg, &ops);
        let m = reg.metrics();
        let live_sum: u64 = reg.blocks().iter().map(|(_, info)| info.size).sum();
        prop_assert_eq!(m.current_bytes, live_sum);
    }

    #[test]
    fn p3_active_allocs_matches_live_len_and_total_never_shrinks(ops in well_formed_ops()) {
        let reg = Registry::default();
        let mut prev_total = 0u64;
        for op in &ops {
            run(&reg, std::slice::from_ref(op));
            let m = reg.metrics();
            prop_assert!(m.total_allocs >= prev_total);
            prev_total = m.total_allocs;
        }
        let m = reg.metrics();
        prop_assert_eq!(m.active_allocs as usize, reg.blocks().len());
    }

    #[test]
    fn p5_interleavings_commute_for_disjoint_pointers(
        a in proptest::collection::vec(1u64..1000, 1..20),
        b in proptest::collection::vec(1001u64..2000, 1..20),
    ) {
        let ops_a: Vec<Op> = a.iter().map(|&ptr| Op::Alloc { ptr, size: ptr, file: None }).collect();
        let ops_b: Vec<Op> = b.iter().map(|&ptr| Op::Alloc { ptr, size: ptr, file: None }).collect();

        let reg1 = Registry::default();
        run(&reg1, &ops_a);
        run(&reg1, &ops_b);

        let reg2 = Registry::default();
        run(&reg2, &ops_b);
        run(&reg2, &ops_a);

        prop_assert_eq!(reg1.metrics().current_bytes, reg2.metrics().current_bytes);
        prop_assert_eq!(reg1.blocks().len(), reg2.blocks().len());

        let mut stats1 = reg1.file_stats();
        let mut stats2 = reg2.file_stats();
        stats1.sort_by(|a, b| a.0.cmp(&b.0));
        stats2.sort_by(|a, b| a.0.cmp(&b.0));
        prop_assert_eq!(stats1, stats2);
    }

    #[test]
    fn p6_timeline_is_bounded_and_non_decreasing(ops in well_formed_ops()) {
        let reg = Registry::new(16, 3_000);
        run(&reg, &ops);
        let timeline = reg.timeline();
        prop_assert!(timeline.len() <= 16);
        for pair in timeline.windows(2) {
            prop_assert!(pair[0].t_ns <= pair[1].t_ns);
        }
    }

    #[test]
    fn p7_leak_count_is_pure_in_threshold(ops in well_formed_ops()) {
        let reg = Registry::default();
        run(&reg, &ops);

        reg.set_leak_threshold(0);
        let strict = reg.leak_kpis();
        reg.set_leak_threshold(0);
        let strict_again = reg.leak_kpis();
        prop_assert_eq!(strict.total_leak_bytes, strict_again.total_leak_bytes);

        reg.set_leak_threshold(u64::MAX / 2_000_000);
        let lenient = reg.leak_kpis();
        prop_assert!(lenient.total_leak_bytes <= strict.total_leak_bytes);
    }
}
