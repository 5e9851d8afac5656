//! Whole-runtime properties over randomly shaped timer programs

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use proptest::prelude::*;

use tempo_runtime::{ProgramBuilder, Runtime, RuntimeConfig};
use tempo_test::periodic_timer;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn timer_tags_strictly_increase(offset in 0i64..200, period in 1i64..150, workers in 1usize..4) {
        let timeout = 1_000;
        let (program, ticks, shutdowns) = periodic_timer(offset, period).unwrap();
        let config = RuntimeConfig::fast_simulation().with_timeout(timeout).with_workers(workers);
        Runtime::new(config, program).unwrap().run().unwrap();

        let tags = ticks.tags();
        prop_assert!(tags.windows(2).all(|w| w[0] < w[1]));
        let expected = if offset > timeout { 0 } else { (timeout - offset) / period + 1 };
        prop_assert_eq!(tags.len() as i64, expected);
        prop_assert_eq!(shutdowns.len(), 1);
    }

    #[test]
    fn reaction_runs_once_per_tag(timers in 1usize..5, workers in 1usize..4) {
        // Several timers with the same schedule all trigger one reaction.
        let runs = Arc::new(AtomicU32::new(0));
        let mut b = ProgramBuilder::new("fan-in");
        let ids: Vec<_> = (0..timers).map(|i| b.timer(&format!("t{}", i), 0, 100)).collect();
        let count = Arc::clone(&runs);
        let mut reaction = b.reaction("join", 0, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        for id in ids {
            reaction = reaction.triggered_by(id);
        }
        reaction.add();
        let config = RuntimeConfig::fast_simulation().with_timeout(500).with_workers(workers);
        Runtime::new(config, b.build().unwrap()).unwrap().run().unwrap();
        prop_assert_eq!(runs.load(Ordering::SeqCst), 6);
    }
}
