//! Adaptive worker-count tuning
//!
//! On experiment tags the scheduler times every level and perturbs the
//! number of workers per level by a small random jitter. The fastest
//! observed count (argmin) is kept and restored on the following tag.
//! Experiments are frequent at first and become rare once enough tags have
//! been observed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tempo_core::{Instant, Interval};

use super::assignments::Assignments;
use crate::AdaptiveConfig;

pub struct DataCollector {
    config: AdaptiveConfig,
    start_times: Vec<Option<Instant>>,
    exec_times: Vec<Option<Interval>>,
    /// Fastest execution seen per level; 0 means none yet
    mins: Vec<Interval>,
    argmins: Vec<usize>,
    counter: usize,
    collecting: bool,
    rng: StdRng,
}

impl DataCollector {
    pub fn new(config: &AdaptiveConfig, assignments: &Assignments, max_workers: usize) -> Self {
        let levels = assignments.num_levels();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        DataCollector {
            config: config.clone(),
            start_times: vec![None; levels],
            exec_times: vec![None; levels],
            mins: vec![0; levels],
            argmins: vec![max_workers; levels],
            counter: 0,
            collecting: false,
            rng,
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting
    }

    pub fn start_level(&mut self, level: usize, now: Instant) {
        if self.collecting {
            self.start_times[level] = Some(now);
        }
    }

    pub fn end_level(&mut self, level: usize, now: Instant) {
        if let Some(start) = self.start_times[level].take() {
            self.exec_times[level] = Some(now.saturating_sub(start));
        }
    }

    /// Record this tag's measurements and pick worker counts for the next
    pub fn end_tag(&mut self, assignments: &Assignments) {
        if self.collecting {
            for level in 0..self.exec_times.len() {
                let Some(score) = self.exec_times[level].take() else {
                    continue;
                };
                let workers = assignments.num_workers(level);
                if self.mins[level] == 0 || score < self.mins[level] || workers == self.argmins[level] {
                    self.mins[level] = score;
                    self.argmins[level] = workers;
                }
            }
        }
        self.counter += 1;
        let period = if self.counter > self.config.slow_experiments {
            self.config.slow_period
        } else {
            self.config.fast_period
        };
        let jitter = match self.counter % period {
            0 => {
                self.collecting = true;
                let span = self.config.jitter_span.max(0);
                self.rng.gen_range(-span..=span)
            }
            1 => {
                self.collecting = false;
                0
            }
            _ => return,
        };
        for level in 0..assignments.num_levels() {
            let target = (self.argmins[level] as i64 + jitter as i64)
                .clamp(1, assignments.max_workers(level) as i64);
            assignments.set_num_workers(level, target as usize);
        }
    }

    pub fn argmin(&self, level: usize) -> usize {
        self.argmins[level]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdaptiveConfig {
        AdaptiveConfig {
            seed: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn test_alternates_experiment_and_revert() {
        let assignments = Assignments::new(&[8, 8], 4);
        let mut collector = DataCollector::new(&config(), &assignments, 4);
        assert!(!collector.is_collecting());
        collector.end_tag(&assignments);
        // counter 1: revert to argmin
        assert!(!collector.is_collecting());
        assert_eq!(assignments.num_workers(0), 4);
        collector.end_tag(&assignments);
        // counter 2: experiment
        assert!(collector.is_collecting());
        assert!((3..=4).contains(&assignments.num_workers(0)));
    }

    #[test]
    fn test_keeps_fastest_count() {
        let assignments = Assignments::new(&[8], 4);
        let mut collector = DataCollector::new(&config(), &assignments, 4);
        collector.collecting = true;
        assignments.set_num_workers(0, 2);
        collector.start_level(0, 100);
        collector.end_level(0, 150);
        collector.end_tag(&assignments);
        assert_eq!(collector.argmin(0), 2);

        collector.collecting = true;
        assignments.set_num_workers(0, 3);
        collector.start_level(0, 1_000);
        collector.end_level(0, 1_200);
        collector.end_tag(&assignments);
        // slower run with a different count does not replace the argmin
        assert_eq!(collector.argmin(0), 2);
    }

    #[test]
    fn test_counts_stay_in_bounds() {
        let assignments = Assignments::new(&[1, 3, 16], 8);
        let mut collector = DataCollector::new(&config(), &assignments, 8);
        for tag in 0..1_000 {
            collector.start_level(tag % 3, tag as Instant);
            collector.end_level(tag % 3, tag as Instant + 5);
            collector.end_tag(&assignments);
            for level in 0..3 {
                let n = assignments.num_workers(level);
                assert!(n >= 1 && n <= assignments.max_workers(level));
            }
        }
    }
}
