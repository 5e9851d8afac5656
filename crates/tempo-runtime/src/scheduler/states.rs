//! Worker sleep/wake bookkeeping
//!
//! Workers are grouped by the bit length of their index, each group with
//! its own condition variable. Waking `n` workers notifies only the groups
//! that contain workers `0..n`, so a level that needs two workers does not
//! wake a pool of sixty-four.

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Condition-variable group of a worker
pub fn cond_of(worker: usize) -> usize {
    (usize::BITS - worker.leading_zeros()) as usize
}

/// Shared worker state, guarded by [`WorkerStates::lock`]
#[derive(Debug)]
pub struct StateInner {
    /// Bumped every time a level (or tag) is released to the workers
    pub level_counter: u64,
    /// Workers with index below this may take reactions
    pub num_awakened: usize,
    /// Awakened workers that have not yet run out of work
    pub num_loose: usize,
    pub should_stop: bool,
}

pub struct WorkerStates {
    inner: Mutex<StateInner>,
    conds: Vec<Condvar>,
    num_workers: usize,
}

impl WorkerStates {
    /// All workers start awake and loose
    pub fn new(num_workers: usize) -> Self {
        let num_workers = num_workers.max(1);
        WorkerStates {
            inner: Mutex::new(StateInner {
                level_counter: 0,
                num_awakened: num_workers,
                num_loose: num_workers,
                should_stop: false,
            }),
            conds: (0..=cond_of(num_workers - 1)).map(|_| Condvar::new()).collect(),
            num_workers,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock()
    }

    /// Release workers `0..n` for the next level
    pub fn awaken_locked(&self, state: &mut StateInner, n: usize) {
        let n = n.clamp(1, self.num_workers);
        state.num_awakened = n;
        state.num_loose = n;
        state.level_counter += 1;
        for cond in &self.conds[..=cond_of(n - 1)] {
            cond.notify_all();
        }
    }

    /// Release every worker and make them exit
    pub fn stop_locked(&self, state: &mut StateInner) {
        state.should_stop = true;
        state.num_awakened = self.num_workers;
        state.level_counter += 1;
        for cond in &self.conds {
            cond.notify_all();
        }
    }

    /// Sleep until the next release that includes `worker`, or a stop
    pub fn wait_locked(&self, worker: usize, state: &mut MutexGuard<'_, StateInner>) {
        let snapshot = state.level_counter;
        let cond = &self.conds[cond_of(worker).min(self.conds.len() - 1)];
        while !state.should_stop && !(state.level_counter != snapshot && worker < state.num_awakened) {
            cond.wait(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_cond_of_is_bit_length() {
        assert_eq!(cond_of(0), 0);
        assert_eq!(cond_of(1), 1);
        assert_eq!(cond_of(2), 2);
        assert_eq!(cond_of(3), 2);
        assert_eq!(cond_of(4), 3);
        assert_eq!(cond_of(7), 3);
        assert_eq!(cond_of(8), 4);
    }

    #[test]
    fn test_awaken_releases_only_selected_workers() {
        let states = Arc::new(WorkerStates::new(4));
        {
            let mut st = states.lock();
            st.num_loose = 0;
            st.num_awakened = 0;
        }
        let waiter = {
            let states = states.clone();
            std::thread::spawn(move || {
                let mut st = states.lock();
                states.wait_locked(1, &mut st);
                (st.should_stop, st.num_awakened)
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        {
            let mut st = states.lock();
            // Worker 1 is not among the first one.
            states.awaken_locked(&mut st, 1);
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!waiter.is_finished());
        {
            let mut st = states.lock();
            states.awaken_locked(&mut st, 2);
        }
        assert_eq!(waiter.join().unwrap(), (false, 2));
    }

    #[test]
    fn test_stop_wakes_everyone() {
        let states = Arc::new(WorkerStates::new(8));
        let waiters: Vec<_> = (0..8)
            .map(|w| {
                let states = states.clone();
                std::thread::spawn(move || {
                    let mut st = states.lock();
                    states.wait_locked(w, &mut st);
                    st.should_stop
                })
            })
            .collect();
        std::thread::sleep(std::time::Duration::from_millis(20));
        {
            let mut st = states.lock();
            states.stop_locked(&mut st);
        }
        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
    }
}
