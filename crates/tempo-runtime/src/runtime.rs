//! Runtime: environments, their workers and global stop requests
//!
//! A runtime owns one or more environments (enclaves) that share a
//! physical clock and a start time. Environment 0 talks to the
//! coordinator when the program is a federate; the others run
//! unfederated alongside it.

use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use tempo_core::{EnvironmentId, Instant, Tag, TempoError, TempoResult};
use tempo_time::PhysicalClock;

use crate::scheduler::{NoopPriority, ThreadPriority};
use crate::{run_worker, Coordination, Environment, ExecutionMode, Program, RuntimeConfig, Unfederated};

/// State shared by every environment of a runtime
pub struct Global {
    /// Set once a stop request is under way; later requests are ignored
    stop_latch: Mutex<bool>,
    environments: RwLock<Vec<Weak<Environment>>>,
    coordination: Arc<dyn Coordination>,
}

impl Global {
    pub fn new(coordination: Arc<dyn Coordination>) -> Arc<Self> {
        Arc::new(Global {
            stop_latch: Mutex::new(false),
            environments: RwLock::new(Vec::new()),
            coordination,
        })
    }

    pub(crate) fn register(&self, env: &Arc<Environment>) {
        self.environments.write().push(Arc::downgrade(env));
    }

    pub fn environments(&self) -> Vec<Arc<Environment>> {
        self.environments.read().iter().filter_map(Weak::upgrade).collect()
    }

    /// Freeze logical time in every environment while a stop tag is agreed.
    /// Each barrier sits at the latest tag seen so far, so environments that
    /// lag behind may still catch up to it.
    ///
    /// Returns the latest current tag across environments, or `None` if a
    /// stop is already in progress.
    pub fn begin_stop(&self) -> Option<Tag> {
        let mut latch = self.stop_latch.lock();
        if *latch {
            debug!("Stop already requested");
            return None;
        }
        *latch = true;
        let mut latest = Tag::NEVER;
        for env in self.environments() {
            let mut state = env.lock();
            latest = latest.max(state.current_tag);
            env.raise_barrier_locked(&mut state, latest);
        }
        Some(latest)
    }

    /// Answer a stop request that originated elsewhere in the federation.
    ///
    /// Returns the earliest tag at which every environment can still stop:
    /// `proposed`, or one microstep past a current tag that already
    /// reached it. Environments are held below that tag unless a stop was
    /// already in progress.
    pub fn accept_stop_request(&self, proposed: Tag) -> Tag {
        let mut latch = self.stop_latch.lock();
        let already_blocked = *latch;
        *latch = true;
        let mut stop = proposed;
        for env in self.environments() {
            let mut state = env.lock();
            if stop <= state.current_tag {
                stop = state.current_tag.next_microstep();
            }
            if !already_blocked {
                env.raise_barrier_locked(&mut state, stop);
            }
        }
        stop
    }

    /// Set the stop tag everywhere and release the barrier raised by
    /// [`Global::begin_stop`].
    ///
    /// An environment that already processed `stop` stops one microstep
    /// after its current tag instead.
    pub fn finish_stop(&self, stop: Tag) {
        info!("Stopping at {}", stop);
        for env in self.environments() {
            let mut state = env.lock();
            let mut tag = stop;
            if tag <= state.current_tag {
                error!(
                    env = %env.id(),
                    "Stop tag {} is not after the current tag {}; stopping at the next microstep",
                    stop,
                    state.current_tag
                );
                tag = state.current_tag.next_microstep();
            }
            env.set_stop_tag_locked(&mut state, tag);
            if state.barrier.is_raised() {
                if let Err(err) = env.lower_barrier_locked(&mut state) {
                    env.fail_locked(&mut state, err);
                }
            }
        }
    }

    /// Request that execution stop at the next microstep.
    ///
    /// A federate forwards the request to the coordinator, and the stop tag
    /// is set when the grant arrives; otherwise it is set immediately.
    pub fn request_stop(&self) {
        let Some(latest) = self.begin_stop() else {
            return;
        };
        let stop = latest.next_microstep();
        match self.coordination.request_stop(stop) {
            Ok(true) => debug!("Stop request at {} sent to coordinator", stop),
            Ok(false) => self.finish_stop(stop),
            Err(err) => {
                warn!("Stop request could not be forwarded: {}", err);
                self.finish_stop(stop);
            }
        }
    }

    pub fn is_stopping(&self) -> bool {
        *self.stop_latch.lock()
    }
}

/// Outcome of a completed run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub start_time: Instant,
    /// Last tag processed by each environment
    pub final_tags: Vec<Tag>,
}

pub struct Runtime {
    config: Arc<RuntimeConfig>,
    environments: Vec<Arc<Environment>>,
    global: Arc<Global>,
    clock: Arc<PhysicalClock>,
}

impl Runtime {
    /// Standalone runtime for a single program
    pub fn new(config: RuntimeConfig, program: Program) -> TempoResult<Self> {
        Self::with_enclaves(config, vec![program])
    }

    /// Standalone runtime with one environment per program
    pub fn with_enclaves(config: RuntimeConfig, programs: Vec<Program>) -> TempoResult<Self> {
        Self::assemble(
            config,
            programs,
            Arc::new(Unfederated),
            Arc::new(PhysicalClock::new()),
            Arc::new(NoopPriority),
        )
    }

    /// Federate runtime; `coordination` connects environment 0 to the federation
    pub fn federated(
        config: RuntimeConfig,
        program: Program,
        coordination: Arc<dyn Coordination>,
        clock: Arc<PhysicalClock>,
    ) -> TempoResult<Self> {
        Self::assemble(config, vec![program], coordination, clock, Arc::new(NoopPriority))
    }

    pub fn assemble(
        config: RuntimeConfig,
        programs: Vec<Program>,
        coordination: Arc<dyn Coordination>,
        clock: Arc<PhysicalClock>,
        priorities: Arc<dyn ThreadPriority>,
    ) -> TempoResult<Self> {
        config.validate()?;
        if programs.is_empty() {
            return Err(TempoError::InvalidProgram("no environments".into()));
        }
        let config = Arc::new(config);
        let global = Global::new(Arc::clone(&coordination));
        let mut environments = Vec::with_capacity(programs.len());
        for (i, program) in programs.into_iter().enumerate() {
            let coordination: Arc<dyn Coordination> = if i == 0 {
                Arc::clone(&coordination)
            } else {
                Arc::new(Unfederated)
            };
            environments.push(Environment::new(
                EnvironmentId(i as u32),
                Arc::new(program),
                Arc::clone(&config),
                Arc::clone(&clock),
                coordination,
                Arc::clone(&global),
                Arc::clone(&priorities),
            )?);
        }
        Ok(Runtime {
            config,
            environments,
            global,
            clock,
        })
    }

    pub fn environment(&self, index: usize) -> Option<&Arc<Environment>> {
        self.environments.get(index)
    }

    pub fn environments(&self) -> &[Arc<Environment>] {
        &self.environments
    }

    pub fn global(&self) -> &Arc<Global> {
        &self.global
    }

    pub fn clock(&self) -> &Arc<PhysicalClock> {
        &self.clock
    }

    /// Stop handle usable from other threads while [`Runtime::run`] blocks
    pub fn stopper(&self) -> Arc<Global> {
        Arc::clone(&self.global)
    }

    pub fn request_stop(&self) {
        self.global.request_stop();
    }

    /// Run to completion, blocking the calling thread
    pub fn run(&self) -> TempoResult<RunSummary> {
        let main = &self.environments[0];
        let coordination = Arc::clone(main.coordination());
        let start_time = match coordination.synchronize_start(main, self.clock.try_now()?) {
            Ok(start) => start,
            Err(err) => {
                coordination.finish(Some(&err));
                return Err(err);
            }
        };
        info!("Starting {} environment(s) at {}", self.environments.len(), start_time);

        for env in &self.environments {
            if let Err(err) = env.initialize_start_tag(start_time) {
                error!(env = %env.id(), "Initialization failed: {}", err);
                env.fail(err);
            }
        }

        let single = matches!(self.config.execution, ExecutionMode::SingleThreaded) && self.environments.len() == 1;
        if single {
            run_worker(main, 0);
        } else {
            self.run_threads()?;
        }

        let failure = self.environments.iter().find_map(|env| env.failure());
        coordination.finish(failure.as_ref());
        if let Some(err) = failure {
            return Err(err);
        }
        let final_tags = self.environments.iter().map(|env| env.current_tag()).collect();
        info!("Execution finished");
        Ok(RunSummary {
            start_time,
            final_tags,
        })
    }

    fn run_threads(&self) -> TempoResult<()> {
        let mut handles = Vec::new();
        for env in &self.environments {
            for worker in 0..env.scheduler().num_workers() {
                let env_for_worker = Arc::clone(env);
                let handle = thread::Builder::new()
                    .name(format!("tempo-{}-w{}", env.id(), worker))
                    .spawn(move || run_worker(&env_for_worker, worker))
                    .map_err(|e| TempoError::InvalidConfig(format!("cannot spawn worker: {}", e)))?;
                handles.push(handle);
            }
        }
        for handle in handles {
            if handle.join().is_err() {
                error!("Worker thread panicked outside a reaction");
            }
        }
        Ok(())
    }
}
