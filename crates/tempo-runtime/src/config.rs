//! Runtime configuration

use tempo_core::{FederateId, Interval, TempoError, TempoResult};

/// How reactions are executed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One worker, run on the calling thread
    SingleThreaded,
    /// A pool with the given number of workers
    Threaded(usize),
}

/// How this environment coordinates with other federates
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CoordinationMode {
    /// Standalone program
    #[default]
    None,
    /// Tag advances are granted by the coordinator
    Centralized,
    /// Tag advances are bounded by STA/STAA waits
    Decentralized,
}

/// OS priority values available for deadline-driven boosting.
///
/// `min` is the base priority of workers without a deadline; deadline
/// holders are spread over `min + 1 ..= max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriorityRange {
    pub min: i32,
    pub max: i32,
}

impl PriorityRange {
    pub fn new(min: i32, max: i32) -> Self {
        PriorityRange { min, max }
    }

    /// Number of values available to deadline holders
    pub fn values(&self) -> usize {
        (self.max - self.min).max(0) as usize
    }
}

/// Tuning for the adaptive level scheduler
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdaptiveConfig {
    /// Tags after which experiments become rare
    pub slow_experiments: usize,
    /// Experiment period while learning
    pub fast_period: usize,
    /// Experiment period after learning
    pub slow_period: usize,
    /// Worker-count perturbation span (jitter is drawn from `-span..=span`)
    pub jitter_span: i32,
    /// Seed for the jitter generator; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        AdaptiveConfig {
            slow_experiments: 256,
            fast_period: 2,
            slow_period: 130,
            jitter_span: 1,
            seed: None,
        }
    }
}

/// Runtime configuration
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Do not wait for physical time to catch up with logical time
    pub fast: bool,
    /// Keep running with an empty event queue, waiting for physical actions
    pub keepalive: bool,
    /// Logical duration after which execution stops
    pub timeout: Option<Interval>,
    pub execution: ExecutionMode,
    pub coordination: CoordinationMode,
    /// Enables EDF priority boosting of workers running reactions with deadlines
    pub realtime: Option<PriorityRange>,
    pub adaptive: AdaptiveConfig,
    /// Safe-to-advance offset used by decentralized coordination
    pub sta_offset: Interval,
    /// Federate hosted by this runtime, if any
    pub federate: Option<FederateId>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        RuntimeConfig {
            fast: false,
            keepalive: false,
            timeout: None,
            execution: ExecutionMode::Threaded(workers),
            coordination: CoordinationMode::None,
            realtime: None,
            adaptive: AdaptiveConfig::default(),
            sta_offset: 0,
            federate: None,
        }
    }
}

impl RuntimeConfig {
    /// Logical time runs as fast as reactions allow
    pub fn fast_simulation() -> Self {
        RuntimeConfig {
            fast: true,
            ..Default::default()
        }
    }

    /// Physical-time execution with EDF priority boosting
    pub fn realtime(range: PriorityRange) -> Self {
        RuntimeConfig {
            realtime: Some(range),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Interval) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.execution = ExecutionMode::Threaded(workers);
        self
    }

    /// Number of workers the scheduler manages
    pub fn workers(&self) -> usize {
        match self.execution {
            ExecutionMode::SingleThreaded => 1,
            ExecutionMode::Threaded(n) => n,
        }
    }

    pub fn validate(&self) -> TempoResult<()> {
        if self.workers() == 0 {
            return Err(TempoError::InvalidConfig("worker count must be positive".into()));
        }
        if let Some(timeout) = self.timeout {
            if timeout < 0 {
                return Err(TempoError::InvalidConfig(format!("negative timeout {}", timeout)));
            }
        }
        if self.sta_offset < 0 {
            return Err(TempoError::InvalidConfig(format!(
                "negative STA offset {}",
                self.sta_offset
            )));
        }
        if self.coordination != CoordinationMode::None && self.federate.is_none() {
            return Err(TempoError::InvalidConfig(format!(
                "{:?} coordination requires a federate id",
                self.coordination
            )));
        }
        if let Some(range) = self.realtime {
            if range.min > range.max {
                return Err(TempoError::InvalidConfig(format!(
                    "empty priority range {}..={}",
                    range.min, range.max
                )));
            }
        }
        if self.adaptive.fast_period == 0 || self.adaptive.slow_period == 0 {
            return Err(TempoError::InvalidConfig("experiment period must be positive".into()));
        }
        Ok(())
    }
}
