//! Command-line options shared by runtime binaries

use clap::{ArgAction, Parser};

use tempo_core::{parse_interval, FederateId, TempoError, TempoResult};

use crate::{CoordinationMode, ExecutionMode, LogFormat, RuntimeConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "tempo")]
#[command(about = "Deterministic timed reactor runtime", long_about = None)]
pub struct CliArgs {
    /// Do not wait for physical time to catch up with logical time
    #[arg(long, num_args = 0..=1, default_missing_value = "true", default_value_t = false, action = ArgAction::Set)]
    pub fast: bool,

    /// Stop after this much logical time, e.g. `--timeout 2 sec`
    #[arg(long, num_args = 2, value_names = ["N", "UNIT"])]
    pub timeout: Option<Vec<String>>,

    /// Keep running with an empty event queue, waiting for physical actions
    #[arg(long, num_args = 0..=1, default_missing_value = "true", default_value_t = false, action = ArgAction::Set)]
    pub keepalive: bool,

    /// Worker threads; 0 runs everything on the calling thread
    #[arg(long)]
    pub workers: Option<usize>,

    /// Federation id shared by all federates of one execution
    #[arg(long = "id")]
    pub federation_id: Option<String>,

    /// Id of this federate within the federation
    #[arg(long)]
    pub federate: Option<u16>,

    /// Coordinator address, `[user@]host[:port]`
    #[arg(long)]
    pub rti: Option<String>,

    /// Use decentralized coordination instead of a central grant authority
    #[arg(long)]
    pub decentralized: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log record format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl CliArgs {
    pub fn into_config(self) -> TempoResult<RuntimeConfig> {
        let mut config = RuntimeConfig {
            fast: self.fast,
            keepalive: self.keepalive,
            ..Default::default()
        };
        if let Some(parts) = &self.timeout {
            let [count, unit] = parts.as_slice() else {
                return Err(TempoError::InvalidConfig("--timeout takes <n> <unit>".into()));
            };
            config.timeout = Some(parse_interval(count, unit)?);
        }
        match self.workers {
            Some(0) => config.execution = ExecutionMode::SingleThreaded,
            Some(n) => config.execution = ExecutionMode::Threaded(n),
            None => {}
        }
        if let Some(federate) = self.federate {
            config.federate = Some(FederateId::new(federate));
            config.coordination = if self.decentralized {
                CoordinationMode::Decentralized
            } else {
                CoordinationMode::Centralized
            };
        }
        config.validate()?;
        Ok(config)
    }

    pub fn is_federated(&self) -> bool {
        self.federate.is_some()
    }
}
