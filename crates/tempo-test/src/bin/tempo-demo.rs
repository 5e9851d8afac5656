//! Tempo demo: a periodic counter, standalone or as one federate
//!
//! ```text
//! tempo-demo --fast --timeout 1 sec
//! tempo-demo --federate 1 --id demo --rti localhost:15045 --timeout 5 sec
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use tempo_core::{Interval, TempoResult, MSEC};
use tempo_federated::{Federate, FederateConfig};
use tempo_runtime::{init_logging, CliArgs, Coordination, Runtime};
use tempo_test::demo_program;
use tempo_time::PhysicalClock;
use tempo_transport::RtiAddress;

const TICK_PERIOD: Interval = 100 * MSEC;

fn run(args: CliArgs) -> TempoResult<()> {
    let federated = args.is_federated();
    let federation_id = args.federation_id.clone().unwrap_or_else(|| "Unidentified Federation".into());
    let rti: RtiAddress = match &args.rti {
        Some(address) => address.parse()?,
        None => RtiAddress::default(),
    };
    let config = args.into_config()?;
    let program = demo_program(TICK_PERIOD)?;

    let runtime = if federated {
        let fed_config = FederateConfig::from_runtime(&config, federation_id)?;
        let federate = Federate::connect(fed_config, &program, &rti)?;
        let coordination: Arc<dyn Coordination> = federate.clone();
        let runtime = Runtime::federated(config, program, coordination, Arc::new(PhysicalClock::new()))?;
        if let Some(env) = runtime.environment(0) {
            federate.attach(env);
        }
        runtime
    } else {
        Runtime::new(config, program)?
    };

    let summary = runtime.run()?;
    info!("Finished; final tags {:?}", summary.final_tags);
    Ok(())
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_logging(args.log_format, args.verbose);
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            eprintln!("tempo-demo: {}", err);
            ExitCode::FAILURE
        }
    }
}
