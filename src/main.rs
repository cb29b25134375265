use anyhow::Result;
use clap::Parser;
use rowindexer::{
    env::DataDir, error::ConfigError, indexer::RunSummary, logging::LogHandle,
};
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    version,
    about = "Append a row_number column to the input table and record the run time"
)]
struct Args {
    /// Any non-empty value enables debug logging.
    debug: Option<String>,
}

impl Args {
    fn debug(&self) -> bool {
        self.debug.as_deref().is_some_and(|s| !s.is_empty())
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log = match LogHandle::init(args.debug()) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::from(1);
        }
    };

    let data_dir = DataDir::resolve();
    info!(data_dir = %data_dir.root().display(), "startup");

    let result = rowindexer::run(&data_dir, &log);
    ExitCode::from(exit_status(&result))
}

/// Log the outcome and map it to the process exit status.
fn exit_status(result: &Result<RunSummary>) -> u8 {
    match result {
        Ok(summary) => {
            info!(
                rows = summary.rows,
                output = %summary.output.display(),
                "all done"
            );
            0
        }
        Err(e) => {
            match e.downcast_ref::<ConfigError>() {
                Some(config_error) => error!("{}", config_error),
                None => error!("{:?}", e),
            }
            1
        }
    }
}
