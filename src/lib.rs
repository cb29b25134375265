pub mod config;
pub mod env;
pub mod error;
pub mod indexer;
pub mod logging;
pub mod state;
pub mod tables;

use anyhow::Result;

use crate::{
    config::Configuration,
    env::DataDir,
    indexer::{RowIndexer, RunSummary},
    logging::LogHandle,
    state::FileStateStore,
    tables::FileTableIo,
};

/// Wire the file-backed services for `data_dir` and run the indexer once.
pub fn run(data_dir: &DataDir, log: &LogHandle) -> Result<RunSummary> {
    let config = Configuration::from_file(data_dir.config_path())?;
    let state = FileStateStore::new(data_dir.state_in(), data_dir.state_out());
    let tables = FileTableIo::new(data_dir.tables_in(), data_dir.tables_out());

    let indexer = RowIndexer::new(&config, &state, &tables, log)?;
    indexer.run()
}
