// src/indexer.rs

use anyhow::{Context, Result};
use chrono::Utc;
use csv::StringRecord;
use std::{fmt, path::PathBuf};
use tracing::{debug, info, warn};

use crate::{
    config::{self, ConfigProvider, Mandatory, MANDATORY_IMAGE_PARS, MANDATORY_PARS},
    error::ConfigError,
    logging::LogHandle,
    state::StateStore,
    tables::{TableIo, TableManifest, TableWriter},
};

/// Name of the appended index column, also the output primary key.
pub const ROW_NUMBER: &str = "row_number";

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// What a completed run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub input: String,
    pub output: PathBuf,
    pub rows: u64,
    pub previous_update: Option<f64>,
    pub last_update: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Field(usize),
    RowNumber,
}

/// Maps input records onto the output column list.
#[derive(Debug)]
struct RowLayout {
    columns: Vec<String>,
    sources: Vec<Source>,
    /// Unique input names in first-seen order, each with its last position.
    named: Vec<(String, usize)>,
}

impl RowLayout {
    fn new(headers: &[String]) -> Self {
        let mut columns = headers.to_vec();
        columns.push(ROW_NUMBER.to_string());

        // a duplicated name resolves to its last field
        let last = |name: &str| headers.iter().rposition(|h| h == name);
        let mut sources: Vec<Source> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| match h.as_str() {
                ROW_NUMBER => Source::RowNumber,
                _ => Source::Field(last(h).unwrap_or(i)),
            })
            .collect();
        sources.push(Source::RowNumber);

        let mut named: Vec<(String, usize)> = Vec::with_capacity(headers.len());
        for (i, h) in headers.iter().enumerate() {
            if !named.iter().any(|(n, _)| n == h) {
                named.push((h.clone(), last(h).unwrap_or(i)));
            }
        }

        Self {
            columns,
            sources,
            named,
        }
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn project<'a>(
        &'a self,
        record: &'a StringRecord,
        row_number: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.sources.iter().map(move |s| match s {
            Source::Field(i) => record.get(*i).unwrap_or(""),
            Source::RowNumber => row_number,
        })
    }

    fn display<'a>(&'a self, record: &'a StringRecord) -> RowDisplay<'a> {
        RowDisplay {
            layout: self,
            record,
        }
    }
}

/// `{"col": "value", ...}` view of an input row.
struct RowDisplay<'a> {
    layout: &'a RowLayout,
    record: &'a StringRecord,
}

impl fmt::Display for RowDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (n, (name, i)) in self.layout.named.iter().enumerate() {
            if n > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{:?}: {:?}", name, self.record.get(*i).unwrap_or(""))?;
        }
        f.write_str("}")
    }
}

/// Appends a `row_number` column to the first input table and records the
/// time of the run in the persisted state.
pub struct RowIndexer<'a> {
    config: &'a dyn ConfigProvider,
    state: &'a dyn StateStore,
    tables: &'a dyn TableIo,
    log: &'a LogHandle,
}

impl<'a> RowIndexer<'a> {
    /// Validate against the built-in mandatory lists.
    pub fn new(
        config: &'a dyn ConfigProvider,
        state: &'a dyn StateStore,
        tables: &'a dyn TableIo,
        log: &'a LogHandle,
    ) -> Result<Self, ConfigError> {
        Self::with_mandatory(
            config,
            state,
            tables,
            log,
            MANDATORY_PARS,
            MANDATORY_IMAGE_PARS,
        )
    }

    pub fn with_mandatory(
        config: &'a dyn ConfigProvider,
        state: &'a dyn StateStore,
        tables: &'a dyn TableIo,
        log: &'a LogHandle,
        mandatory: &[Mandatory],
        mandatory_image: &[Mandatory],
    ) -> Result<Self, ConfigError> {
        if config.debug() {
            if let Err(e) = log.enable_debug() {
                warn!("could not raise log level: {:#}", e);
            }
        }
        info!("Running version {}", APP_VERSION);
        info!("Loading configuration...");

        config::validate(config, mandatory, mandatory_image)?;
        debug!(
            action = config.action(),
            debug = log.is_debug(),
            "configuration valid"
        );

        Ok(Self {
            config,
            state,
            tables,
            log,
        })
    }

    /// One streaming pass over the first input table.
    pub fn run(&self) -> Result<RunSummary> {
        info!("Running...");
        let mut state = self.state.load().context("loading state")?;
        let previous_update = state.last_update();
        match previous_update {
            Some(ts) => info!("Last update: {}", ts),
            None => info!("Last update: None"),
        }

        let inputs = self.tables.input_tables().context("listing input tables")?;
        let input = inputs.first().context("no input table found")?;
        if inputs.len() > 1 {
            debug!(
                ignored = inputs.len() - 1,
                "more than one input table, processing only {}", input.file_name
            );
        }
        if let Some(id) = input.manifest.as_ref().and_then(|m| m.id.as_deref()) {
            debug!(source = id, "input table {}", input.file_name);
        }

        let mut reader = csv::Reader::from_reader(self.tables.open_input(input)?);
        let headers: Vec<String> = reader
            .headers()
            .with_context(|| format!("reading header of {}", input.file_name))?
            .iter()
            .map(str::to_string)
            .collect();
        if headers.is_empty() {
            anyhow::bail!("input {} has no header row", input.file_name);
        }
        if headers.iter().any(|h| h == ROW_NUMBER) {
            warn!(
                "input {} already has a {} column, it will be overwritten",
                input.file_name, ROW_NUMBER
            );
        }
        let layout = RowLayout::new(&headers);

        // the manifest must exist before any data is written
        let output = self.tables.output_path(&input.file_name);
        self.tables
            .write_manifest(
                &output,
                &TableManifest {
                    columns: layout.columns().to_vec(),
                    primary_key: vec![ROW_NUMBER.to_string()],
                    incremental: true,
                },
            )
            .context("writing output manifest")?;

        let mut writer = TableWriter::new(self.tables.create_output(&output)?, layout.columns())?;
        let print_rows = self.config.print_rows();
        let mut record = StringRecord::new();
        let mut index: u64 = 0;
        while reader
            .read_record(&mut record)
            .with_context(|| format!("reading row {} of {}", index, input.file_name))?
        {
            if print_rows {
                info!("Printing line {}: {}", index, layout.display(&record));
            }
            let row_number = index.to_string();
            writer.write_row(layout.project(&record, &row_number))?;
            index += 1;
        }
        let rows = writer.finish()?;
        debug!(rows, debug = self.log.is_debug(), "wrote {}", output.display());

        let last_update = state.set_last_update(Utc::now());
        self.state.save(&state).context("saving state")?;
        info!(rows, last_update, "Done");

        Ok(RunSummary {
            input: input.file_name.clone(),
            output,
            rows,
            previous_update,
            last_update,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Configuration,
        logging::capture,
        state::{memory::MemoryStateStore, PersistedState, KEY_LAST_UPDATE},
        tables::memory::MemoryTableIo,
    };
    use serde_json::{json, Map, Value};

    fn params(v: Value) -> Configuration {
        match v {
            Value::Object(m) => Configuration::with_parameters(m),
            _ => Configuration::with_parameters(Map::new()),
        }
    }

    fn run_once(
        config: &Configuration,
        state: &MemoryStateStore,
        tables: &MemoryTableIo,
    ) -> Result<RunSummary> {
        let log = LogHandle::detached(false);
        RowIndexer::new(config, state, tables, &log)?.run()
    }

    #[test]
    fn appends_row_numbers() -> Result<()> {
        let tables = MemoryTableIo::new().with_input("input.csv", "id,name\n1,a\n2,b\n");
        let state = MemoryStateStore::default();
        let summary = run_once(&Configuration::default(), &state, &tables)?;

        assert_eq!(
            tables.output("input.csv").as_deref(),
            Some("id,name,row_number\n1,a,0\n2,b,1\n")
        );
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.input, "input.csv");
        assert_eq!(summary.output, PathBuf::from("out/tables/input.csv"));
        Ok(())
    }

    #[test]
    fn manifest_declared_before_writing() -> Result<()> {
        let tables = MemoryTableIo::new().with_input("t.csv", "a,b\nx,y\n");
        run_once(&Configuration::default(), &MemoryStateStore::default(), &tables)?;

        assert_eq!(
            tables.events(),
            vec!["manifest:out/tables/t.csv", "create:out/tables/t.csv"]
        );
        assert_eq!(
            tables.manifest("t.csv"),
            Some(TableManifest {
                columns: vec!["a".into(), "b".into(), "row_number".into()],
                primary_key: vec!["row_number".into()],
                incremental: true,
            })
        );
        Ok(())
    }

    #[test]
    fn row_numbers_are_dense_and_ordered() -> Result<()> {
        let mut input = String::from("v\n");
        for i in (0..500).rev() {
            input.push_str(&format!("{}\n", i));
        }
        let tables = MemoryTableIo::new().with_input("big.csv", &input);
        let summary = run_once(&Configuration::default(), &MemoryStateStore::default(), &tables)?;
        assert_eq!(summary.rows, 500);

        let out = tables.output("big.csv").unwrap_or_default();
        let mut rdr = csv::Reader::from_reader(out.as_bytes());
        for (i, rec) in rdr.records().enumerate() {
            let rec = rec?;
            assert_eq!(rec.get(0), Some((499 - i).to_string().as_str()));
            assert_eq!(rec.get(1), Some(i.to_string().as_str()));
        }
        Ok(())
    }

    #[test]
    fn header_only_input_still_updates_state() -> Result<()> {
        let tables = MemoryTableIo::new().with_input("empty.csv", "id,name\n");
        let state = MemoryStateStore::default();
        let summary = run_once(&Configuration::default(), &state, &tables)?;

        assert_eq!(summary.rows, 0);
        assert_eq!(tables.output("empty.csv").as_deref(), Some("id,name,row_number\n"));
        assert_eq!(state.saves(), 1);
        assert!(state.current().last_update().is_some());
        Ok(())
    }

    #[test]
    fn headerless_input_fails_before_manifest() {
        let tables = MemoryTableIo::new().with_input("t.csv", "");
        let state = MemoryStateStore::default();
        let err = run_once(&Configuration::default(), &state, &tables).unwrap_err();

        assert_eq!(err.to_string(), "input t.csv has no header row");
        assert!(tables.events().is_empty());
        assert!(tables.manifest("t.csv").is_none());
        assert_eq!(state.saves(), 0);
    }

    #[test]
    fn existing_row_number_column_is_overwritten() -> Result<()> {
        let tables = MemoryTableIo::new().with_input("t.csv", "row_number,x\n7,a\n9,b\n");
        run_once(&Configuration::default(), &MemoryStateStore::default(), &tables)?;

        // the name appears twice; both positions carry the index
        assert_eq!(
            tables.output("t.csv").as_deref(),
            Some("row_number,x,row_number\n0,a,0\n1,b,1\n")
        );
        let manifest = tables.manifest("t.csv").unwrap();
        assert_eq!(manifest.columns.iter().filter(|c| *c == ROW_NUMBER).count(), 2);
        Ok(())
    }

    #[test]
    fn duplicate_input_columns_take_last_value() -> Result<()> {
        let tables = MemoryTableIo::new().with_input("t.csv", "a,a\n1,2\n");
        run_once(&Configuration::default(), &MemoryStateStore::default(), &tables)?;
        assert_eq!(tables.output("t.csv").as_deref(), Some("a,a,row_number\n2,2,0\n"));
        Ok(())
    }

    #[test]
    fn state_is_refreshed_and_replaced() -> Result<()> {
        let mut prior = PersistedState::new();
        prior.insert(KEY_LAST_UPDATE, json!(1_000.5));
        prior.insert("cursor", json!("keep"));
        let state = MemoryStateStore::new(prior);
        let tables = MemoryTableIo::new().with_input("t.csv", "a\n1\n");

        let summary = run_once(&Configuration::default(), &state, &tables)?;
        assert_eq!(summary.previous_update, Some(1_000.5));
        assert!(summary.last_update > 1_000.5);

        let saved = state.current();
        assert_eq!(saved.last_update(), Some(summary.last_update));
        assert_eq!(saved.get("cursor"), Some(&json!("keep")));
        Ok(())
    }

    #[test]
    fn repeated_runs_are_not_idempotent() -> Result<()> {
        // each run emits a full incremental load; the host appends both
        let tables = MemoryTableIo::new().with_input("t.csv", "a\n1\n2\n");
        let state = MemoryStateStore::default();
        let first = run_once(&Configuration::default(), &state, &tables)?;
        let first_out = tables.output("t.csv");
        let second = run_once(&Configuration::default(), &state, &tables)?;

        assert_eq!(first.rows, second.rows);
        assert_eq!(tables.output("t.csv"), first_out);
        assert_eq!(tables.manifest("t.csv").map(|m| m.incremental), Some(true));
        assert_eq!(second.previous_update, Some(first.last_update));
        assert!(second.last_update >= first.last_update);
        assert_eq!(state.saves(), 2);
        Ok(())
    }

    #[test]
    fn only_first_input_is_processed() -> Result<()> {
        let tables = MemoryTableIo::new()
            .with_input("a.csv", "x\n1\n")
            .with_input("b.csv", "y\n2\n");
        let summary = run_once(&Configuration::default(), &MemoryStateStore::default(), &tables)?;
        assert_eq!(summary.input, "a.csv");
        assert!(tables.output("b.csv").is_none());
        Ok(())
    }

    #[test]
    fn no_input_table_fails_without_state_update() {
        let tables = MemoryTableIo::new();
        let state = MemoryStateStore::default();
        let err = run_once(&Configuration::default(), &state, &tables).unwrap_err();
        assert!(err.to_string().contains("no input table"));
        assert_eq!(state.saves(), 0);
    }

    #[test]
    fn malformed_row_aborts_run() {
        let tables = MemoryTableIo::new().with_input("t.csv", "a,b\n1,2\n3\n");
        let state = MemoryStateStore::default();
        let err = run_once(&Configuration::default(), &state, &tables).unwrap_err();
        assert!(format!("{:#}", err).contains("reading row 1 of t.csv"));
        assert_eq!(state.saves(), 0);
        // rows before the failure are flushed when the writer is dropped
        assert_eq!(tables.output("t.csv").as_deref(), Some("a,b,row_number\n1,2,0\n"));
    }

    #[test]
    fn missing_mandatory_parameter_rejects_before_output() {
        let config = params(json!({"print_rows": true}));
        let state = MemoryStateStore::default();
        let tables = MemoryTableIo::new().with_input("t.csv", "a\n1\n");
        let log = LogHandle::detached(false);

        let err = RowIndexer::with_mandatory(
            &config,
            &state,
            &tables,
            &log,
            &[Mandatory::Key("api_token")],
            &[],
        )
        .err();
        assert_eq!(
            err,
            Some(ConfigError::MissingParameters(vec!["api_token".into()]))
        );
        assert!(tables.events().is_empty());
        assert_eq!(state.saves(), 0);
    }

    #[test]
    fn debug_option_raises_verbosity() -> Result<()> {
        let config = params(json!({"debug": true}));
        let (log, sub, logs) = capture::subscriber(false);
        let state = MemoryStateStore::default();
        let tables = MemoryTableIo::new().with_input("t.csv", "a\n1\n");

        tracing::subscriber::with_default(sub, || -> Result<()> {
            RowIndexer::new(&config, &state, &tables, &log)?.run()?;
            Ok(())
        })?;
        assert!(log.is_debug());
        assert!(logs.contents().contains("configuration valid"));
        Ok(())
    }

    #[test]
    fn print_rows_echoes_in_order() -> Result<()> {
        let config = params(json!({"print_rows": true}));
        let (log, sub, logs) = capture::subscriber(false);
        let state = MemoryStateStore::default();
        let tables = MemoryTableIo::new().with_input("t.csv", "id,name\n1,a\n2,b\n");

        tracing::subscriber::with_default(sub, || -> Result<()> {
            RowIndexer::new(&config, &state, &tables, &log)?.run()?;
            Ok(())
        })?;

        let out = logs.contents();
        let first = out
            .find(r#"Printing line 0: {"id": "1", "name": "a"}"#)
            .expect("first row echoed");
        let second = out
            .find(r#"Printing line 1: {"id": "2", "name": "b"}"#)
            .expect("second row echoed");
        assert!(first < second);
        assert!(out.contains("Last update: None"));
        Ok(())
    }

    #[test]
    fn rows_are_not_echoed_by_default() -> Result<()> {
        let (log, sub, logs) = capture::subscriber(false);
        let config = Configuration::default();
        let state = MemoryStateStore::default();
        let tables = MemoryTableIo::new().with_input("t.csv", "id\n1\n");

        tracing::subscriber::with_default(sub, || -> Result<()> {
            RowIndexer::new(&config, &state, &tables, &log)?.run()?;
            Ok(())
        })?;
        assert!(!logs.contents().contains("Printing line"));
        Ok(())
    }
}
