// src/tables.rs

use anyhow::{Context, Result};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

const MANIFEST_SUFFIX: &str = ".manifest";

/// Optional `<table>.manifest` delivered alongside an input table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InputManifest {
    #[serde(default)]
    pub id: Option<String>,
}

/// An input table found in the host's input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub file_name: String,
    pub full_path: PathBuf,
    pub manifest: Option<InputManifest>,
}

/// Metadata the host reads to persist an output table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableManifest {
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
    pub incremental: bool,
}

/// Input discovery, manifest declaration and raw table streams.
pub trait TableIo {
    /// Input tables in a stable order.
    fn input_tables(&self) -> Result<Vec<TableDefinition>>;

    fn open_input(&self, table: &TableDefinition) -> Result<Box<dyn Read>>;

    /// Location of the output table called `file_name`.
    fn output_path(&self, file_name: &str) -> PathBuf;

    fn write_manifest(&self, table: &Path, manifest: &TableManifest) -> Result<()>;

    fn create_output(&self, table: &Path) -> Result<Box<dyn Write>>;
}

fn manifest_path(table: &Path) -> PathBuf {
    let mut p = table.as_os_str().to_owned();
    p.push(MANIFEST_SUFFIX);
    PathBuf::from(p)
}

/// Tables under the host's `in/tables` and `out/tables` directories.
pub struct FileTableIo {
    tables_in: PathBuf,
    tables_out: PathBuf,
}

impl FileTableIo {
    pub fn new(tables_in: impl Into<PathBuf>, tables_out: impl Into<PathBuf>) -> Self {
        Self {
            tables_in: tables_in.into(),
            tables_out: tables_out.into(),
        }
    }
}

fn read_input_manifest(path: &Path) -> Option<InputManifest> {
    let manifest = manifest_path(path);
    if !manifest.is_file() {
        return None;
    }
    match File::open(&manifest).map_err(anyhow::Error::from).and_then(|f| {
        serde_json::from_reader(BufReader::new(f)).map_err(anyhow::Error::from)
    }) {
        Ok(m) => Some(m),
        Err(e) => {
            warn!("Skipping unreadable manifest {:?}: {}", manifest, e);
            None
        }
    }
}

impl TableIo for FileTableIo {
    fn input_tables(&self) -> Result<Vec<TableDefinition>> {
        let pattern = format!("{}/*", self.tables_in.display());
        let mut tables = Vec::new();
        for entry in glob(&pattern).context("invalid glob pattern for input tables")? {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!("cannot read input entry: {:?}", e);
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            let file_name = match path.file_name().and_then(|f| f.to_str()) {
                Some(n) if !n.ends_with(MANIFEST_SUFFIX) => n.to_string(),
                _ => continue,
            };
            let manifest = read_input_manifest(&path);
            tables.push(TableDefinition {
                file_name,
                full_path: path,
                manifest,
            });
        }
        tables.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        debug!("found {} input tables in {}", tables.len(), self.tables_in.display());
        Ok(tables)
    }

    fn open_input(&self, table: &TableDefinition) -> Result<Box<dyn Read>> {
        let file = File::open(&table.full_path)
            .with_context(|| format!("opening input table {}", table.full_path.display()))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn output_path(&self, file_name: &str) -> PathBuf {
        self.tables_out.join(file_name)
    }

    fn write_manifest(&self, table: &Path, manifest: &TableManifest) -> Result<()> {
        let path = manifest_path(table);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating output directory {}", parent.display()))?;
        }
        let file = File::create(&path)
            .with_context(|| format!("creating manifest {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, manifest).context("serializing manifest")?;
        writer
            .flush()
            .with_context(|| format!("writing manifest {}", path.display()))?;
        Ok(())
    }

    fn create_output(&self, table: &Path) -> Result<Box<dyn Write>> {
        if let Some(parent) = table.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating output directory {}", parent.display()))?;
        }
        let file = File::create(table)
            .with_context(|| format!("creating output table {}", table.display()))?;
        Ok(Box::new(file))
    }
}

/// Streaming CSV writer for one output table. The header is written on
/// construction. `finish` flushes and reports errors; dropping the writer on
/// any other path still flushes buffered rows (errors ignored).
pub struct TableWriter {
    inner: csv::Writer<Box<dyn Write>>,
    rows: u64,
}

impl TableWriter {
    pub fn new(sink: Box<dyn Write>, columns: &[String]) -> Result<Self> {
        let mut inner = csv::Writer::from_writer(sink);
        inner.write_record(columns).context("writing header row")?;
        Ok(Self { inner, rows: 0 })
    }

    pub fn write_row<I, T>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.inner
            .write_record(values)
            .with_context(|| format!("writing row {}", self.rows))?;
        self.rows += 1;
        Ok(())
    }

    /// Flush everything and return the number of data rows written.
    pub fn finish(mut self) -> Result<u64> {
        self.inner.flush().context("flushing output table")?;
        Ok(self.rows)
    }
}
