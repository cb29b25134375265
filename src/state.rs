// src/state.rs

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::PathBuf,
};
use tracing::debug;

pub const KEY_LAST_UPDATE: &str = "last_update";

/// Small key/value record that survives across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistedState(Map<String, Value>);

impl PersistedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Unix timestamp of the last completed run, if one was recorded.
    pub fn last_update(&self) -> Option<f64> {
        self.get(KEY_LAST_UPDATE).and_then(Value::as_f64)
    }

    /// Store `at` as fractional Unix seconds, microsecond precision.
    pub fn set_last_update(&mut self, at: DateTime<Utc>) -> f64 {
        let ts = at.timestamp_micros() as f64 / 1_000_000.0;
        self.insert(KEY_LAST_UPDATE, Value::from(ts));
        ts
    }
}

impl From<Map<String, Value>> for PersistedState {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Load-once / save-once persistence for [`PersistedState`].
pub trait StateStore {
    fn load(&self) -> Result<PersistedState>;

    /// Replace the stored state wholesale.
    fn save(&self, state: &PersistedState) -> Result<()>;
}

/// Host-platform state files: read from `in/state.json`, written to `out/state.json`.
pub struct FileStateStore {
    input: PathBuf,
    output: PathBuf,
}

impl FileStateStore {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<PersistedState> {
        if !self.input.is_file() {
            debug!(path = %self.input.display(), "no state file, starting empty");
            return Ok(PersistedState::new());
        }
        let file = File::open(&self.input)
            .with_context(|| format!("opening state file {}", self.input.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing state file {}", self.input.display()))
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.output.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }

        // write "<state>.json.tmp", then rename over the final path
        let mut tmp_path = self.output.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let file = File::create(&tmp_path)
            .with_context(|| format!("creating temporary state file {}", tmp_path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, state).context("serializing state")?;
        writer.flush().context("flushing state file")?;
        drop(writer);

        fs::rename(&tmp_path, &self.output).with_context(|| {
            format!(
                "failed to rename `{}` to `{}`",
                tmp_path.display(),
                self.output.display()
            )
        })?;
        debug!(path = %self.output.display(), "state saved");
        Ok(())
    }
}
