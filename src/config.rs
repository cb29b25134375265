// src/config.rs

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{fs::File, io::BufReader, path::Path};

use crate::error::ConfigError;

/// Echo every row before it is written.
pub const KEY_PRINT_ROWS: &str = "print_rows";
/// Raise log verbosity to debug.
pub const KEY_DEBUG: &str = "debug";

/// The only action this connector performs.
pub const ACTION_RUN: &str = "run";

/// Parameters that must be present in `parameters`. Empty for this connector.
pub const MANDATORY_PARS: &[Mandatory] = &[];
/// Parameters that must be present in `image_parameters`. Empty for this connector.
pub const MANDATORY_IMAGE_PARS: &[Mandatory] = &[];

/// One entry of a mandatory-parameter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mandatory {
    /// The key must be present.
    Key(&'static str),
    /// At least one of the keys must be present.
    AnyOf(&'static [&'static str]),
}

impl Mandatory {
    fn is_satisfied(&self, params: &Map<String, Value>) -> bool {
        match self {
            Mandatory::Key(key) => params.contains_key(*key),
            Mandatory::AnyOf(keys) => keys.iter().any(|k| params.contains_key(*k)),
        }
    }

    fn describe(&self) -> String {
        match self {
            Mandatory::Key(key) => key.to_string(),
            Mandatory::AnyOf(keys) => format!("one of [{}]", keys.join(", ")),
        }
    }
}

/// Read access to the validated key/value configuration.
pub trait ConfigProvider {
    fn parameters(&self) -> &Map<String, Value>;

    fn image_parameters(&self) -> &Map<String, Value>;

    /// Requested host action.
    fn action(&self) -> &str {
        ACTION_RUN
    }

    fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters().get(key)
    }

    /// `true` when `key` is present and truthy.
    fn flag(&self, key: &str) -> bool {
        self.parameter(key).is_some_and(is_truthy)
    }

    fn print_rows(&self) -> bool {
        self.flag(KEY_PRINT_ROWS)
    }

    fn debug(&self) -> bool {
        self.flag(KEY_DEBUG)
    }
}

/// Contents of `config.json` as delivered by the host platform.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub image_parameters: Map<String, Value>,
    #[serde(default = "default_action")]
    pub action: String,
}

fn default_action() -> String {
    ACTION_RUN.to_string()
}

impl Default for Configuration {
    fn default() -> Self {
        Self::with_parameters(Map::new())
    }
}

impl Configuration {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("opening configuration file {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing configuration file {}", path.display()))
    }

    /// Build a configuration holding only `parameters`.
    pub fn with_parameters(parameters: Map<String, Value>) -> Self {
        Self {
            parameters,
            image_parameters: Map::new(),
            action: default_action(),
        }
    }
}

impl ConfigProvider for Configuration {
    fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    fn image_parameters(&self) -> &Map<String, Value> {
        &self.image_parameters
    }

    fn action(&self) -> &str {
        &self.action
    }
}

/// Check the requested action and both mandatory lists against `config`.
pub fn validate(
    config: &dyn ConfigProvider,
    mandatory: &[Mandatory],
    mandatory_image: &[Mandatory],
) -> Result<(), ConfigError> {
    if config.action() != ACTION_RUN {
        return Err(ConfigError::UnsupportedAction(config.action().to_string()));
    }
    let missing = missing_keys(config.parameters(), mandatory);
    if !missing.is_empty() {
        return Err(ConfigError::MissingParameters(missing));
    }
    let missing = missing_keys(config.image_parameters(), mandatory_image);
    if !missing.is_empty() {
        return Err(ConfigError::MissingImageParameters(missing));
    }
    Ok(())
}

fn missing_keys(params: &Map<String, Value>, mandatory: &[Mandatory]) -> Vec<String> {
    mandatory
        .iter()
        .filter(|m| !m.is_satisfied(params))
        .map(Mandatory::describe)
        .collect()
}

/// JSON truthiness: `false`, `0`, `""`, `null` and empty containers are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
