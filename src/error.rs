use thiserror::Error;

/// Startup validation failure. Terminal for the binary: it is logged and the
/// process exits with status 1.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing mandatory config parameters: {}", .0.join(", "))]
    MissingParameters(Vec<String>),

    #[error("Missing mandatory image parameters: {}", .0.join(", "))]
    MissingImageParameters(Vec<String>),

    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),
}
