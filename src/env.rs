use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable through which the host platform passes the data directory.
pub const DATA_DIR_ENV: &str = "KBC_DATADIR";

/// Layout of the host data directory:
///
/// ```text
/// <data>/config.json
/// <data>/in/state.json
/// <data>/in/tables/*.csv (+ .manifest)
/// <data>/out/state.json
/// <data>/out/tables/
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `KBC_DATADIR` when set, otherwise the `data/` directory next to the
    /// crate root (local development only).
    pub fn resolve() -> Self {
        Self::resolve_from(std::env::var_os(DATA_DIR_ENV).map(PathBuf::from))
    }

    fn resolve_from(explicit: Option<PathBuf>) -> Self {
        match explicit.filter(|p| !p.as_os_str().is_empty()) {
            Some(root) => Self::new(root),
            None => {
                let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("data");
                debug!(root = %root.display(), "{} not set, using local data dir", DATA_DIR_ENV);
                Self::new(root)
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn tables_in(&self) -> PathBuf {
        self.root.join("in").join("tables")
    }

    pub fn tables_out(&self) -> PathBuf {
        self.root.join("out").join("tables")
    }

    pub fn state_in(&self) -> PathBuf {
        self.root.join("in").join("state.json")
    }

    pub fn state_out(&self) -> PathBuf {
        self.root.join("out").join("state.json")
    }
}
