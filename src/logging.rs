// src/logging.rs

use anyhow::{Context, Result};
use std::cell::Cell;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// `RUST_LOG` when set, otherwise `info` / `debug`.
fn build_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }))
}

fn reloadable(debug: bool) -> (reload::Layer<EnvFilter, Registry>, FilterHandle) {
    reload::Layer::new(build_filter(debug))
}

/// Controls the verbosity of the run's log output. Handed to the component
/// instead of having it touch the global subscriber.
pub struct LogHandle {
    reload: Option<FilterHandle>,
    debug: Cell<bool>,
}

impl LogHandle {
    /// Install the process-wide subscriber and return its handle.
    pub fn init(debug: bool) -> Result<Self> {
        let (filter, handle) = reloadable(debug);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
            .context("installing tracing subscriber")?;
        Ok(Self {
            reload: Some(handle),
            debug: Cell::new(debug),
        })
    }

    /// A handle that only tracks the requested level.
    pub fn detached(debug: bool) -> Self {
        Self {
            reload: None,
            debug: Cell::new(debug),
        }
    }

    pub fn is_debug(&self) -> bool {
        self.debug.get()
    }

    /// Raise verbosity to debug. No-op if already there.
    pub fn enable_debug(&self) -> Result<()> {
        if self.debug.get() {
            return Ok(());
        }
        if let Some(handle) = &self.reload {
            handle
                .reload(build_filter(true))
                .context("switching log filter to debug")?;
        }
        self.debug.set(true);
        Ok(())
    }
}
