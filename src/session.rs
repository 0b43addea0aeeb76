//! Tracks metadata for a transclusion run.

use crate::log;

/// Metadata for one processing run.
///
/// There is no context yet when a caller first enters the library, so this
/// struct provides it.  Debug logging is enabled by setting the `DBXI_LOG`
/// environment variable; the flag is sampled once per session.
#[derive(Clone)]
pub struct Session {
    log_enabled: bool,
}

impl Session {
    pub fn new() -> Self {
        Self {
            log_enabled: log::log_enabled(),
        }
    }

    pub fn log_enabled(&self) -> bool {
        self.log_enabled
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
