use thiserror::Error;

use crate::config::ConfigError;

/// Crate-level convenience error.
///
/// The core itself never returns errors upward once running: faults surface
/// as state transitions (see the backoff machinery). Construction-time
/// problems are the only fallible surface.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
}
