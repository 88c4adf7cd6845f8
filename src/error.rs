//! Typed provisioning errors.
//!
//! Everything that can go wrong between "pinned image reference" and
//! "live endpoint" surfaces as one [`ProvisionError`]. None of the
//! variants are retriable at this layer — the only internal retries are
//! the bounded busy-file launch loop and best-effort cache pruning.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Umbrella error for the provisioning pipeline.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The image reference is not pinned by a usable sha256 digest.
    #[error("image ref '{0}' must contain a sha256 digest")]
    InvalidReference(String),

    /// The container runtime CLI is missing — an install/PATH issue, not
    /// a transient failure.
    #[error("command '{0}' not found. Is it installed and on your PATH?")]
    RuntimeNotAvailable(String),

    /// The container runtime ran but could not produce the binary; the
    /// message carries its captured stderr.
    #[error("failed to copy engine session binary: {0}")]
    Fetch(String),

    /// The engine session binary could not be started.
    #[error("failed to start engine session: {0}")]
    Launch(String),

    /// The engine session started but never announced a usable port; the
    /// message carries the child's diagnostics when available.
    #[error("engine failed to start: {0}")]
    EngineStartup(String),

    /// Provisioning exceeded the configured deadline.
    #[error("provisioning timed out after {0:?}")]
    Timeout(Duration),

    /// Filesystem or pipe failure, with the operation that hit it.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl ProvisionError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
