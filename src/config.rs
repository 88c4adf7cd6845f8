//! Connector configuration.
//!
//! Consumed as-is: loading and validation happen upstream, this crate
//! only reads the fields it needs and writes the resolved endpoint back
//! into `host` after a successful provisioning run.

use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::ProvisionError;

/// Default deadline for one provisioning run (fetch + launch + handshake).
pub const DEFAULT_PROVISION_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings consumed by the provisioner.
#[derive(Debug)]
pub struct Config {
    /// Initially a `docker-image://` URL carrying the pinned reference;
    /// rewritten to the resolved `http://localhost:<port>` endpoint by
    /// [`DockerConnector::connect`](crate::connector::DockerConnector::connect).
    pub host: Url,
    /// Engine workdir, passed as `--workdir` (absolute-resolved).
    pub workdir: Option<PathBuf>,
    /// Project config path, passed as `--project` (absolute-resolved).
    pub config_path: Option<PathBuf>,
    /// Sink for the child's stderr. When `None`, stderr is piped and
    /// read back for startup diagnostics.
    pub log_output: Option<File>,
    /// Explicit cache root override, so tests (and embedders) can use an
    /// isolated directory instead of `<user cache dir>/dagger`.
    pub cache_dir: Option<PathBuf>,
    /// Deadline for the whole provisioning pipeline.
    pub provision_timeout: Duration,
}

impl Config {
    #[must_use]
    pub fn new(host: Url) -> Self {
        Self {
            host,
            workdir: None,
            config_path: None,
            log_output: None,
            cache_dir: None,
            provision_timeout: DEFAULT_PROVISION_TIMEOUT,
        }
    }

    /// Image reference carried by the `docker-image://` host URL: the
    /// URL's host concatenated with its path, the inverse of how the
    /// reference was packed into a URL by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidReference`] if the URL has no
    /// host component.
    pub fn image_ref(&self) -> Result<String, ProvisionError> {
        let host = self
            .host
            .host_str()
            .ok_or_else(|| ProvisionError::InvalidReference(self.host.to_string()))?;
        Ok(format!("{host}{}", self.host.path()))
    }
}
