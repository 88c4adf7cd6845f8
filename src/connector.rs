//! Top-level provisioning pipeline and the docker-image connector.

use url::Url;

use crate::cache::BinaryCache;
use crate::config::Config;
use crate::engine::{EngineSession, SessionCommand, SessionSpawner, TokioSpawner};
use crate::error::ProvisionError;
use crate::fetch::{DockerCli, Fetcher};
use crate::image::ImageRef;
use crate::platform::Platform;

/// Run the full provisioning pipeline: resolve the host platform, parse
/// the pinned reference, ensure a cached binary, launch it and perform
/// the handshake.
///
/// Sequential by design — there is no internal parallelism, and a
/// caller wanting concurrency runs the whole pipeline as one task.
/// Generic over the fetcher and spawner seams so tests can provision
/// without docker.
///
/// # Errors
///
/// Any [`ProvisionError`] from the stages above.
pub async fn provision(
    cfg: &Config,
    cache: &BinaryCache,
    fetcher: &impl Fetcher,
    spawner: &impl SessionSpawner,
) -> Result<EngineSession, ProvisionError> {
    let platform = Platform::detect();
    let image = ImageRef::parse(&cfg.image_ref()?)?;
    let bin = cache.ensure(&platform, &image, fetcher).await?;
    let cmd = SessionCommand::new(&bin, &image, cfg)?;
    EngineSession::start(&cmd, spawner).await
}

/// Provisions a Dagger engine session from a `docker-image://` host URL
/// and exposes its live endpoint.
pub struct DockerConnector {
    pub cfg: Config,
    session: Option<EngineSession>,
}

impl DockerConnector {
    #[must_use]
    pub fn new(cfg: Config) -> Self {
        Self { cfg, session: None }
    }

    /// Provision (or reuse) the engine session and return its endpoint.
    ///
    /// The endpoint is also written back into `cfg.host`, where the
    /// HTTP query transport picks it up. The whole pipeline runs under
    /// `cfg.provision_timeout`.
    ///
    /// # Errors
    ///
    /// Any [`ProvisionError`]; [`ProvisionError::Timeout`] when the
    /// deadline expires (in-flight children are killed on drop).
    pub async fn connect(&mut self) -> Result<Url, ProvisionError> {
        self.connect_with(&DockerCli::new(), &TokioSpawner).await
    }

    /// [`connect`](Self::connect) with explicit fetcher and spawner
    /// implementations.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn connect_with(
        &mut self,
        fetcher: &impl Fetcher,
        spawner: &impl SessionSpawner,
    ) -> Result<Url, ProvisionError> {
        if self.session.is_none() {
            let cache = match &self.cfg.cache_dir {
                Some(root) => BinaryCache::with_root(root.clone()),
                None => BinaryCache::new()?,
            };
            let deadline = self.cfg.provision_timeout;
            let session = tokio::time::timeout(
                deadline,
                provision(&self.cfg, &cache, fetcher, spawner),
            )
            .await
            .map_err(|_| ProvisionError::Timeout(deadline))??;

            self.cfg.host = Url::parse(session.endpoint())
                .map_err(|e| ProvisionError::EngineStartup(format!("invalid endpoint: {e}")))?;
            tracing::info!(endpoint = %self.cfg.host, "engine session provisioned");
            self.session = Some(session);
        }
        Ok(self.cfg.host.clone())
    }

    /// GraphQL query endpoint served by the live session.
    #[must_use]
    pub fn query_url(&self) -> String {
        format!("{}/query", self.cfg.host.as_str().trim_end_matches('/'))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(EngineSession::is_running)
    }

    /// Stop the engine session, if one is running. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop().await;
        }
    }
}
