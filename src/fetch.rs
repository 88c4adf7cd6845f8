//! Extracting the engine session binary out of a container image.

use std::fs::File;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;

use crate::error::ProvisionError;
use crate::image::ImageRef;
use crate::platform::Platform;

/// Deadline for one `docker run` binary copy.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Copies one file out of a container image into a local file.
///
/// A trait so the cache can be tested without a container runtime; the
/// production implementation is [`DockerCli`].
#[allow(async_fn_in_trait)]
pub trait Fetcher {
    /// Write the platform's engine session binary from `image` into `dest`.
    ///
    /// `dest` may hold partial bytes after a failure — cleanup is the
    /// caller's job (the cache hands in a delete-on-drop temp file).
    ///
    /// # Errors
    ///
    /// [`ProvisionError::RuntimeNotAvailable`] when the runtime command
    /// is missing, [`ProvisionError::Fetch`] when it exits non-zero.
    async fn fetch(
        &self,
        platform: &Platform,
        image: &ImageRef,
        dest: &File,
    ) -> Result<(), ProvisionError>;
}

/// Production fetcher — shells out to the container runtime CLI and
/// streams the binary out of the image with a cat entrypoint.
pub struct DockerCli {
    command: String,
    timeout: Duration,
}

impl DockerCli {
    #[must_use]
    pub fn new() -> Self {
        Self::with_command("docker")
    }

    /// Use a different runtime CLI (e.g. `podman`, or a stub in tests).
    #[must_use]
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for DockerCli {
    async fn fetch(
        &self,
        platform: &Platform,
        image: &ImageRef,
        dest: &File,
    ) -> Result<(), ProvisionError> {
        let in_image_path = format!("/usr/bin/{}", platform.asset_name());
        let stdout = dest
            .try_clone()
            .map_err(|e| ProvisionError::io("cloning destination file handle", e))?;

        tracing::debug!(
            image = image.reference(),
            path = %in_image_path,
            "copying engine session binary out of image"
        );

        let mut child = tokio::process::Command::new(&self.command)
            .args([
                "run",
                "--rm",
                "--entrypoint",
                "/bin/cat",
                image.reference(),
                &in_image_path,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ProvisionError::RuntimeNotAvailable(self.command.clone())
                }
                _ => ProvisionError::io(format!("spawning {}", self.command), e),
            })?;

        let mut stderr_handle = child.stderr.take();

        // Drain stderr CONCURRENTLY with wait() to avoid pipe deadlock:
        // if the runtime writes more diagnostics than the OS pipe buffer
        // holds, it blocks on write and wait() never resolves.
        let (status, stderr) = tokio::select! {
            result = async {
                let (status, stderr) = tokio::join!(child.wait(), async {
                    let mut buf = Vec::new();
                    if let Some(ref mut h) = stderr_handle {
                        let _ = h.read_to_end(&mut buf).await;
                    }
                    buf
                });
                (status, stderr)
            } => result,
            () = tokio::time::sleep(self.timeout) => {
                let _ = child.kill().await;
                return Err(ProvisionError::Fetch(format!(
                    "{} run timed out after {}s",
                    self.command,
                    self.timeout.as_secs()
                )));
            }
        };

        let status =
            status.map_err(|e| ProvisionError::io(format!("waiting for {}", self.command), e))?;
        if !status.success() {
            return Err(ProvisionError::Fetch(
                String::from_utf8_lossy(&stderr).trim().to_owned(),
            ));
        }
        Ok(())
    }
}
