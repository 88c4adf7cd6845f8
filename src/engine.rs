//! Engine session subprocess supervision — launch, handshake, shutdown.
//!
//! The session binary is a black box beyond its startup protocol: it
//! prints a single decimal port number on stdout, then serves a network
//! endpoint on `localhost:<port>`. Startup diagnostics go to stderr.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout};

use crate::config::Config;
use crate::error::ProvisionError;
use crate::image::ImageRef;

/// Launch attempts before giving up on a busy binary.
const LAUNCH_ATTEMPTS: u32 = 10;

/// Pause between launch attempts when the binary is reported busy.
const LAUNCH_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How long to wait for a child that failed its handshake to exit
/// before concluding it is still running.
const EXIT_PROBE: Duration = Duration::from_millis(200);

/// A fully resolved launch command for the engine session binary.
/// Built fresh per provisioning run; not persisted.
pub struct SessionCommand {
    bin: PathBuf,
    args: Vec<OsString>,
    stderr_sink: Option<std::fs::File>,
}

impl SessionCommand {
    /// Build the launch arguments: `--remote docker-image://<ref>` plus
    /// optional `--workdir`/`--project` flags, both absolute-resolved.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured path cannot be resolved to an
    /// absolute path, or the log sink handle cannot be duplicated.
    pub fn new(bin: &Path, image: &ImageRef, cfg: &Config) -> Result<Self, ProvisionError> {
        let mut args: Vec<OsString> = vec![
            "--remote".into(),
            format!("docker-image://{}", image.reference()).into(),
        ];
        if let Some(workdir) = &cfg.workdir {
            args.push("--workdir".into());
            args.push(absolute(workdir)?.into());
        }
        if let Some(config_path) = &cfg.config_path {
            args.push("--project".into());
            args.push(absolute(config_path)?.into());
        }
        let stderr_sink = match &cfg.log_output {
            Some(sink) => Some(
                sink.try_clone()
                    .map_err(|e| ProvisionError::io("cloning log output handle", e))?,
            ),
            None => None,
        };
        Ok(Self {
            bin: bin.to_path_buf(),
            args,
            stderr_sink,
        })
    }

    #[must_use]
    pub fn bin(&self) -> &Path {
        &self.bin
    }

    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ProvisionError> {
    std::path::absolute(path)
        .map_err(|e| ProvisionError::io(format!("resolving {}", path.display()), e))
}

/// Spawns the engine session binary.
///
/// Returns the raw `io::Result` so the retry loop can classify OS-level
/// launch errors; tests inject failures without a real binary.
pub trait SessionSpawner {
    /// # Errors
    ///
    /// Any OS-level spawn failure, unclassified.
    fn spawn(&self, cmd: &SessionCommand) -> io::Result<Child>;
}

/// Production spawner.
///
/// Stdout is always piped (the handshake is read from it). Stderr goes
/// to the configured log sink when one is present, otherwise it is
/// piped so startup diagnostics can be read back. `kill_on_drop`
/// guarantees the child is released even when the handle is dropped
/// mid-provisioning.
pub struct TokioSpawner;

impl SessionSpawner for TokioSpawner {
    fn spawn(&self, cmd: &SessionCommand) -> io::Result<Child> {
        let stderr = match &cmd.stderr_sink {
            Some(sink) => Stdio::from(sink.try_clone()?),
            None => Stdio::piped(),
        };
        tokio::process::Command::new(&cmd.bin)
            .args(&cmd.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
    }
}

/// `true` when `err` is the transient "text file busy" condition: the
/// binary is being exec'd while another fork of this process still
/// holds it open for writing, a known race right after the cache
/// rename. Non-POSIX targets never classify an error as transient and
/// fail immediately instead of retrying.
fn is_text_file_busy(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ETXTBSY)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

async fn launch_with_retry(
    spawner: &impl SessionSpawner,
    cmd: &SessionCommand,
) -> Result<Child, ProvisionError> {
    for attempt in 1..=LAUNCH_ATTEMPTS {
        match spawner.spawn(cmd) {
            Ok(child) => return Ok(child),
            Err(err) if is_text_file_busy(&err) => {
                tracing::debug!(attempt, "engine session binary busy, retrying");
                tokio::time::sleep(LAUNCH_RETRY_DELAY).await;
            }
            Err(err) => return Err(ProvisionError::Launch(err.to_string())),
        }
    }
    Err(ProvisionError::Launch("failed after retries".to_owned()))
}

async fn handshake(stdout: &mut BufReader<ChildStdout>) -> Result<u16, String> {
    let mut line = String::new();
    if let Err(e) = stdout.read_line(&mut line).await {
        return Err(format!("reading port announcement: {e}"));
    }
    let line = line.trim();
    line.parse::<u16>()
        .map_err(|e| format!("invalid port announcement {line:?}: {e}"))
}

/// Decide what to report when the handshake failed: if the child has
/// already exited, its stderr (when piped and non-empty) is the real
/// diagnosis, and a silent exit usually means the container runtime is
/// down; a child that is still running keeps the original handshake
/// failure as the reason.
async fn startup_failure(child: &mut Child, reason: String) -> ProvisionError {
    let exited = tokio::time::timeout(EXIT_PROBE, child.wait()).await.is_ok();
    if !exited {
        // Still running but speaking garbage; kill_on_drop reaps it.
        return ProvisionError::EngineStartup(reason);
    }
    if let Some(stderr) = child.stderr.take() {
        let mut diag = String::new();
        let _ = BufReader::new(stderr).read_line(&mut diag).await;
        let diag = diag.trim();
        if !diag.is_empty() {
            return ProvisionError::EngineStartup(diag.to_owned());
        }
    }
    ProvisionError::EngineStartup("no port announced, is the docker daemon running?".to_owned())
}

/// A live engine session subprocess and its announced endpoint.
///
/// Owns the child exclusively. [`stop`](Self::stop) is idempotent, and
/// dropping the session kills the child via `kill_on_drop`, so
/// block-scoped users never leak the subprocess even when an error
/// unwinds through them.
#[derive(Debug)]
pub struct EngineSession {
    child: Option<Child>,
    // Keeps the child's stdout pipe open for the session's lifetime;
    // the engine may write to it after the handshake.
    stdout: Option<BufReader<ChildStdout>>,
    port: u16,
    endpoint: String,
}

impl EngineSession {
    /// Launch the binary and perform the startup handshake.
    ///
    /// Retries the launch up to 10 times when the OS reports the binary
    /// as busy (see [`SessionSpawner`]); any other spawn failure is
    /// immediately fatal.
    ///
    /// # Errors
    ///
    /// [`ProvisionError::Launch`] when the subprocess cannot be started,
    /// [`ProvisionError::EngineStartup`] when it starts but fails the
    /// handshake.
    pub async fn start(
        cmd: &SessionCommand,
        spawner: &impl SessionSpawner,
    ) -> Result<Self, ProvisionError> {
        let mut child = launch_with_retry(spawner, cmd).await?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProvisionError::Launch("child stdout not captured".to_owned()))?;
        let mut stdout = BufReader::new(stdout);

        let port = match handshake(&mut stdout).await {
            Ok(port) => port,
            Err(reason) => return Err(startup_failure(&mut child, reason).await),
        };

        tracing::info!(port, "engine session started");
        Ok(Self {
            child: Some(child),
            stdout: Some(stdout),
            port,
            endpoint: format!("http://localhost:{port}"),
        })
    }

    /// The announced local endpoint, e.g. `http://localhost:54321`.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Terminate the subprocess and release its streams.
    ///
    /// Idempotent: stopping a session that is not running is a no-op.
    pub async fn stop(&mut self) {
        self.stdout.take();
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "engine session already exited");
            }
            let _ = child.wait().await;
            tracing::debug!("engine session stopped");
        }
    }
}
