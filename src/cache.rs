//! Engine session binary cache — presence check, atomic install, pruning.

use std::path::{Path, PathBuf};

use crate::error::ProvisionError;
use crate::fetch::Fetcher;
use crate::image::ImageRef;
use crate::platform::Platform;

/// Filename prefix shared by cache entries and the binaries inside the
/// engine image.
pub const ENGINE_SESSION_BINARY_PREFIX: &str = "dagger-engine-session-";

/// Prefix for in-flight downloads. Deliberately outside the
/// `ENGINE_SESSION_BINARY_PREFIX` namespace so pruning never touches a
/// concurrent fetch.
const TEMP_PREFIX: &str = "temp-dagger-engine-session-";

/// On-disk cache of engine session binaries, keyed by content id.
///
/// The root is an explicit value rather than an ambient environment
/// lookup, so tests inject an isolated temporary directory. Multiple
/// processes may share the real root without a cross-process lock:
/// temp files are uniquely named, installs are atomic renames, and
/// pruning is best-effort, so concurrent provisioners converge on one
/// file per content id.
pub struct BinaryCache {
    root: PathBuf,
}

impl BinaryCache {
    /// Cache under the per-user cache directory (`<XDG cache>/dagger`).
    ///
    /// # Errors
    ///
    /// Returns an error if the user cache directory cannot be determined.
    pub fn new() -> Result<Self, ProvisionError> {
        let base = dirs::cache_dir().ok_or_else(|| {
            ProvisionError::io(
                "determining user cache directory",
                std::io::Error::new(std::io::ErrorKind::NotFound, "no home directory"),
            )
        })?;
        Ok(Self::with_root(base.join("dagger")))
    }

    /// Cache rooted at an explicit directory.
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path the binary for `image` occupies once installed.
    #[must_use]
    pub fn entry_path(&self, image: &ImageRef) -> PathBuf {
        let mut name = format!("{ENGINE_SESSION_BINARY_PREFIX}{}", image.content_id());
        if cfg!(windows) {
            name.push_str(".exe");
        }
        self.root.join(name)
    }

    /// Return a runnable binary for `image`, fetching it on a miss.
    ///
    /// A hit is returned as-is — no freshness or integrity check. On a
    /// miss the fetcher writes into a uniquely named temp file in the
    /// cache root (same filesystem, so the final rename is atomic),
    /// which is made owner-executable and renamed into place; entries
    /// for other content ids are then pruned.
    ///
    /// # Errors
    ///
    /// Propagates fetcher failures and filesystem errors. The temp file
    /// is removed on every failure path.
    pub async fn ensure(
        &self,
        platform: &Platform,
        image: &ImageRef,
        fetcher: &impl Fetcher,
    ) -> Result<PathBuf, ProvisionError> {
        self.create_root()?;

        let bin = self.entry_path(image);
        if bin.exists() {
            tracing::debug!(path = %bin.display(), "engine session binary already cached");
            return Ok(bin);
        }

        // Unique name per attempt; deleted on drop unless persisted, so
        // an error anywhere below cannot leak a partial download.
        let tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.root)
            .map_err(|e| ProvisionError::io("creating temp file in cache", e))?;

        fetcher.fetch(platform, image, tmp.as_file()).await?;
        set_executable(tmp.path())?;

        match tmp.persist(&bin) {
            Ok(_) => {
                tracing::debug!(path = %bin.display(), "installed engine session binary");
            }
            // A concurrent provisioner renamed its own copy into place
            // first; its file is equivalent.
            Err(e) if bin.exists() => {
                tracing::debug!(error = %e.error, "lost install race, using existing entry");
            }
            Err(e) => {
                return Err(ProvisionError::io(
                    format!("installing {}", bin.display()),
                    e.error,
                ));
            }
        }

        self.prune_stale(&bin);
        Ok(bin)
    }

    fn create_root(&self) -> Result<(), ProvisionError> {
        let result;
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            result = std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(&self.root);
        }
        #[cfg(not(unix))]
        {
            result = std::fs::create_dir_all(&self.root);
        }
        result.map_err(|e| {
            ProvisionError::io(format!("creating cache dir {}", self.root.display()), e)
        })
    }

    /// Delete every cache entry other than `keep`. Best-effort: another
    /// process may be racing us, and a failed deletion must not abort
    /// the provisioning that just succeeded.
    fn prune_stale(&self, keep: &Path) {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "skipping cache pruning");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(ENGINE_SESSION_BINARY_PREFIX) || path == keep {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "pruned stale engine session binary"),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to prune stale engine session binary");
                }
            }
        }
    }
}

fn set_executable(path: &Path) -> Result<(), ProvisionError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).map_err(|e| {
            ProvisionError::io(format!("setting permissions on {}", path.display()), e)
        })
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}
