//! Host platform resolution for prebuilt engine session binaries.

use crate::cache::ENGINE_SESSION_BINARY_PREFIX;

/// Host OS/architecture pair, normalized to the naming scheme used for
/// prebuilt engine session binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    /// Detect the current host platform.
    ///
    /// Deterministic for a given host and has no failure mode: unknown
    /// architectures pass through unnormalized, since the binary naming
    /// scheme tolerates arbitrary strings and an unsupported platform
    /// fails later with a clear fetch error instead of here.
    #[must_use]
    pub fn detect() -> Self {
        Self::from_raw(std::env::consts::OS, std::env::consts::ARCH)
    }

    fn from_raw(os: &str, arch: &str) -> Self {
        // The prebuilt binaries use Go-style OS names.
        let os = match os {
            "macos" => "darwin",
            other => other,
        };
        let arch = match arch {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        Self {
            os: os.to_ascii_lowercase(),
            arch: arch.to_ascii_lowercase(),
        }
    }

    /// Name of the engine session binary shipped inside the image, e.g.
    /// `dagger-engine-session-linux-amd64`.
    #[must_use]
    pub fn asset_name(&self) -> String {
        format!("{ENGINE_SESSION_BINARY_PREFIX}{}-{}", self.os, self.arch)
    }
}
