//! Proxy configuration.

use std::path::{Path, PathBuf};

use crate::traits::OpenFlags;

/// Default underlying capture node.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/video0";

/// Configuration fixed when a [`crate::ProxyDevice`] is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Path of the underlying device.
    pub device_path: PathBuf,
    /// Flags the underlying device is opened with.
    pub flags: OpenFlags,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_PATH)
    }
}

impl ProxyConfig {
    /// Configuration for the device at `path`, opened read/write non-blocking.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            device_path: path.into(),
            flags: OpenFlags::CAPTURE,
        }
    }

    /// Override the open flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Path of the underlying device.
    pub fn device_path(&self) -> &Path {
        &self.device_path
    }
}
