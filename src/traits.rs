//! Core traits and types for the backend capability set.
//!
//! A backend opens a capture resource by path and hands back a
//! [`CaptureHandle`]. Optional capabilities (memory-map, control commands)
//! are exposed through [`SupportsMemoryMap`] and [`SupportsControl`] so the
//! proxy can check for them before forwarding.

use std::io;
use std::path::{Path, PathBuf};

/// Flags used when opening the underlying device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Open for writing as well as reading.
    pub write: bool,
    /// Reads return `WouldBlock` instead of waiting for data.
    pub non_blocking: bool,
}

impl OpenFlags {
    /// Read/write, non-blocking: the mode capture nodes are bound with.
    pub const CAPTURE: Self = Self {
        write: true,
        non_blocking: true,
    };

    /// Read-only, blocking.
    pub const READ_ONLY: Self = Self {
        write: false,
        non_blocking: false,
    };
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self::CAPTURE
    }
}

/// A request to map backend buffer memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapRequest {
    /// Offset into the device memory, as reported by the device.
    pub offset: u64,
    /// Length of the mapping in bytes.
    pub length: usize,
    /// Map read/write instead of read-only.
    pub writable: bool,
}

impl MapRequest {
    /// Create a read-only map request.
    #[must_use]
    pub const fn new(offset: u64, length: usize) -> Self {
        Self {
            offset,
            length,
            writable: false,
        }
    }

    /// Request a writable mapping.
    #[must_use]
    pub const fn writable(mut self) -> Self {
        self.writable = true;
        self
    }
}

/// Device capability flags reported by a bound handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming (mmap) I/O.
    pub can_stream: bool,
    /// Whether the device supports `read()` I/O.
    pub can_read_write: bool,
}

/// Opens capture resources by path.
pub trait DeviceBackend: Send + Sync {
    /// The live connection returned by [`DeviceBackend::open`].
    type Handle: CaptureHandle;

    /// Open the resource at `path`.
    fn open(&self, path: &Path, flags: OpenFlags) -> io::Result<Self::Handle>;
}

/// A live connection to an underlying capture resource.
pub trait CaptureHandle: Send + Sync {
    /// Mapping type produced by the memory-map capability.
    type Mapping;

    /// Read into `buf` from the current stream position.
    ///
    /// Returns the number of bytes read, which may be less than `buf.len()`.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// The memory-map capability, if the resource has one.
    fn as_memory_map(&self) -> Option<&dyn SupportsMemoryMap<Mapping = Self::Mapping>>;

    /// The control-command capability, if the resource has one.
    fn as_control(&self) -> Option<&dyn SupportsControl>;

    /// Capabilities reported by the resource, when it can be queried.
    fn capabilities(&self) -> Option<&DeviceCapabilities> {
        None
    }

    /// Close the connection.
    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}

/// Memory-map capability.
pub trait SupportsMemoryMap {
    /// The mapping handed back to the caller.
    type Mapping;

    /// Map the region described by `request`.
    fn map(&self, request: &MapRequest) -> io::Result<Self::Mapping>;
}

/// Control-command capability.
pub trait SupportsControl {
    /// Issue control command `code` with the in/out payload `arg`.
    ///
    /// Returns the backend's non-negative result value.
    fn control(&self, code: u32, arg: &mut [u8]) -> io::Result<i32>;
}

/// Error type for proxy operations.
#[derive(Debug)]
pub enum ProxyError {
    /// Another caller holds the open/close guard.
    ResourceBusy,
    /// The underlying device could not be opened.
    BackendUnavailable {
        /// Path of the underlying device.
        path: PathBuf,
        /// Error reported by the backend.
        source: io::Error,
    },
    /// Operation attempted without a successful open.
    NotOpen,
    /// The underlying device lacks the requested capability.
    UnsupportedOperation(&'static str),
    /// The backend failed during a transfer.
    BackendIo(io::Error),
    /// Bytes could not be moved into the caller's destination.
    TransferFault {
        /// Bytes read from the backend.
        read: usize,
        /// Capacity of the destination.
        capacity: usize,
    },
    /// The staging buffer could not be allocated.
    OutOfMemory {
        /// Requested staging size in bytes.
        requested: usize,
    },
}

impl ProxyError {
    /// The errno a file-operation table reports for this error.
    ///
    /// Backend failures keep their own errno when they carry one.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::ResourceBusy => libc::EBUSY,
            Self::BackendUnavailable { source: err, .. } | Self::BackendIo(err) => {
                err.raw_os_error().unwrap_or(libc::EIO)
            }
            Self::NotOpen => libc::EIO,
            Self::UnsupportedOperation(_) => libc::EINVAL,
            Self::TransferFault { .. } => libc::EFAULT,
            Self::OutOfMemory { .. } => libc::ENOMEM,
        }
    }

    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ResourceBusy => true,
            Self::BackendIo(err) => err.kind() == io::ErrorKind::WouldBlock,
            _ => false,
        }
    }
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResourceBusy => write!(f, "Device is already in use"),
            Self::BackendUnavailable { path, source } => {
                write!(f, "Failed to open real device {}: {source}", path.display())
            }
            Self::NotOpen => write!(f, "Real device not opened"),
            Self::UnsupportedOperation(op) => write!(f, "Real device does not support {op}"),
            Self::BackendIo(err) => write!(f, "Backend I/O error: {err}"),
            Self::TransferFault { read, capacity } => write!(
                f,
                "Failed to copy {read} bytes into a {capacity}-byte destination"
            ),
            Self::OutOfMemory { requested } => {
                write!(f, "Failed to allocate {requested}-byte staging buffer")
            }
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BackendUnavailable { source: err, .. } | Self::BackendIo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ProxyError {
    fn from(err: io::Error) -> Self {
        Self::BackendIo(err)
    }
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
