//! Operation table the host video subsystem plugs the logical device into.
//!
//! The host layer owns client file handles and calls through
//! [`VideoFileOperations`] one call per client action. [`ReturnCode`] turns
//! results into the kernel convention (value, or negated errno).

use std::sync::Arc;

use tracing::info;

use crate::proxy::ProxyDevice;
use crate::traits::{CaptureHandle, DeviceBackend, MapRequest, Result};

/// `V4L2_CAP_VIDEO_CAPTURE`.
pub const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
/// `V4L2_CAP_READWRITE`.
pub const V4L2_CAP_READWRITE: u32 = 0x0100_0000;

/// How the logical device is advertised to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoDeviceDescriptor {
    /// Video node name.
    pub name: &'static str,
    /// Name of the parent V4L2 device.
    pub parent_name: &'static str,
    /// Advertised device capabilities.
    pub device_caps: u32,
}

impl VideoDeviceDescriptor {
    /// The virtual camera: capture via `read()`.
    pub const VCAM: Self = Self {
        name: "vcam",
        parent_name: "virtual-camera",
        device_caps: V4L2_CAP_VIDEO_CAPTURE | V4L2_CAP_READWRITE,
    };

    /// Whether capture is advertised.
    #[must_use]
    pub const fn can_capture(&self) -> bool {
        self.device_caps & V4L2_CAP_VIDEO_CAPTURE != 0
    }

    /// Whether `read()` I/O is advertised.
    #[must_use]
    pub const fn can_read_write(&self) -> bool {
        self.device_caps & V4L2_CAP_READWRITE != 0
    }
}

impl Default for VideoDeviceDescriptor {
    fn default() -> Self {
        Self::VCAM
    }
}

/// File operations a registered video node dispatches to.
pub trait VideoFileOperations: Send + Sync {
    /// Mapping returned by [`VideoFileOperations::mmap`].
    type Mapping;

    /// A client opened the node.
    fn open(&self) -> Result<()>;

    /// A client closed the node. Always succeeds.
    fn release(&self) -> Result<()>;

    /// A client read from the node.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// A client mapped device memory.
    fn mmap(&self, request: &MapRequest) -> Result<Self::Mapping>;

    /// A client issued a control command.
    fn ioctl(&self, code: u32, arg: &mut [u8]) -> Result<i32>;
}

#[allow(clippy::same_name_method)]
impl<B: DeviceBackend> VideoFileOperations for ProxyDevice<B> {
    type Mapping = <B::Handle as CaptureHandle>::Mapping;

    fn open(&self) -> Result<()> {
        self.attempt_open()
    }

    fn release(&self) -> Result<()> {
        ProxyDevice::release(self);
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let length = buf.len();
        self.forward_read(buf, length)
    }

    fn mmap(&self, request: &MapRequest) -> Result<Self::Mapping> {
        self.forward_memory_map(request)
    }

    fn ioctl(&self, code: u32, arg: &mut [u8]) -> Result<i32> {
        self.forward_control(code, arg)
    }
}

/// Conversion of an operation result to a kernel-style return value.
pub trait ReturnCode {
    /// Non-negative value on success, `-errno` on failure.
    fn return_code(&self) -> i64;
}

impl ReturnCode for Result<()> {
    fn return_code(&self) -> i64 {
        match self {
            Ok(()) => 0,
            Err(err) => -i64::from(err.errno()),
        }
    }
}

impl ReturnCode for Result<usize> {
    fn return_code(&self) -> i64 {
        match self {
            Ok(count) => i64::try_from(*count).unwrap_or(i64::MAX),
            Err(err) => -i64::from(err.errno()),
        }
    }
}

impl ReturnCode for Result<i32> {
    fn return_code(&self) -> i64 {
        match self {
            Ok(value) => i64::from(*value),
            Err(err) => -i64::from(err.errno()),
        }
    }
}

/// A logical device registered with the host.
pub struct Registration<F: VideoFileOperations> {
    descriptor: VideoDeviceDescriptor,
    ops: Arc<F>,
}

impl<F: VideoFileOperations> Registration<F> {
    /// Register `ops` under `descriptor`.
    pub fn register(descriptor: VideoDeviceDescriptor, ops: F) -> Self {
        info!(
            name = descriptor.name,
            parent = descriptor.parent_name,
            device_caps = descriptor.device_caps,
            "Registering video device"
        );
        Self {
            descriptor,
            ops: Arc::new(ops),
        }
    }

    /// The advertised descriptor.
    pub const fn descriptor(&self) -> &VideoDeviceDescriptor {
        &self.descriptor
    }

    /// The operation table.
    pub fn ops(&self) -> &F {
        &self.ops
    }

    /// A shared reference to the operation table for concurrent callers.
    pub fn shared_ops(&self) -> Arc<F> {
        Arc::clone(&self.ops)
    }
}

impl<F: VideoFileOperations> Drop for Registration<F> {
    fn drop(&mut self) {
        info!(name = self.descriptor.name, "Unregistering video device");
    }
}
