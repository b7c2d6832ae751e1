//! V4L2 backend: opens capture nodes and forwards raw operations to them.
//!
//! The node is opened with `std` so its flags are exactly the requested
//! ones; capabilities are queried separately through the v4l crate. A path
//! that is not a V4L2 node still opens, it just reports no capabilities and
//! therefore no memory-map support.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::ops::Deref;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use memmap2::{Mmap, MmapMut, MmapOptions};
use tracing::debug;
use v4l::capability::Flags;
use v4l::Device;

use crate::traits::{
    CaptureHandle, DeviceBackend, DeviceCapabilities, MapRequest, OpenFlags, SupportsControl,
    SupportsMemoryMap,
};

/// Backend opening real V4L2 capture nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4L2Backend;

impl DeviceBackend for V4L2Backend {
    type Handle = V4L2Handle;

    fn open(&self, path: &Path, flags: OpenFlags) -> io::Result<V4L2Handle> {
        V4L2Handle::open(path, flags)
    }
}

/// An open V4L2 node.
#[derive(Debug)]
pub struct V4L2Handle {
    file: File,
    capabilities: Option<DeviceCapabilities>,
}

impl V4L2Handle {
    /// Open the node at `path` with `flags`.
    pub fn open(path: &Path, flags: OpenFlags) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(flags.write);
        if flags.non_blocking {
            options.custom_flags(libc::O_NONBLOCK);
        }
        let file = options.open(path)?;

        let capabilities = query_capabilities(path);
        debug!(
            path = %path.display(),
            v4l2 = capabilities.is_some(),
            "Opened underlying device"
        );

        Ok(Self { file, capabilities })
    }
}

/// Query V4L2 capabilities, or `None` when `path` is not a V4L2 node.
fn query_capabilities(path: &Path) -> Option<DeviceCapabilities> {
    let device = Device::with_path(path).ok()?;
    let caps = device.query_caps().ok()?;

    Some(DeviceCapabilities {
        driver: caps.driver,
        card: caps.card,
        bus_info: caps.bus,
        can_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
        can_stream: caps.capabilities.contains(Flags::STREAMING),
        can_read_write: caps.capabilities.contains(Flags::READ_WRITE),
    })
}

/// Payload size encoded in a Linux ioctl request, if it has a payload.
///
/// Layout: direction in bits 30..32, size in bits 16..30.
const fn encoded_payload_size(code: u32) -> Option<usize> {
    let direction = code >> 30;
    if direction == 0 {
        None
    } else {
        Some(((code >> 16) & 0x3fff) as usize)
    }
}

impl CaptureHandle for V4L2Handle {
    type Mapping = DeviceMapping;

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }

    fn as_memory_map(&self) -> Option<&dyn SupportsMemoryMap<Mapping = DeviceMapping>> {
        let can_stream = self.capabilities.as_ref().is_some_and(|caps| caps.can_stream);
        can_stream.then_some(self as &dyn SupportsMemoryMap<Mapping = DeviceMapping>)
    }

    fn as_control(&self) -> Option<&dyn SupportsControl> {
        Some(self)
    }

    fn capabilities(&self) -> Option<&DeviceCapabilities> {
        self.capabilities.as_ref()
    }

    fn close(self) -> io::Result<()> {
        drop(self.file);
        Ok(())
    }
}

impl SupportsMemoryMap for V4L2Handle {
    type Mapping = DeviceMapping;

    #[allow(unsafe_code)]
    fn map(&self, request: &MapRequest) -> io::Result<DeviceMapping> {
        let mut options = MmapOptions::new();
        options.offset(request.offset).len(request.length);

        // SAFETY: the region is device buffer memory owned by the driver, not
        // a file another process can truncate under us. The mapping keeps its
        // own reference to the buffer, so it outlives this descriptor safely.
        let mapping = if request.writable {
            DeviceMapping::ReadWrite(unsafe { options.map_mut(&self.file) }?)
        } else {
            DeviceMapping::ReadOnly(unsafe { options.map(&self.file) }?)
        };
        Ok(mapping)
    }
}

impl SupportsControl for V4L2Handle {
    #[allow(unsafe_code)]
    fn control(&self, code: u32, arg: &mut [u8]) -> io::Result<i32> {
        // Only requests whose encoded payload is exactly `arg` reach the
        // kernel; legacy codes carry no size and may not take a buffer.
        let size = encoded_payload_size(code).unwrap_or(0);
        if size != arg.len() {
            debug!(code, size, len = arg.len(), "Control payload does not match request");
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }

        let payload = if arg.is_empty() {
            std::ptr::null_mut()
        } else {
            arg.as_mut_ptr()
        };

        // SAFETY: the descriptor stays open for the whole call. The kernel
        // touches at most the payload size encoded in `code`, which equals
        // `arg.len()`; payload-less requests get a null pointer.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), code as _, payload) };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ret)
        }
    }
}

/// Device memory mapped through [`V4L2Handle`].
#[derive(Debug)]
pub enum DeviceMapping {
    /// Read-only mapping.
    ReadOnly(Mmap),
    /// Read/write mapping.
    ReadWrite(MmapMut),
}

impl DeviceMapping {
    /// Mutable access, for writable mappings only.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self {
            Self::ReadOnly(_) => None,
            Self::ReadWrite(map) => Some(map.as_mut()),
        }
    }
}

impl Deref for DeviceMapping {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::ReadOnly(map) => map.as_ref(),
            Self::ReadWrite(map) => map.as_ref(),
        }
    }
}
