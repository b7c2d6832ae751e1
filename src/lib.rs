//! vcam-proxy: a single-resource V4L2 capture device proxy
//!
//! This library presents one logical capture device while binding exactly one
//! underlying device, serializing open/close and forwarding reads, memory maps
//! and control commands to it. Backends plug in through the capability-set
//! traits, so the proxy runs against real hardware or mock devices.

pub mod config;
pub mod device;
pub mod proxy;
pub mod registration;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use config::ProxyConfig;
pub use device::{DeviceMapping, V4L2Backend, V4L2Handle};
pub use proxy::{ProxyDevice, ProxyState};
pub use registration::{Registration, ReturnCode, VideoDeviceDescriptor, VideoFileOperations};
pub use traits::{
    CaptureHandle, DeviceBackend, DeviceCapabilities, MapRequest, OpenFlags, ProxyError,
    SupportsControl, SupportsMemoryMap,
};
