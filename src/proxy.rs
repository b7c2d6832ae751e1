//! Single-resource proxy over one underlying capture device.
//!
//! [`ProxyDevice`] binds the underlying device on the first open and closes
//! it when the last session is released. Open/close bookkeeping happens
//! under one guard; `attempt_open` never waits for it, `release` always does.
//!
//! Forwarded operations (read, memory-map, control) never touch the guard.
//! They hold a shared lock on the binding slot for the length of the backend
//! call, and teardown takes that slot exclusively, so a handle is never
//! closed while a forwarded call is still using it.

use std::path::Path;
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use tracing::{debug, error, info, warn};

use crate::config::ProxyConfig;
use crate::traits::{
    CaptureHandle, DeviceBackend, DeviceCapabilities, MapRequest, ProxyError, Result,
};

/// Binding state of a [`ProxyDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    /// No underlying handle is open.
    Unbound,
    /// One underlying handle is open.
    Bound,
}

/// Proxy presenting one logical capture device over one underlying device.
pub struct ProxyDevice<B: DeviceBackend> {
    backend: B,
    config: ProxyConfig,
    /// Open-session count. Holding this lock is what "holding the guard" means.
    guard: Mutex<usize>,
    binding: RwLock<Option<B::Handle>>,
}

impl<B: DeviceBackend> ProxyDevice<B> {
    /// Create an unbound proxy that will open `config.device_path` through `backend`.
    pub const fn new(backend: B, config: ProxyConfig) -> Self {
        Self {
            backend,
            config,
            guard: Mutex::new(0),
            binding: RwLock::new(None),
        }
    }

    /// Path of the underlying device.
    pub fn device_path(&self) -> &Path {
        self.config.device_path()
    }

    /// The backend this proxy opens devices through.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Start a session, binding the underlying device if this is the first one.
    ///
    /// Fails with [`ProxyError::ResourceBusy`] without waiting if another
    /// caller is opening or releasing.
    pub fn attempt_open(&self) -> Result<()> {
        let mut sessions = match self.guard.try_lock() {
            Ok(sessions) => sessions,
            Err(TryLockError::WouldBlock) => {
                error!(path = %self.device_path().display(), "Device is already in use");
                return Err(ProxyError::ResourceBusy);
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        if *sessions == 0 {
            let handle = self
                .backend
                .open(self.device_path(), self.config.flags)
                .map_err(|source| {
                    error!(
                        path = %self.device_path().display(),
                        error = %source,
                        "Failed to open real device"
                    );
                    ProxyError::BackendUnavailable {
                        path: self.device_path().to_path_buf(),
                        source,
                    }
                })?;
            *self.slot_mut() = Some(handle);
        }

        *sessions += 1;
        info!(
            path = %self.device_path().display(),
            sessions = *sessions,
            "Device opened"
        );
        Ok(())
    }

    /// End a session, closing the underlying device when it was the last one.
    ///
    /// Waits for the guard. Releasing an unbound proxy does nothing.
    pub fn release(&self) {
        let mut sessions = self.guard.lock().unwrap_or_else(PoisonError::into_inner);

        if *sessions == 0 {
            debug!(path = %self.device_path().display(), "Release without open session");
            return;
        }

        *sessions -= 1;
        if *sessions == 0 {
            if let Some(handle) = self.slot_mut().take() {
                if let Err(err) = handle.close() {
                    warn!(
                        path = %self.device_path().display(),
                        error = %err,
                        "Failed to close real device"
                    );
                }
            }
        }

        info!(
            path = %self.device_path().display(),
            sessions = *sessions,
            "Device closed"
        );
    }

    /// Read up to `length` bytes from the underlying device into `destination`.
    ///
    /// The bytes are read into a staging buffer first and then copied out.
    /// Returns the number of bytes transferred; short reads are not retried.
    pub fn forward_read(&self, destination: &mut [u8], length: usize) -> Result<usize> {
        let slot = self.slot();
        let handle = slot.as_ref().ok_or_else(|| {
            error!("Real camera not opened for read");
            ProxyError::NotOpen
        })?;

        let mut staging = Vec::new();
        staging
            .try_reserve_exact(length)
            .map_err(|_| ProxyError::OutOfMemory { requested: length })?;
        staging.resize(length, 0);

        let read = handle.read(&mut staging).map_err(|err| {
            error!(length, error = %err, "Failed to read from real camera");
            ProxyError::BackendIo(err)
        })?;

        let capacity = destination.len();
        let (Some(dst), Some(src)) = (destination.get_mut(..read), staging.get(..read)) else {
            error!(read, capacity, "Failed to copy data to caller");
            return Err(ProxyError::TransferFault { read, capacity });
        };
        dst.copy_from_slice(src);

        debug!(read, requested = length, "Captured bytes");
        Ok(read)
    }

    /// Forward a memory-map request to the underlying device.
    pub fn forward_memory_map(
        &self,
        request: &MapRequest,
    ) -> Result<<B::Handle as CaptureHandle>::Mapping> {
        let slot = self.slot();
        let handle = slot.as_ref().ok_or_else(|| {
            error!("Real camera not opened for mmap");
            ProxyError::NotOpen
        })?;

        let mapper = handle.as_memory_map().ok_or_else(|| {
            error!("Real device does not support mmap");
            ProxyError::UnsupportedOperation("mmap")
        })?;

        let mapping = mapper.map(request).map_err(|err| {
            error!(
                offset = request.offset,
                length = request.length,
                error = %err,
                "Failed to mmap real camera device"
            );
            ProxyError::BackendIo(err)
        })?;

        debug!(
            offset = request.offset,
            length = request.length,
            "Mapped memory from real device"
        );
        Ok(mapping)
    }

    /// Forward control command `code` with payload `arg` to the underlying device.
    ///
    /// The command is not interpreted; the backend's result comes back as is.
    pub fn forward_control(&self, code: u32, arg: &mut [u8]) -> Result<i32> {
        let slot = self.slot();
        let handle = slot.as_ref().ok_or_else(|| {
            error!(code, "Real camera not opened for control command");
            ProxyError::NotOpen
        })?;

        let control = handle.as_control().ok_or_else(|| {
            error!(code, "Real device does not support control commands");
            ProxyError::UnsupportedOperation("control commands")
        })?;

        let ret = control.control(code, arg).map_err(|err| {
            error!(code, error = %err, "Control command failed");
            ProxyError::BackendIo(err)
        })?;

        debug!(code, ret, "Control command handled");
        Ok(ret)
    }

    /// Number of open sessions.
    pub fn open_sessions(&self) -> usize {
        *self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether an underlying handle is open.
    pub fn is_bound(&self) -> bool {
        self.slot().is_some()
    }

    /// Current binding state.
    pub fn state(&self) -> ProxyState {
        if self.is_bound() {
            ProxyState::Bound
        } else {
            ProxyState::Unbound
        }
    }

    /// Capabilities of the bound device, if bound and queryable.
    pub fn capabilities(&self) -> Option<DeviceCapabilities> {
        self.slot()
            .as_ref()
            .and_then(CaptureHandle::capabilities)
            .cloned()
    }

    fn slot(&self) -> RwLockReadGuard<'_, Option<B::Handle>> {
        self.binding.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot_mut(&self) -> RwLockWriteGuard<'_, Option<B::Handle>> {
        self.binding.write().unwrap_or_else(PoisonError::into_inner)
    }
}
