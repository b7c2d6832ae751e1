//! Mock backend implementation for testing without hardware.

use crate::traits::{
    CaptureHandle, DeviceBackend, DeviceCapabilities, MapRequest, OpenFlags, SupportsControl,
    SupportsMemoryMap,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, PoisonError};

/// Control code the mock rejects with `ENOTTY`.
pub const MOCK_BAD_COMMAND: u32 = 0xdead;

/// Counters shared between a mock backend and its handles.
#[derive(Debug, Default)]
pub struct MockStats {
    live: AtomicUsize,
    max_live: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl MockStats {
    /// Handles currently alive.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of handles ever alive at once.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Successful backend opens.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Explicit closes through [`CaptureHandle::close`].
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Holds one backend call until the test lets it through.
#[derive(Debug, Clone)]
pub struct CallGate {
    entered: Arc<Barrier>,
    proceed: Arc<Barrier>,
}

impl CallGate {
    fn new() -> Self {
        Self {
            entered: Arc::new(Barrier::new(2)),
            proceed: Arc::new(Barrier::new(2)),
        }
    }

    /// Block until the gated call has started.
    pub fn wait_entered(&self) {
        self.entered.wait();
    }

    /// Let the gated call complete.
    pub fn release(&self) {
        self.proceed.wait();
    }

    fn pass(&self) {
        self.entered.wait();
        self.proceed.wait();
    }
}

fn arm(slot: &Mutex<Option<CallGate>>) -> CallGate {
    let gate = CallGate::new();
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(gate.clone());
    gate
}

/// Wait at the gate in `slot`, if one is armed; it only holds one call.
fn pass_armed(slot: &Mutex<Option<CallGate>>) {
    let gate = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(gate) = gate {
        gate.pass();
    }
}

/// Test pattern types for mock stream data.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// Byte `i` is `i % 251`, so no short period lines up with buffer sizes.
    Ramp,
    /// Every byte has the same value.
    Solid(u8),
}

/// Generate `len` bytes of stream data.
pub fn generate_stream(pattern: TestPattern, len: usize) -> Vec<u8> {
    match pattern {
        #[allow(clippy::cast_possible_truncation)]
        TestPattern::Ramp => (0..len).map(|i| (i % 251) as u8).collect(),
        TestPattern::Solid(value) => vec![value; len],
    }
}

/// Mock backend for testing without hardware.
pub struct MockBackend {
    data: Arc<Vec<u8>>,
    capabilities: DeviceCapabilities,
    memory_map: bool,
    control: bool,
    fail_opens: AtomicUsize,
    fail_reads: Arc<AtomicBool>,
    gate: Mutex<Option<CallGate>>,
    read_gate: Arc<Mutex<Option<CallGate>>>,
    control_gate: Arc<Mutex<Option<CallGate>>>,
    opened_paths: Mutex<Vec<PathBuf>>,
    commands: Arc<Mutex<Vec<(u32, Vec<u8>)>>>,
    stats: Arc<MockStats>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a mock backend with a 4 KiB ramp stream and every capability.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(generate_stream(TestPattern::Ramp, 4096)),
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
                can_read_write: true,
            },
            memory_map: true,
            control: true,
            fail_opens: AtomicUsize::new(0),
            fail_reads: Arc::new(AtomicBool::new(false)),
            gate: Mutex::new(None),
            read_gate: Arc::new(Mutex::new(None)),
            control_gate: Arc::new(Mutex::new(None)),
            opened_paths: Mutex::new(Vec::new()),
            commands: Arc::new(Mutex::new(Vec::new())),
            stats: Arc::new(MockStats::default()),
        }
    }

    /// Serve `data` as the stream contents.
    #[must_use]
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Arc::new(data);
        self
    }

    /// Drop the memory-map capability.
    #[must_use]
    pub fn without_memory_map(mut self) -> Self {
        self.memory_map = false;
        self.capabilities.can_stream = false;
        self
    }

    /// Drop the control-command capability.
    #[must_use]
    pub fn without_control(mut self) -> Self {
        self.control = false;
        self
    }

    /// Fail the next `count` opens with `ENOENT`.
    #[must_use]
    pub fn failing_opens(self, count: usize) -> Self {
        self.fail_opens.store(count, Ordering::SeqCst);
        self
    }

    /// Gate the next open; returns the gate the test drives.
    pub fn gate_next_open(&self) -> CallGate {
        arm(&self.gate)
    }

    /// Gate the next read on any handle.
    pub fn gate_next_read(&self) -> CallGate {
        arm(&self.read_gate)
    }

    /// Gate the next control command on any handle.
    pub fn gate_next_control(&self) -> CallGate {
        arm(&self.control_gate)
    }

    /// Make reads on every handle fail with `EIO`.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Shared counters.
    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }

    /// Paths passed to successful opens.
    pub fn opened_paths(&self) -> Vec<PathBuf> {
        self.opened_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Control commands seen so far, with the argument as received.
    pub fn commands(&self) -> Vec<(u32, Vec<u8>)> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DeviceBackend for MockBackend {
    type Handle = MockHandle;

    fn open(&self, path: &Path, _flags: OpenFlags) -> io::Result<MockHandle> {
        pass_armed(&self.gate);

        let failed = self
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }

        self.opened_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_path_buf());

        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.stats.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(MockHandle {
            data: Arc::clone(&self.data),
            position: Mutex::new(0),
            capabilities: self.capabilities.clone(),
            memory_map: self.memory_map,
            control: self.control,
            fail_reads: Arc::clone(&self.fail_reads),
            read_gate: Arc::clone(&self.read_gate),
            control_gate: Arc::clone(&self.control_gate),
            commands: Arc::clone(&self.commands),
            stats: Arc::clone(&self.stats),
        })
    }
}

/// Handle produced by [`MockBackend`].
pub struct MockHandle {
    data: Arc<Vec<u8>>,
    position: Mutex<usize>,
    capabilities: DeviceCapabilities,
    memory_map: bool,
    control: bool,
    fail_reads: Arc<AtomicBool>,
    read_gate: Arc<Mutex<Option<CallGate>>>,
    control_gate: Arc<Mutex<Option<CallGate>>>,
    commands: Arc<Mutex<Vec<(u32, Vec<u8>)>>>,
    stats: Arc<MockStats>,
}

impl CaptureHandle for MockHandle {
    type Mapping = Vec<u8>;

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        pass_armed(&self.read_gate);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }

        let mut position = self.position.lock().unwrap_or_else(PoisonError::into_inner);
        let remaining = self.data.get(*position..).unwrap_or_default();
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        *position += count;
        Ok(count)
    }

    fn as_memory_map(&self) -> Option<&dyn SupportsMemoryMap<Mapping = Vec<u8>>> {
        self.memory_map
            .then_some(self as &dyn SupportsMemoryMap<Mapping = Vec<u8>>)
    }

    fn as_control(&self) -> Option<&dyn SupportsControl> {
        self.control.then_some(self as &dyn SupportsControl)
    }

    fn capabilities(&self) -> Option<&DeviceCapabilities> {
        Some(&self.capabilities)
    }

    fn close(self) -> io::Result<()> {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SupportsMemoryMap for MockHandle {
    type Mapping = Vec<u8>;

    fn map(&self, request: &MapRequest) -> io::Result<Vec<u8>> {
        let start = usize::try_from(request.offset)
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        let end = start
            .checked_add(request.length)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        self.data
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))
    }
}

impl SupportsControl for MockHandle {
    fn control(&self, code: u32, arg: &mut [u8]) -> io::Result<i32> {
        pass_armed(&self.control_gate);
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((code, arg.to_vec()));

        if code == MOCK_BAD_COMMAND {
            return Err(io::Error::from_raw_os_error(libc::ENOTTY));
        }

        // Echo the code back so callers can see the payload is shared
        for (dst, src) in arg.iter_mut().zip(code.to_le_bytes()) {
            *dst = src;
        }
        Ok(i32::try_from(arg.len()).unwrap_or(i32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_backend_creation() {
        let backend = MockBackend::new();
        let handle = backend
            .open(Path::new("/dev/mock0"), OpenFlags::CAPTURE)
            .expect("open should succeed");
        let caps = handle.capabilities().expect("mock reports capabilities");
        assert_eq!(caps.driver, "mock");
        assert!(caps.can_capture);
        assert!(caps.can_stream);
        assert!(handle.as_memory_map().is_some());
        assert!(handle.as_control().is_some());
        assert_eq!(backend.opened_paths(), vec![PathBuf::from("/dev/mock0")]);
    }

    #[test]
    fn test_mock_read_advances_position() {
        let backend = MockBackend::new().with_data(vec![1, 2, 3, 4, 5]);
        let handle = backend
            .open(Path::new("/dev/mock0"), OpenFlags::CAPTURE)
            .expect("open should succeed");

        let mut buf = [0u8; 3];
        assert_eq!(handle.read(&mut buf).expect("read should succeed"), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(handle.read(&mut buf).expect("read should succeed"), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(handle.read(&mut buf).expect("read should succeed"), 0);
    }

    #[test]
    fn test_mock_failing_opens() {
        let backend = MockBackend::new().failing_opens(1);
        assert!(backend
            .open(Path::new("/dev/mock0"), OpenFlags::CAPTURE)
            .is_err());
        assert!(backend
            .open(Path::new("/dev/mock0"), OpenFlags::CAPTURE)
            .is_ok());
    }

    #[test]
    fn test_mock_live_counting() {
        let backend = MockBackend::new();
        let stats = backend.stats();
        let handle = backend
            .open(Path::new("/dev/mock0"), OpenFlags::CAPTURE)
            .expect("open should succeed");
        assert_eq!(stats.live(), 1);
        handle.close().expect("close should succeed");
        assert_eq!(stats.live(), 0);
        assert_eq!(stats.closed(), 1);
        assert_eq!(stats.max_live(), 1);
    }

    #[test]
    fn test_ramp_pattern() {
        let data = generate_stream(TestPattern::Ramp, 600);
        assert_eq!(data.len(), 600);
        assert_eq!(data[0], 0);
        assert_eq!(data[250], 250);
        assert_eq!(data[251], 0);
    }

    #[test]
    fn test_solid_pattern() {
        let data = generate_stream(TestPattern::Solid(128), 64);
        assert!(data.iter().all(|&b| b == 128));
    }
}
