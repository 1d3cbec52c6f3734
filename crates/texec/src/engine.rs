use std::sync::{Arc, Mutex};

use crate::error::{AllocationError, EngineError};

/// The three control programs a compiled engine exposes. Staged transfers
/// run `HostToDevice`/`DeviceToHost` once over every connected channel;
/// `Main` is the compute program, with streamed channels moving while it
/// runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    HostToDevice,
    Main,
    DeviceToHost,
}

/// One connected channel: a deterministic channel name plus the bytes
/// moving through it. For host-to-device channels the executor fills
/// `bytes`; for device-to-host channels the engine overwrites them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBuffer {
    pub channel: String,
    pub bytes: Vec<u8>,
}

/// The set of channels connected for one engine program invocation.
/// "Connecting" a channel is pushing it here; the subsequent `run` call
/// moves data for every connected channel at once.
#[derive(Debug, Default)]
pub struct StreamSet {
    to_device: Vec<StreamBuffer>,
    to_host: Vec<StreamBuffer>,
}

impl StreamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_to_device(&mut self, channel: impl Into<String>, bytes: Vec<u8>) {
        self.to_device.push(StreamBuffer {
            channel: channel.into(),
            bytes,
        });
    }

    pub fn connect_to_host(&mut self, channel: impl Into<String>, bytes: Vec<u8>) {
        self.to_host.push(StreamBuffer {
            channel: channel.into(),
            bytes,
        });
    }

    pub fn to_device(&self) -> &[StreamBuffer] {
        &self.to_device
    }

    pub fn to_host(&self) -> &[StreamBuffer] {
        &self.to_host
    }

    pub fn to_host_mut(&mut self) -> &mut [StreamBuffer] {
        &mut self.to_host
    }

    pub fn is_empty(&self) -> bool {
        self.to_device.is_empty() && self.to_host.is_empty()
    }

    pub fn into_parts(self) -> (Vec<StreamBuffer>, Vec<StreamBuffer>) {
        (self.to_device, self.to_host)
    }
}

/// A compiled device engine. Implementations wrap the vendor runtime; the
/// executor only ever drives this interface, so tests substitute a fake.
///
/// Faults surface as `EngineError` values; the executor tags them with the
/// phase they occurred in. No engine operation is retried or cancelled.
pub trait DeviceEngine: Send {
    /// Loads the engine onto the device, evicting whatever was resident.
    fn load(&mut self) -> Result<(), EngineError>;

    /// Runs one control program over the connected channels.
    fn run(&mut self, kind: ProgramKind, streams: &mut StreamSet) -> Result<(), EngineError>;

    /// Optional execution report captured after the first run of a program.
    fn execution_report(&mut self) -> Option<String> {
        None
    }
}

/// Engines are shared between the compiled program that owns them and the
/// executor that keeps the currently-loaded one.
pub type SharedEngine = Arc<Mutex<dyn DeviceEngine>>;

/// Backing-storage provider for buffer payloads.
pub trait Allocator: Send + Sync {
    fn allocate(
        &self,
        ordinal: u32,
        byte_len: usize,
        zero_init: bool,
    ) -> Result<Vec<u8>, AllocationError>;
}

/// Default allocator: plain host memory. Always zero-initialises, which
/// satisfies both `zero_init` modes.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostAllocator;

impl Allocator for HostAllocator {
    fn allocate(
        &self,
        _ordinal: u32,
        byte_len: usize,
        _zero_init: bool,
    ) -> Result<Vec<u8>, AllocationError> {
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(byte_len)
            .map_err(|err| AllocationError::new(byte_len, err.to_string()))?;
        payload.resize(byte_len, 0);
        Ok(payload)
    }
}
